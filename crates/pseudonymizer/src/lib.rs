//! auditroute_pseudonymizer
//!
//! C8: replaces person names, personal IDs, and monetary amounts found in
//! retrieved records with stable per-session pseudonyms before the
//! records go into a generative-LLM prompt, and reverses the mapping on
//! the way back. Every create/access/cleanup/decryption-error is
//! appended to the hash-chained audit log.
//!
//! Storage shape — an append-only `pseudonyms.jsonl` historical ledger
//! plus a rewritten canonical `index.json` current-state table — is
//! grounded on `pie_episodes::EpisodeStore`'s jsonl-plus-index split.
//! Unlike the episode index (append-only growth), this index is also
//! *mutated* by `cleanup_expired`, so every write goes through a
//! write-to-temp-then-rename so a crash mid-write can't corrupt the
//! live table.
//!
//! Encryption is AES-256-GCM with a fresh random nonce per call
//! (invariant (b): ciphertexts of equal originals differ across
//! sessions). The key is derived once via PBKDF2-HMAC-SHA256 (>=100,000
//! iterations) from `ENCRYPTION_SECRET`. Equality-within-a-session
//! (invariant (a)) is *not* derived from the ciphertext (which is
//! randomized by design) — it is driven by a separate deterministic
//! HMAC-SHA256 blind index computed the same way
//! `auditroute_common::hmac_sha256_hex` documents for exactly this
//! purpose.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use auditroute_audit_log::AuditAppender;
use auditroute_audit_spec::{
    AuditEvent, MappingAccessed, MappingCleanup, MappingCreated, MappingDecryptionError, PseudonymKind,
    SessionId, UserId,
};
use auditroute_common::{b64_decode, b64_encode, hmac_sha256_hex};
use auditroute_schema::AuditRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT: &[u8] = b"auditroute/pseudonym/v1";
pub const DEFAULT_SESSION_TTL_DAYS: f64 = 30.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Error)]
pub enum PseudonymError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] auditroute_common::CanonError),
    #[error("audit log error: {0}")]
    Audit(#[from] auditroute_audit_log::AuditLogError),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("encryption secret must decode to at least 32 bytes, got {0}")]
    InvalidSecret(usize),
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

/// A persisted mapping row. `original_ciphertext` is `base64(nonce || ct)`;
/// `blind_index` is the deterministic HMAC lookup key for
/// "same original, same session -> same pseudonym".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PseudonymMapping {
    pub session_id: String,
    pub kind: PseudonymKind,
    pub original_ciphertext: String,
    pub blind_index: String,
    pub pseudonym: String,
    pub created_at: f64,
    pub expires_at: f64,
    pub usage_count: u64,
    pub last_accessed_at: f64,
    pub created_by: String,
}

/// `pending -> active -> expired -> deleted`. A row that satisfies
/// `Deleted` has already been removed by `cleanup_expired`; this enum is
/// only meaningful for rows still present in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    Active,
    Expired,
}

impl PseudonymMapping {
    pub fn state(&self, now: f64) -> MappingState {
        if self.expires_at <= now {
            MappingState::Expired
        } else {
            MappingState::Active
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PseudonymIndex {
    schema_version: u8,
    entries: Vec<PseudonymMapping>,
}

pub struct PseudonymizeOutcome {
    pub records: Vec<AuditRecord>,
    pub created: u64,
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:Rp\.?\s?|IDR\s?|\$\s?)\d[\d.,]*").unwrap()
    })
}

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{9,20}\b").unwrap())
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?:\.)?(?:\s+[A-Z][a-z]+(?:\.)?){1,3}\b").unwrap())
}

fn pseudonym_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:Person_[A-Za-z]+|ID_\d+|Amount_\d+)\b").unwrap())
}

struct Claim {
    start: usize,
    end: usize,
    kind: PseudonymKind,
}

/// Scans `text` for amount spans, then ID digit runs, then proper-name
/// spans (in that priority order, so an amount's digits are never
/// re-claimed as a bare ID). Matches never overlap.
fn scan_candidates(text: &str) -> Vec<Claim> {
    let mut claimed = vec![false; text.len()];
    let mut claims = Vec::new();

    let passes: [(PseudonymKind, &Regex); 3] =
        [(PseudonymKind::Amount, amount_re()), (PseudonymKind::Id, id_re()), (PseudonymKind::Person, name_re())];

    for (kind, re) in passes {
        for m in re.find_iter(text) {
            if claimed[m.start()..m.end()].iter().any(|&b| b) {
                continue;
            }
            for b in &mut claimed[m.start()..m.end()] {
                *b = true;
            }
            claims.push(Claim { start: m.start(), end: m.end(), kind });
        }
    }
    claims.sort_by_key(|c| c.start);
    claims
}

fn alpha_label(n: u32) -> String {
    let mut n = n;
    let mut s = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        s.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    s
}

/// `Person_A`, `Person_B`, ... for people; zero-padded `ID_001`/`Amount_001`
/// for the other two kinds, matching the GLOSSARY's worked examples.
fn allocate_label(kind: PseudonymKind, seq: u32) -> String {
    match kind {
        PseudonymKind::Person => format!("{}_{}", kind.label(), alpha_label(seq)),
        PseudonymKind::Id | PseudonymKind::Amount => format!("{}_{:03}", kind.label(), seq),
    }
}

fn derive_key(secret: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(secret, PBKDF2_SALT, PBKDF2_ITERATIONS, &mut key);
    key
}

fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, PseudonymError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ct = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| PseudonymError::Crypto("encryption failed".into()))?;
    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ct);
    Ok(b64_encode(&combined))
}

fn decrypt(key: &[u8; 32], encoded: &str) -> Result<String, PseudonymError> {
    let combined = b64_decode(encoded).map_err(|e| PseudonymError::Crypto(e.to_string()))?;
    if combined.len() < 12 {
        return Err(PseudonymError::Crypto("ciphertext too short".into()));
    }
    let (nonce_bytes, ct) = combined.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    let pt = cipher
        .decrypt(nonce, ct)
        .map_err(|_| PseudonymError::Crypto("decryption failed".into()))?;
    String::from_utf8(pt).map_err(|e| PseudonymError::Crypto(e.to_string()))
}

pub struct Pseudonymizer {
    base_dir: PathBuf,
    key: [u8; 32],
    session_ttl_secs: f64,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Pseudonymizer {
    /// A missing/too-short `ENCRYPTION_SECRET` is a fatal startup error
    /// per spec §5; `secret` must decode to >=32 bytes.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        secret: &[u8],
        session_ttl_days: f64,
    ) -> Result<Self, PseudonymError> {
        if secret.len() < 32 {
            return Err(PseudonymError::InvalidSecret(secret.len()));
        }
        Ok(Self {
            base_dir: base_dir.into(),
            key: derive_key(secret),
            session_ttl_secs: session_ttl_days * SECONDS_PER_DAY,
            session_locks: Mutex::new(HashMap::new()),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.json")
    }

    fn jsonl_path(&self) -> PathBuf {
        self.base_dir.join("pseudonyms.jsonl")
    }

    fn ensure_dirs(&self) -> Result<(), PseudonymError> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    fn load_index(&self) -> Result<PseudonymIndex, PseudonymError> {
        self.ensure_dirs()?;
        let p = self.index_path();
        if !p.exists() {
            return Ok(PseudonymIndex { schema_version: 1, entries: Vec::new() });
        }
        Ok(serde_json::from_slice(&fs::read(p)?)?)
    }

    /// Write-to-temp-then-rename: a crash mid-write leaves the previous
    /// `index.json` intact rather than a half-written file.
    fn write_index(&self, idx: &PseudonymIndex) -> Result<(), PseudonymError> {
        self.ensure_dirs()?;
        let bytes = auditroute_common::canonical_json_bytes(idx)?;
        let tmp = self.index_path().with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(tmp, self.index_path())?;
        Ok(())
    }

    fn append_jsonl(&self, mapping: &PseudonymMapping) -> Result<(), PseudonymError> {
        self.ensure_dirs()?;
        let mut f = fs::OpenOptions::new().create(true).append(true).open(self.jsonl_path())?;
        use std::io::Write;
        serde_json::to_writer(&mut f, mapping)?;
        f.write_all(b"\n")?;
        Ok(())
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().unwrap();
        locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Looks up (or allocates) the pseudonym for `original` within
    /// `session_id`/`kind`. Must be called with the session's lock held;
    /// mutates `idx` in place but does not persist it — the caller
    /// persists once per batch for all-or-none atomicity.
    fn find_or_allocate(
        &self,
        idx: &mut PseudonymIndex,
        session_id: &str,
        kind: PseudonymKind,
        original: &str,
        now: f64,
        created_by: &str,
    ) -> Result<(String, bool), PseudonymError> {
        let blind_index = hmac_sha256_hex(&self.key, original.as_bytes());

        if let Some(existing) =
            idx.entries.iter_mut().find(|e| e.session_id == session_id && e.kind == kind && e.blind_index == blind_index)
        {
            existing.usage_count += 1;
            existing.last_accessed_at = now;
            return Ok((existing.pseudonym.clone(), false));
        }

        let seq = idx.entries.iter().filter(|e| e.session_id == session_id && e.kind == kind).count() as u32 + 1;
        let pseudonym = allocate_label(kind, seq);
        let ciphertext = encrypt(&self.key, original)?;
        let mapping = PseudonymMapping {
            session_id: session_id.to_string(),
            kind,
            original_ciphertext: ciphertext,
            blind_index,
            pseudonym: pseudonym.clone(),
            created_at: now,
            expires_at: now + self.session_ttl_secs,
            usage_count: 1,
            last_accessed_at: now,
            created_by: created_by.to_string(),
        };
        idx.entries.push(mapping);
        Ok((pseudonym, true))
    }

    /// Replaces person/ID/amount spans found in `records`' free-text
    /// fields with session-scoped pseudonyms. Allocation for the whole
    /// batch happens under one session lock and one index write, so a
    /// cancelled request leaves either all or none of its newly-created
    /// pseudonyms persisted.
    pub fn pseudonymize_records(
        &self,
        records: &[AuditRecord],
        session_id: &str,
        user_id: &str,
        now: f64,
        audit: &mut AuditAppender,
    ) -> Result<PseudonymizeOutcome, PseudonymError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();

        let mut idx = self.load_index()?;
        let mut created_rows: Vec<PseudonymMapping> = Vec::new();
        let mut created = 0u64;

        let mut out_records = Vec::with_capacity(records.len());
        for record in records {
            let mut r = record.clone();
            for field in [&mut r.project_name, &mut r.descriptions, &mut r.risk_area] {
                let claims = scan_candidates(field);
                if claims.is_empty() {
                    continue;
                }
                let mut rewritten = String::with_capacity(field.len());
                let mut cursor = 0usize;
                for claim in &claims {
                    rewritten.push_str(&field[cursor..claim.start]);
                    let original = &field[claim.start..claim.end];
                    let before = idx.entries.len();
                    let (pseudonym, was_created) =
                        self.find_or_allocate(&mut idx, session_id, claim.kind, original, now, user_id)?;
                    if was_created {
                        created += 1;
                        created_rows.push(idx.entries[before].clone());
                    }
                    rewritten.push_str(&pseudonym);
                    cursor = claim.end;
                }
                rewritten.push_str(&field[cursor..]);
                *field = rewritten;
            }
            out_records.push(r);
        }

        if created > 0 {
            self.write_index(&idx)?;
            for row in &created_rows {
                self.append_jsonl(row)?;
                audit.append(AuditEvent::MappingCreate(MappingCreated {
                    schema_version: 1,
                    session_id: SessionId(session_id.to_string()),
                    user_id: UserId(user_id.to_string()),
                    kind: row.kind,
                    pseudonym: row.pseudonym.clone(),
                    ts: now,
                }))?;
            }
        } else if !idx.entries.is_empty() {
            // Usage counters still changed on existing rows; persist that too.
            self.write_index(&idx)?;
        }

        Ok(PseudonymizeOutcome { records: out_records, created })
    }

    /// Reverses pseudonyms back to their decrypted originals, scoped to
    /// `session_id`. A session with no mappings at all is a fatal
    /// `UnknownSession` error (the router must refuse to show data
    /// rather than risk leaking a pseudonym to the wrong session).
    pub fn depseudonymize(
        &self,
        text: &str,
        session_id: &str,
        user_id: &str,
        now: f64,
        audit: &mut AuditAppender,
    ) -> Result<String, PseudonymError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();

        let mut idx = self.load_index()?;
        if !idx.entries.iter().any(|e| e.session_id == session_id) {
            return Err(PseudonymError::UnknownSession(session_id.to_string()));
        }

        let mut replacements: HashMap<String, String> = HashMap::new();
        for m in pseudonym_token_re().find_iter(text) {
            let token = m.as_str().to_string();
            if replacements.contains_key(&token) {
                continue;
            }
            let Some(entry) = idx.entries.iter_mut().find(|e| e.session_id == session_id && e.pseudonym == token)
            else {
                continue;
            };
            match decrypt(&self.key, &entry.original_ciphertext) {
                Ok(original) => {
                    entry.usage_count += 1;
                    entry.last_accessed_at = now;
                    audit.append(AuditEvent::MappingAccess(MappingAccessed {
                        schema_version: 1,
                        session_id: SessionId(session_id.to_string()),
                        user_id: UserId(user_id.to_string()),
                        kind: entry.kind,
                        pseudonym: token.clone(),
                        ts: now,
                    }))?;
                    replacements.insert(token, original);
                }
                Err(e) => {
                    audit.append(AuditEvent::MappingDecryptionError(MappingDecryptionError {
                        schema_version: 1,
                        session_id: SessionId(session_id.to_string()),
                        user_id: UserId(user_id.to_string()),
                        kind: entry.kind,
                        ts: now,
                        error: e.to_string(),
                    }))?;
                    return Err(e);
                }
            }
        }
        self.write_index(&idx)?;

        let mut out = text.to_string();
        for (token, original) in &replacements {
            out = out.replace(token.as_str(), original.as_str());
        }
        Ok(out)
    }

    /// Bulk-deletes mappings with `expires_at <= now` from the live
    /// index (the historical `pseudonyms.jsonl` ledger is untouched).
    /// Emits one `mapping_cleanup` audit event with the removed count.
    pub fn cleanup_expired(&self, now: f64, audit: &mut AuditAppender) -> Result<u64, PseudonymError> {
        let mut idx = self.load_index()?;
        let before = idx.entries.len();
        idx.entries.retain(|e| e.state(now) != MappingState::Expired);
        let removed = (before - idx.entries.len()) as u64;
        self.write_index(&idx)?;
        audit.append(AuditEvent::MappingCleanup(MappingCleanup { schema_version: 1, ts: now, removed_count: removed }))?;
        Ok(removed)
    }
}

fn audit_path(dir: &Path) -> PathBuf {
    dir.join("audit.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditroute_schema::AuditRecord;
    use tempfile::TempDir;

    fn appender(dir: &Path) -> AuditAppender {
        AuditAppender::open(audit_path(dir)).unwrap()
    }

    fn pz(dir: &Path) -> Pseudonymizer {
        Pseudonymizer::new(dir.join("mappings"), &[7u8; 32], 30.0).unwrap()
    }

    fn record(id: &str, descriptions: &str) -> AuditRecord {
        AuditRecord {
            id: id.into(),
            year: "2024".into(),
            subholding: "SH1".into(),
            project_name: "Project".into(),
            project_id: "P1".into(),
            department: "IT".into(),
            risk_area: "ops".into(),
            descriptions: descriptions.into(),
            code: "F-1".into(),
            bobot: 3.0,
            kadar: 3.0,
            created_at: 0.0,
            updated_at: 0.0,
            embedding: None,
        }
    }

    #[test]
    fn secret_shorter_than_32_bytes_is_rejected() {
        let err = Pseudonymizer::new("/tmp/whatever", &[1u8; 16], 30.0);
        assert!(matches!(err, Err(PseudonymError::InvalidSecret(16))));
    }

    #[test]
    fn same_original_same_session_yields_same_pseudonym() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());

        let records = vec![record("1", "auditor John Smith reviewed the finding")];
        let first = pz.pseudonymize_records(&records, "s1", "u1", 1.0, &mut audit).unwrap();
        let second = pz.pseudonymize_records(&records, "s1", "u1", 2.0, &mut audit).unwrap();

        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        assert_eq!(first.records[0].descriptions, second.records[0].descriptions);
        assert!(first.records[0].descriptions.contains("Person_A"));
    }

    #[test]
    fn distinct_sessions_get_distinct_ciphertexts() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());

        let records = vec![record("1", "auditor John Smith reviewed the finding")];
        pz.pseudonymize_records(&records, "s1", "u1", 1.0, &mut audit).unwrap();
        pz.pseudonymize_records(&records, "s2", "u1", 1.0, &mut audit).unwrap();

        let idx = pz.load_index().unwrap();
        let c1 = &idx.entries.iter().find(|e| e.session_id == "s1").unwrap().original_ciphertext;
        let c2 = &idx.entries.iter().find(|e| e.session_id == "s2").unwrap().original_ciphertext;
        assert_ne!(c1, c2);
    }

    #[test]
    fn pseudonymize_then_depseudonymize_roundtrips() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());

        let records = vec![record("1", "auditor John Smith reviewed the finding")];
        let out = pz.pseudonymize_records(&records, "s1", "u1", 1.0, &mut audit).unwrap();
        assert!(!out.records[0].descriptions.contains("John Smith"));

        let answer = format!("per the record, {} confirmed compliance", "Person_A");
        let restored = pz.depseudonymize(&answer, "s1", "u1", 2.0, &mut audit).unwrap();
        assert!(restored.contains("John Smith"));
    }

    #[test]
    fn depseudonymize_on_unknown_session_is_fatal() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());
        let result = pz.depseudonymize("Person_A said hello", "ghost-session", "u1", 1.0, &mut audit);
        assert!(matches!(result, Err(PseudonymError::UnknownSession(_))));
    }

    #[test]
    fn pseudonyms_allocate_densely_per_kind() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());

        let records = vec![record("1", "Jane Doe and John Smith and Amy Lee attended")];
        let out = pz.pseudonymize_records(&records, "s1", "u1", 1.0, &mut audit).unwrap();
        assert_eq!(out.created, 3);
        for label in ["Person_A", "Person_B", "Person_C"] {
            assert!(out.records[0].descriptions.contains(label));
        }
    }

    #[test]
    fn cleanup_expired_removes_past_expiry_rows() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());

        let records = vec![record("1", "auditor John Smith reviewed the finding")];
        pz.pseudonymize_records(&records, "s1", "u1", 1.0, &mut audit).unwrap();

        let far_future = 1.0 + DEFAULT_SESSION_TTL_DAYS * SECONDS_PER_DAY + 10.0;
        let removed = pz.cleanup_expired(far_future, &mut audit).unwrap();
        assert_eq!(removed, 1);
        assert!(pz.load_index().unwrap().entries.is_empty());
    }

    #[test]
    fn monetary_amount_is_pseudonymized_with_numeric_label() {
        let td = TempDir::new().unwrap();
        let pz = pz(td.path());
        let mut audit = appender(td.path());

        let records = vec![record("1", "the contract value was Rp 150.000.000 in total")];
        let out = pz.pseudonymize_records(&records, "s1", "u1", 1.0, &mut audit).unwrap();
        assert!(out.records[0].descriptions.contains("Amount_001"));
    }
}
