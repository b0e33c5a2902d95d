//! auditroute_masker
//!
//! C1: hide PII in free text before it leaves the process toward an LLM;
//! restore it on the way back. Purely local — no I/O, no persistence.
//! Tokens are request-scoped and discarded by the caller once the
//! request completes.
//!
//! Deterministic, regex-driven detection, grounded on the
//! `other_examples` redaction-middleware idiom of lazily-compiled
//! detectors (`OnceLock`) and on `pie_redaction`'s "replace sensitive
//! spans with a stable placeholder, keep a transform log" shape — here
//! the placeholder is `[KIND_N]` and the "transform log" is the token
//! list the caller gets back.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Email,
    Phone,
    Id,
    Name,
}

impl TokenKind {
    fn label(&self) -> &'static str {
        match self {
            TokenKind::Email => "EMAIL",
            TokenKind::Phone => "PHONE",
            TokenKind::Id => "ID",
            TokenKind::Name => "NAME",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskingToken {
    pub token: String,
    pub original: String,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskResult {
    pub masked_text: String,
    pub tokens: Vec<MaskingToken>,
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b").unwrap()
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\+\d{1,3}[-\s]?)?(?:\(0\d{1,4}\)|0\d{1,4})[-\s]?\d{3,4}[-\s]?\d{3,4}\b")
            .unwrap()
    })
}

/// 9+ consecutive digits not already claimed as a phone number (e.g. NIK/KTP).
fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{9,20}\b").unwrap())
}

/// Two-to-four capitalized word spans, a deliberately coarse "looks like
/// a proper name" heuristic covering obvious proper-name patterns only.
fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-z]+(?:\.)?(?:\s+[A-Z][a-z]+(?:\.)?){1,3}\b").unwrap()
    })
}

/// Recognizes an already-emitted placeholder, e.g. `[EMAIL_1]`.
fn existing_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(?:EMAIL|PHONE|ID|NAME)_\d+\]").unwrap())
}

struct Claim {
    start: usize,
    end: usize,
    kind: TokenKind,
}

/// Replace PII patterns in `text` with stable `[KIND_N]` placeholders.
/// Identical substrings within one call collapse to the same token.
/// Idempotent: spans that already look like `[KIND_N]` are left alone.
pub fn mask(text: &str) -> MaskResult {
    let mut claimed = vec![false; text.len()];
    let mut claims: Vec<Claim> = Vec::new();

    for m in existing_token_re().find_iter(text) {
        for b in &mut claimed[m.start()..m.end()] {
            *b = true;
        }
    }

    // Priority order matters: email before phone/id (an email can contain
    // digit runs), phone before the generic id fallback, name last (the
    // coarsest heuristic).
    let passes: [(TokenKind, &Regex); 4] = [
        (TokenKind::Email, email_re()),
        (TokenKind::Phone, phone_re()),
        (TokenKind::Id, id_re()),
        (TokenKind::Name, name_re()),
    ];

    for (kind, re) in passes {
        for m in re.find_iter(text) {
            if claimed[m.start()..m.end()].iter().any(|&b| b) {
                continue;
            }
            for b in &mut claimed[m.start()..m.end()] {
                *b = true;
            }
            claims.push(Claim {
                start: m.start(),
                end: m.end(),
                kind,
            });
        }
    }

    claims.sort_by_key(|c| c.start);

    let mut out = String::with_capacity(text.len());
    let mut tokens: Vec<MaskingToken> = Vec::new();
    let mut seen: HashMap<(TokenKind, &str), String> = HashMap::new();
    let mut counters: HashMap<TokenKind, u32> = HashMap::new();
    let mut cursor = 0usize;

    for claim in &claims {
        out.push_str(&text[cursor..claim.start]);
        let original = &text[claim.start..claim.end];
        let key = (claim.kind, original);
        let token_str = if let Some(existing) = seen.get(&key) {
            existing.clone()
        } else {
            let n = counters.entry(claim.kind).or_insert(0);
            *n += 1;
            let t = format!("[{}_{}]", claim.kind.label(), n);
            seen.insert(key, t.clone());
            tokens.push(MaskingToken {
                token: t.clone(),
                original: original.to_string(),
                kind: claim.kind,
            });
            t
        };
        out.push_str(&token_str);
        cursor = claim.end;
    }
    out.push_str(&text[cursor..]);

    MaskResult {
        masked_text: out,
        tokens,
    }
}

/// Literal substitution of placeholders back to originals. Unknown
/// placeholders are left intact.
pub fn unmask(text: &str, tokens: &[MaskingToken]) -> String {
    let mut out = text.to_string();
    for t in tokens {
        out = out.replace(&t.token, &t.original);
    }
    out
}

pub fn contains_sensitive(text: &str) -> bool {
    email_re().is_match(text)
        || phone_re().is_match(text)
        || id_re().is_match(text)
        || name_re().is_match(text)
}
