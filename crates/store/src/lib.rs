//! auditroute_store
//!
//! C6 QueryExecutor: translates a normalized filter set into document
//! store queries, fans out department filters over every raw name,
//! merges/sorts/limits the result, and retries transient storage
//! failures.
//!
//! `DocumentStore` + `InMemoryStore` are grounded on
//! `pie_episodes::EpisodeStore`'s "load once, deterministic query/sort"
//! shape, minus the JSONL/index split — this store is a reference
//! implementation, not a wrapper over a specific external database.

use auditroute_department_index::DepartmentIndex;
use auditroute_schema::{AuditRecord, Filters, SortDirection, SortField};
use std::cmp::Ordering;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("schema error: {0}")]
    Schema(String),
}

impl StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Str(String),
    F64(f64),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(&'static str, FieldValue),
    Ne(&'static str, FieldValue),
    Lt(&'static str, FieldValue),
    Le(&'static str, FieldValue),
    Gt(&'static str, FieldValue),
    Ge(&'static str, FieldValue),
    In(&'static str, Vec<FieldValue>),
    NotIn(&'static str, Vec<FieldValue>),
}

#[derive(Debug, Clone, Copy)]
pub struct OrderKey {
    pub field: SortField,
    pub direction: SortDirection,
}

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

fn field_str(record: &AuditRecord, field: &str) -> Option<String> {
    Some(match field {
        "id" => record.id.clone(),
        "year" => record.year.clone(),
        "subholding" => record.subholding.clone(),
        "project_name" => record.project_name.clone(),
        "project_id" => record.project_id.clone(),
        "department" => record.department.clone(),
        "risk_area" => record.risk_area.clone(),
        "descriptions" => record.descriptions.clone(),
        "code" => record.code.clone(),
        _ => return None,
    })
}

fn field_f64(record: &AuditRecord, field: &str) -> Option<f64> {
    match field {
        "bobot" => Some(record.bobot),
        "kadar" => Some(record.kadar),
        "nilai" => Some(record.nilai()),
        "created_at" => Some(record.created_at),
        "updated_at" => Some(record.updated_at),
        _ => None,
    }
}

fn matches_predicate(record: &AuditRecord, pred: &Predicate) -> bool {
    match pred {
        Predicate::Eq(f, v) => cmp_eq(record, f, v),
        Predicate::Ne(f, v) => !cmp_eq(record, f, v),
        Predicate::Lt(f, v) => cmp_ord(record, f, v) == Some(Ordering::Less),
        Predicate::Le(f, v) => matches!(cmp_ord(record, f, v), Some(Ordering::Less) | Some(Ordering::Equal)),
        Predicate::Gt(f, v) => cmp_ord(record, f, v) == Some(Ordering::Greater),
        Predicate::Ge(f, v) => matches!(cmp_ord(record, f, v), Some(Ordering::Greater) | Some(Ordering::Equal)),
        Predicate::In(f, vs) => vs.iter().any(|v| cmp_eq(record, f, v)),
        Predicate::NotIn(f, vs) => !vs.iter().any(|v| cmp_eq(record, f, v)),
    }
}

fn cmp_eq(record: &AuditRecord, field: &str, v: &FieldValue) -> bool {
    match v {
        FieldValue::Str(s) => field_str(record, field).as_deref() == Some(s.as_str()),
        FieldValue::F64(n) => field_f64(record, field) == Some(*n),
        FieldValue::Bool(b) => matches!((field, b), ("is_finding", b) if record.is_finding() == *b),
    }
}

fn cmp_ord(record: &AuditRecord, field: &str, v: &FieldValue) -> Option<Ordering> {
    match v {
        FieldValue::F64(n) => field_f64(record, field).map(|x| x.partial_cmp(n).unwrap_or(Ordering::Equal)),
        FieldValue::Str(s) => field_str(record, field).map(|x| x.as_str().cmp(s.as_str())),
        FieldValue::Bool(_) => None,
    }
}

pub trait DocumentStore: Send + Sync {
    fn query(
        &self,
        predicates: &[Predicate],
        order: &[OrderKey],
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError>;
}

/// In-memory reference store. Not a wrapper over an external database —
/// this is the authoritative store for this core, the same role
/// `pie_episodes::EpisodeStore` plays for episodic memory.
pub struct InMemoryStore {
    records: Vec<AuditRecord>,
}

impl InMemoryStore {
    pub fn new(records: Vec<AuditRecord>) -> Self {
        Self { records }
    }

    pub fn from_jsonl(bytes: &[u8]) -> Result<Self, StoreError> {
        let mut records = Vec::new();
        for line in bytes.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let r: AuditRecord = serde_json::from_slice(line)
                .map_err(|e| StoreError::Schema(e.to_string()))?;
            records.push(r);
        }
        Ok(Self { records })
    }
}

impl DocumentStore for InMemoryStore {
    fn query(
        &self,
        predicates: &[Predicate],
        order: &[OrderKey],
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let mut out: Vec<AuditRecord> = self
            .records
            .iter()
            .filter(|r| predicates.iter().all(|p| matches_predicate(r, p)))
            .cloned()
            .collect();

        out.sort_by(|a, b| {
            for key in order {
                let ord = match key.field {
                    SortField::Nilai => a.nilai().partial_cmp(&b.nilai()).unwrap_or(Ordering::Equal),
                    SortField::Year => a.year.cmp(&b.year),
                    SortField::CreatedAt => a.created_at.partial_cmp(&b.created_at).unwrap_or(Ordering::Equal),
                };
                let ord = match key.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });

        out.truncate(limit.min(MAX_PAGE_SIZE));
        Ok(out)
    }
}

/// Retries `StoreError::Unavailable` up to 3 attempts total with
/// 1s -> 10s exponential backoff. Permission/schema errors are fatal
/// and returned immediately.
pub async fn query_with_retry(
    store: &dyn DocumentStore,
    predicates: &[Predicate],
    order: &[OrderKey],
    limit: usize,
) -> Result<Vec<AuditRecord>, StoreError> {
    let mut backoff = Duration::from_secs(1);
    let mut attempt = 0;
    loop {
        match store.query(predicates, order, limit) {
            Ok(records) => return Ok(records),
            Err(e) if e.is_retryable() && attempt < 2 => {
                attempt += 1;
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(10));
            }
            Err(e) => return Err(e),
        }
    }
}

fn base_predicates(filters: &Filters) -> Vec<Predicate> {
    let mut preds = Vec::new();
    if let Some(y) = &filters.year {
        preds.push(Predicate::Eq("year", FieldValue::Str(y.clone())));
    }
    if let Some(sh) = &filters.subholding {
        preds.push(Predicate::Eq("subholding", FieldValue::Str(sh.clone())));
    }
    if let Some(p) = &filters.project_name {
        preds.push(Predicate::Eq("project_name", FieldValue::Str(p.clone())));
    }
    if let Some(min) = filters.min_nilai {
        preds.push(Predicate::Ge("nilai", FieldValue::F64(min)));
    }
    if let Some(max) = filters.max_nilai {
        preds.push(Predicate::Lt("nilai", FieldValue::F64(max)));
    }
    if let Some(finding_only) = filters.finding_only {
        if finding_only {
            preds.push(Predicate::Ne("code", FieldValue::Str(String::new())));
        } else {
            preds.push(Predicate::Eq("code", FieldValue::Str(String::new())));
        }
    }
    preds
}

fn default_order(filters: &Filters) -> Vec<OrderKey> {
    // An inequality on nilai forces nilai-first ordering regardless of
    // the finding-only default.
    if filters.min_nilai.is_some() || filters.max_nilai.is_some() {
        return vec![OrderKey { field: SortField::Nilai, direction: SortDirection::Desc }];
    }
    if filters.finding_only == Some(true) {
        vec![OrderKey { field: SortField::Nilai, direction: SortDirection::Desc }]
    } else {
        vec![OrderKey { field: SortField::Year, direction: SortDirection::Desc }]
    }
}

/// Executes a normalized filter set against the store.
///
/// Department filters are never pushed as a single equality on the raw
/// `department` field; `department_raw_names` (already expanded by the
/// router via C3) drives one query per raw name, merged as
/// `(sort key desc, id asc)` with duplicates eliminated by `id`.
pub async fn execute_query(
    store: &dyn DocumentStore,
    filters: &Filters,
    limit: Option<usize>,
) -> Result<Vec<AuditRecord>, StoreError> {
    let page_size = limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let order = default_order(filters);
    let base = base_predicates(filters);

    if filters.department_raw_names.is_empty() {
        return query_with_retry(store, &base, &order, page_size).await;
    }

    let mut merged: Vec<AuditRecord> = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for raw_name in &filters.department_raw_names {
        let mut preds = base.clone();
        preds.push(Predicate::Eq("department", FieldValue::Str(raw_name.clone())));
        let batch = query_with_retry(store, &preds, &order, page_size).await?;
        for r in batch {
            if seen.insert(r.id.clone()) {
                merged.push(r);
            }
        }
    }

    merged.sort_by(|a, b| {
        for key in &order {
            let ord = match key.field {
                SortField::Nilai => a.nilai().partial_cmp(&b.nilai()).unwrap_or(Ordering::Equal),
                SortField::Year => a.year.cmp(&b.year),
                SortField::CreatedAt => a.created_at.partial_cmp(&b.created_at).unwrap_or(Ordering::Equal),
            };
            let ord = match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    });
    merged.truncate(page_size);
    Ok(merged)
}
