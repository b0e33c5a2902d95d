//! auditroute_audit_spec
//!
//! Strongly-typed audit events for the query-routing pipeline and the
//! session pseudonym store.
//!
//! Actions mirror the external audit-log sink contract:
//! `mapping_create`, `mapping_access`, `mapping_cleanup`,
//! `mapping_decryption_error`, `query`, `query_failure`.
//! NOTE: schema_version increments are per-event, not global.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Simple,
    Complex,
    Hybrid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PseudonymKind {
    Person,
    Id,
    Amount,
}

impl PseudonymKind {
    /// Stable prefix used for allocated pseudonyms, e.g. "Person_A".
    pub fn label(&self) -> &'static str {
        match self {
            PseudonymKind::Person => "Person",
            PseudonymKind::Id => "ID",
            PseudonymKind::Amount => "Amount",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecuted {
    pub schema_version: u8,
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub ts: f64,
    pub route: RouteType,
    pub findings_analyzed: u64,
    pub execution_time_ms: u64,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFailed {
    pub schema_version: u8,
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub ts: f64,
    pub error_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingCreated {
    pub schema_version: u8,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub kind: PseudonymKind,
    pub pseudonym: String,
    pub ts: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingAccessed {
    pub schema_version: u8,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub kind: PseudonymKind,
    pub pseudonym: String,
    pub ts: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingCleanup {
    pub schema_version: u8,
    pub ts: f64,
    pub removed_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDecryptionError {
    pub schema_version: u8,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub kind: PseudonymKind,
    pub ts: f64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    Query(QueryExecuted),
    QueryFailure(QueryFailed),
    MappingCreate(MappingCreated),
    MappingAccess(MappingAccessed),
    MappingCleanup(MappingCleanup),
    MappingDecryptionError(MappingDecryptionError),
}

impl AuditEvent {
    /// The stable action name as it would appear in an external audit sink.
    pub fn action(&self) -> &'static str {
        match self {
            AuditEvent::Query(_) => "query",
            AuditEvent::QueryFailure(_) => "query_failure",
            AuditEvent::MappingCreate(_) => "mapping_create",
            AuditEvent::MappingAccess(_) => "mapping_access",
            AuditEvent::MappingCleanup(_) => "mapping_cleanup",
            AuditEvent::MappingDecryptionError(_) => "mapping_decryption_error",
        }
    }
}
