//! auditroute_router
//!
//! C9: the single entry point, `process_query`, that wires C1-C8 into the
//! six-step pipeline and turns the result into one of the response shapes
//! external callers see. Owns the simple/complex/hybrid routing decision,
//! the error taxonomy, and the graceful-degradation rules.
//!
//! Orchestration shape (dispatch one pipeline, write artifacts, emit
//! exactly one audit event, return a single typed outcome) is grounded on
//! `pie_control_cli`'s command dispatch plus `pie_redaction`'s
//! "compute, write artifacts, emit audit, return" contract for
//! `redact_and_audit`.

use auditroute_audit_log::AuditAppender;
use auditroute_audit_spec::{AuditEvent, QueryExecuted, QueryFailed, RequestId, RouteType, SessionId, UserId};
use auditroute_context::Strategy;
use auditroute_department_index::DepartmentIndex;
use auditroute_providers::{ChatMsg, ChatRequest, Provider};
use auditroute_pseudonymizer::{PseudonymError, Pseudonymizer};
use auditroute_schema::{AuditRecord, Filters, RecognizedIntent};
use auditroute_store::DocumentStore;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const GENERATIVE_TIMEOUT: Duration = Duration::from_secs(30);
const ALLOWED_THINKING_MODES: &[&str] = &["standard", "deep"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AiError,
    StorageError,
    ClassificationError,
    PseudonymError,
    ValidationError,
    PermissionError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AiError => "AI_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::ClassificationError => "CLASSIFICATION_ERROR",
            ErrorCode::PseudonymError => "PSEUDONYM_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::PermissionError => "PERMISSION_ERROR",
        }
    }
}

/// `{success:false, error:{code, message, suggestion, fallbackData?}}` of
/// spec section 6, minus the `success` discriminant (the `Result` itself
/// carries that for the Rust API; `auditroute_cli` adds it back for JSON
/// output).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RouterError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: String,
    pub fallback_data: Option<Vec<AuditRecord>>,
}

impl RouterError {
    fn new(code: ErrorCode, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self { code, message: message.into(), suggestion: suggestion.into(), fallback_data: None }
    }

    fn with_fallback(mut self, records: Vec<AuditRecord>) -> Self {
        self.fallback_data = Some(records);
        self
    }
}

fn audit_err(e: auditroute_audit_log::AuditLogError) -> RouterError {
    RouterError::new(ErrorCode::StorageError, format!("audit log write failed: {e}"), "retry the request shortly")
}

fn store_err(e: auditroute_store::StoreError) -> RouterError {
    match e {
        auditroute_store::StoreError::Unavailable(msg) => {
            RouterError::new(ErrorCode::StorageError, format!("document store unavailable: {msg}"), "retry shortly")
        }
        auditroute_store::StoreError::PermissionDenied(msg) => {
            RouterError::new(ErrorCode::PermissionError, format!("store permission denied: {msg}"), "check your access rights")
        }
        auditroute_store::StoreError::Schema(msg) => {
            RouterError::new(ErrorCode::StorageError, format!("document store schema error: {msg}"), "contact support")
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessQueryOptions {
    pub session_id: String,
    pub user_id: String,
    pub thinking_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    #[serde(rename = "type")]
    pub route: RouteType,
    pub execution_time_ms: u64,
    pub findings_analyzed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    pub recognized_intent: RecognizedIntent,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    #[serde(rename = "type")]
    pub route: RouteType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<AuditRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub recognized_intent: RecognizedIntent,
    pub metadata: ResponseMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `filters.is_empty()` splits into: truly empty, "broad" (only a year
/// narrows the set), and "specific" (department, project, severity, a
/// nilai bound, or keywords narrow it). Drives the step-4 route choice.
fn filters_are_specific(filters: &Filters) -> bool {
    filters.department.is_some()
        || filters.project_name.is_some()
        || !filters.severity.is_empty()
        || !filters.keywords.is_empty()
        || filters.min_nilai.is_some()
        || filters.max_nilai.is_some()
        || filters.subholding.is_some()
}

fn choose_route(intent: &RecognizedIntent) -> Result<RouteType, RouterError> {
    let empty = intent.filters.is_empty();
    if empty && !intent.requires_analysis {
        return Err(RouterError::new(
            ErrorCode::ClassificationError,
            "the query could not be interpreted by either the language model or the pattern extractor",
            "please rephrase your question with more specific terms",
        ));
    }
    if !intent.requires_analysis && !empty {
        return Ok(RouteType::Simple);
    }
    if intent.requires_analysis && (empty || !filters_are_specific(&intent.filters)) {
        return Ok(RouteType::Complex);
    }
    Ok(RouteType::Hybrid)
}

fn unmask_record(record: &AuditRecord, tokens: &[auditroute_masker::MaskingToken]) -> AuditRecord {
    let mut r = record.clone();
    r.project_name = auditroute_masker::unmask(&r.project_name, tokens);
    r.descriptions = auditroute_masker::unmask(&r.descriptions, tokens);
    r.risk_area = auditroute_masker::unmask(&r.risk_area, tokens);
    r
}

fn build_generative_system_brief(context: &[AuditRecord]) -> String {
    let records_json = serde_json::to_string(context).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are an audit-findings analyst. Use only the records below to answer; \
         do not invent data not present in them. Records: {records_json}"
    )
}

pub struct Router<'a> {
    pub dept_index: &'a DepartmentIndex,
    pub store: &'a dyn DocumentStore,
    pub intent_provider: Option<&'a dyn Provider>,
    pub intent_model: String,
    pub generative_provider: Option<&'a dyn Provider>,
    pub generative_model: String,
    pub pseudonymizer: &'a Pseudonymizer,
    pub context_strategy: Strategy,
    pub token_budget: usize,
    pub page_size: usize,
}

impl<'a> Router<'a> {
    /// Runs the full six-step pipeline and appends exactly one `query`
    /// or `query_failure` audit event, regardless of which branch below
    /// is taken (spec invariant 6).
    pub async fn process_query(
        &self,
        user_query: &str,
        options: &ProcessQueryOptions,
        now: f64,
        audit: &mut AuditAppender,
    ) -> Result<QueryOutcome, RouterError> {
        let request_id = RequestId(Uuid::new_v4());
        let started = Instant::now();

        if let Some(mode) = &options.thinking_mode {
            if !ALLOWED_THINKING_MODES.contains(&mode.as_str()) {
                let err = RouterError::new(
                    ErrorCode::ValidationError,
                    format!("unrecognized thinking_mode '{mode}'"),
                    format!("use one of: {}", ALLOWED_THINKING_MODES.join(", ")),
                );
                self.record_failure(&request_id, options, now, &err, audit)?;
                return Err(err);
            }
        }
        if options.session_id.trim().is_empty() || options.user_id.trim().is_empty() {
            let err = RouterError::new(
                ErrorCode::ValidationError,
                "session_id and user_id are both required",
                "supply a non-empty session_id and user_id",
            );
            self.record_failure(&request_id, options, now, &err, audit)?;
            return Err(err);
        }

        let result = self.run_pipeline(user_query, options, now, audit).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut outcome) => {
                outcome.metadata.execution_time_ms = elapsed_ms;
                audit
                    .append(AuditEvent::Query(QueryExecuted {
                        schema_version: 1,
                        request_id,
                        session_id: SessionId(options.session_id.clone()),
                        user_id: UserId(options.user_id.clone()),
                        ts: now,
                        route: outcome.route,
                        findings_analyzed: outcome.metadata.findings_analyzed,
                        execution_time_ms: elapsed_ms,
                        degraded: outcome.metadata.degraded,
                    }))
                    .map_err(audit_err)?;
                Ok(outcome)
            }
            Err(err) => {
                self.record_failure(&request_id, options, now, &err, audit)?;
                Err(err)
            }
        }
    }

    fn record_failure(
        &self,
        request_id: &RequestId,
        options: &ProcessQueryOptions,
        now: f64,
        err: &RouterError,
        audit: &mut AuditAppender,
    ) -> Result<(), RouterError> {
        audit
            .append(AuditEvent::QueryFailure(QueryFailed {
                schema_version: 1,
                request_id: request_id.clone(),
                session_id: SessionId(options.session_id.clone()),
                user_id: UserId(options.user_id.clone()),
                ts: now,
                error_code: err.code.as_str().to_string(),
                message: err.message.clone(),
            }))
            .map_err(audit_err)?;
        Ok(())
    }

    async fn run_pipeline(
        &self,
        user_query: &str,
        options: &ProcessQueryOptions,
        now: f64,
        audit: &mut AuditAppender,
    ) -> Result<QueryOutcome, RouterError> {
        // Step 1
        let masked = auditroute_masker::mask(user_query);

        // Step 2
        let llm_intent =
            auditroute_intent::recognize(&masked.masked_text, self.intent_provider, &self.intent_model, self.dept_index)
                .await;
        let pattern_intent = auditroute_intent::extract(&masked.masked_text, self.dept_index);
        let mut intent = auditroute_intent::merge_intents(llm_intent, pattern_intent);

        // The intent crate folds an unreachable/timed-out LLM tier silently
        // into its pattern-tier fallback, so this router has no direct
        // signal for "the LLM tier actually ran". Low merged confidence is
        // the closest observable proxy and is what drives `degraded` here.
        let degraded_intent = intent.confidence < 0.5;

        // Step 3
        if let Some(fragment) = intent.filters.department.clone() {
            intent.filters.department_raw_names = self.dept_index.original_names_for(&fragment);
        }

        // Step 4
        let route = choose_route(&intent)?;

        match route {
            RouteType::Simple => self.run_simple(&intent, &masked.tokens, degraded_intent).await,
            RouteType::Complex | RouteType::Hybrid => {
                self.run_complex_or_hybrid(route, &intent, &masked, options, now, degraded_intent, audit).await
            }
        }
    }

    async fn run_simple(
        &self,
        intent: &RecognizedIntent,
        tokens: &[auditroute_masker::MaskingToken],
        degraded: bool,
    ) -> Result<QueryOutcome, RouterError> {
        let records = auditroute_store::execute_query(self.store, &intent.filters, Some(self.page_size))
            .await
            .map_err(store_err)?;
        let unmasked: Vec<AuditRecord> = records.iter().map(|r| unmask_record(r, tokens)).collect();
        let findings_analyzed = unmasked.len() as u64;

        Ok(QueryOutcome {
            route: RouteType::Simple,
            records: unmasked,
            answer: None,
            recognized_intent: intent.clone(),
            metadata: ResponseMetadata {
                route: RouteType::Simple,
                execution_time_ms: 0,
                findings_analyzed,
                tokens_used: None,
                recognized_intent: intent.clone(),
                degraded,
            },
            warning: None,
        })
    }

    async fn run_complex_or_hybrid(
        &self,
        route: RouteType,
        intent: &RecognizedIntent,
        masked: &auditroute_masker::MaskResult,
        options: &ProcessQueryOptions,
        now: f64,
        degraded_intent: bool,
        audit: &mut AuditAppender,
    ) -> Result<QueryOutcome, RouterError> {
        let candidates = auditroute_store::execute_query(self.store, &intent.filters, Some(self.page_size))
            .await
            .map_err(store_err)?;
        let unmasked_candidates: Vec<AuditRecord> = candidates.iter().map(|r| unmask_record(r, &masked.tokens)).collect();

        let context = auditroute_context::build(&candidates, intent, self.context_strategy, None, self.token_budget);

        let pseudonymized = match self.pseudonymizer.pseudonymize_records(
            &context,
            &options.session_id,
            &options.user_id,
            now,
            audit,
        ) {
            Ok(outcome) => outcome,
            Err(_) => {
                // Pseudonymization unavailable: refuse the complex/hybrid
                // path and downgrade to a simple-shaped response.
                return Ok(QueryOutcome {
                    route: RouteType::Simple,
                    metadata: ResponseMetadata {
                        route: RouteType::Simple,
                        execution_time_ms: 0,
                        findings_analyzed: context.len() as u64,
                        tokens_used: None,
                        recognized_intent: intent.clone(),
                        degraded: true,
                    },
                    records: unmasked_candidates,
                    answer: None,
                    recognized_intent: intent.clone(),
                    warning: Some(
                        "pseudonymization is unavailable; returning matching records without analysis".to_string(),
                    ),
                });
            }
        };

        let generative_answer = self.call_generative(&masked.masked_text, &pseudonymized.records).await;

        let (answer, warning, tokens_used) = match generative_answer {
            Some((reply, tokens_used)) => {
                let depseudonymized = self
                    .pseudonymizer
                    .depseudonymize(&reply, &options.session_id, &options.user_id, now, audit)
                    .map_err(|e| pseudonym_err(e, unmasked_candidates.clone()))?;
                let final_answer = auditroute_masker::unmask(&depseudonymized, &masked.tokens);
                (Some(final_answer), None, tokens_used)
            }
            None => (None, Some("the generative model is unavailable; returning matching records without analysis".to_string()), None),
        };

        Ok(QueryOutcome {
            route,
            records: unmasked_candidates.clone(),
            answer,
            recognized_intent: intent.clone(),
            metadata: ResponseMetadata {
                route,
                execution_time_ms: 0,
                findings_analyzed: context.len() as u64,
                tokens_used,
                recognized_intent: intent.clone(),
                degraded: degraded_intent || warning.is_some(),
            },
            warning,
        })
    }

    /// Dispatches the generative call with a 30s timeout. `None` on any
    /// failure (no provider, timeout, transport error) — the caller
    /// degrades gracefully rather than treating this as fatal (spec
    /// section 4.9's step-6 degradation rule).
    async fn call_generative(&self, masked_query: &str, pseudo_records: &[AuditRecord]) -> Option<(String, Option<u64>)> {
        let provider = self.generative_provider?;
        let req = ChatRequest {
            model: self.generative_model.clone(),
            messages: vec![
                ChatMsg { role: "system".into(), content: build_generative_system_brief(pseudo_records) },
                ChatMsg { role: "user".into(), content: masked_query.to_string() },
            ],
            max_output_tokens: 1024,
            temperature: 0.2,
            top_p: 1.0,
            stop: vec![],
        };
        let dispatched = tokio::time::timeout(GENERATIVE_TIMEOUT, provider.dispatch(&req)).await;
        match dispatched {
            Ok(Ok(resp)) => {
                let tokens = resp.normalized.usage.output_tokens;
                Some((resp.normalized.content, tokens))
            }
            _ => None,
        }
    }
}

fn pseudonym_err(e: PseudonymError, fallback: Vec<AuditRecord>) -> RouterError {
    RouterError::new(ErrorCode::PseudonymError, format!("depseudonymization failed: {e}"), "retry the request")
        .with_fallback(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auditroute_providers::{ProviderError, ProviderReply, ProviderResponse, Usage};
    use auditroute_schema::AuditRecord;
    use auditroute_store::InMemoryStore;
    use std::path::Path;
    use tempfile::TempDir;

    fn record(id: &str, department: &str, year: &str, bobot: f64, kadar: f64, code: &str) -> AuditRecord {
        AuditRecord {
            id: id.into(),
            year: year.into(),
            subholding: "SH1".into(),
            project_name: "Project Alpha".into(),
            project_id: "P1".into(),
            department: department.into(),
            risk_area: "ops".into(),
            descriptions: "a routine finding".into(),
            code: code.into(),
            bobot,
            kadar,
            created_at: 0.0,
            updated_at: 0.0,
            embedding: None,
        }
    }

    fn appender(dir: &Path) -> AuditAppender {
        AuditAppender::open(dir.join("audit.jsonl")).unwrap()
    }

    fn pz(dir: &Path) -> Pseudonymizer {
        Pseudonymizer::new(dir.join("mappings"), &[3u8; 32], 30.0).unwrap()
    }

    struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        async fn dispatch(&self, _req: &ChatRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                raw_json: serde_json::json!({}),
                normalized: ProviderReply {
                    content: "Per the records, Person_A confirmed the finding.".to_string(),
                    finish_reason: Some("stop".to_string()),
                    usage: Usage { input_tokens: Some(10), output_tokens: Some(5) },
                    provider_request_id: None,
                },
            })
        }
    }

    fn options(session: &str) -> ProcessQueryOptions {
        ProcessQueryOptions { session_id: session.into(), user_id: "u1".into(), thinking_mode: None }
    }

    #[tokio::test]
    async fn unrecognized_thinking_mode_is_rejected() {
        let td = TempDir::new().unwrap();
        let store = InMemoryStore::new(vec![record("1", "IT", "2024", 5.0, 5.0, "F-1")]);
        let dept_index = DepartmentIndex::new();
        let pseudonymizer = pz(td.path());
        let router = Router {
            dept_index: &dept_index,
            store: &store,
            intent_provider: None,
            intent_model: "intent-model".into(),
            generative_provider: None,
            generative_model: "gen-model".into(),
            pseudonymizer: &pseudonymizer,
            context_strategy: Strategy::Keyword,
            token_budget: 10_000,
            page_size: 50,
        };
        let mut audit = appender(td.path());
        let mut opts = options("s1");
        opts.thinking_mode = Some("bogus".into());

        let err = router.process_query("critical findings 2024", &opts, 1.0, &mut audit).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn unroutable_query_is_classification_error() {
        let td = TempDir::new().unwrap();
        let store = InMemoryStore::new(vec![]);
        let dept_index = DepartmentIndex::new();
        let pseudonymizer = pz(td.path());
        let router = Router {
            dept_index: &dept_index,
            store: &store,
            intent_provider: None,
            intent_model: "intent-model".into(),
            generative_provider: None,
            generative_model: "gen-model".into(),
            pseudonymizer: &pseudonymizer,
            context_strategy: Strategy::Keyword,
            token_budget: 10_000,
            page_size: 50,
        };
        let mut audit = appender(td.path());

        let err = router.process_query("   ", &options("s1"), 1.0, &mut audit).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ClassificationError);
    }

    #[tokio::test]
    async fn simple_route_returns_records_sorted_by_nilai() {
        let td = TempDir::new().unwrap();
        let store = InMemoryStore::new(vec![
            record("1", "IT", "2024", 5.0, 4.0, "F-1"),
            record("2", "IT", "2024", 1.0, 1.0, "F-2"),
        ]);
        let dept_index = DepartmentIndex::new();
        let pseudonymizer = pz(td.path());
        let router = Router {
            dept_index: &dept_index,
            store: &store,
            intent_provider: None,
            intent_model: "intent-model".into(),
            generative_provider: None,
            generative_model: "gen-model".into(),
            pseudonymizer: &pseudonymizer,
            context_strategy: Strategy::Keyword,
            token_budget: 10_000,
            page_size: 50,
        };
        let mut audit = appender(td.path());

        let outcome = router
            .process_query("show me all 2024", &options("s1"), 1.0, &mut audit)
            .await
            .unwrap();
        assert_eq!(outcome.route, RouteType::Simple);
        assert_eq!(outcome.records[0].id, "1");
    }

    #[tokio::test]
    async fn complex_route_runs_generative_step_and_depseudonymizes() {
        let td = TempDir::new().unwrap();
        let mut r = record("1", "IT", "2024", 5.0, 4.0, "F-1");
        r.descriptions = "auditor John Smith reviewed the contract".to_string();
        let store = InMemoryStore::new(vec![r]);
        let dept_index = DepartmentIndex::new();
        let pseudonymizer = pz(td.path());
        let provider = NullProvider;
        let router = Router {
            dept_index: &dept_index,
            store: &store,
            intent_provider: None,
            intent_model: "intent-model".into(),
            generative_provider: Some(&provider),
            generative_model: "gen-model".into(),
            pseudonymizer: &pseudonymizer,
            context_strategy: Strategy::Keyword,
            token_budget: 10_000,
            page_size: 50,
        };
        let mut audit = appender(td.path());

        let outcome = router
            .process_query("why did IT findings increase in 2024", &options("s1"), 1.0, &mut audit)
            .await
            .unwrap();
        assert!(matches!(outcome.route, RouteType::Complex | RouteType::Hybrid));
        let answer = outcome.answer.expect("generative step should have produced an answer");
        assert!(answer.contains("John Smith"));
    }

    #[tokio::test]
    async fn missing_generative_provider_degrades_with_warning() {
        let td = TempDir::new().unwrap();
        let store = InMemoryStore::new(vec![record("1", "IT", "2024", 5.0, 4.0, "F-1")]);
        let dept_index = DepartmentIndex::new();
        let pseudonymizer = pz(td.path());
        let router = Router {
            dept_index: &dept_index,
            store: &store,
            intent_provider: None,
            intent_model: "intent-model".into(),
            generative_provider: None,
            generative_model: "gen-model".into(),
            pseudonymizer: &pseudonymizer,
            context_strategy: Strategy::Keyword,
            token_budget: 10_000,
            page_size: 50,
        };
        let mut audit = appender(td.path());

        let outcome = router
            .process_query("why did IT findings increase in 2024", &options("s1"), 1.0, &mut audit)
            .await
            .unwrap();
        assert!(outcome.answer.is_none());
        assert!(outcome.warning.is_some());
        assert!(outcome.metadata.degraded);
    }

    #[test]
    fn error_code_strings_match_the_taxonomy() {
        assert_eq!(ErrorCode::AiError.as_str(), "AI_ERROR");
        assert_eq!(ErrorCode::StorageError.as_str(), "STORAGE_ERROR");
        assert_eq!(ErrorCode::ClassificationError.as_str(), "CLASSIFICATION_ERROR");
        assert_eq!(ErrorCode::PseudonymError.as_str(), "PSEUDONYM_ERROR");
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::PermissionError.as_str(), "PERMISSION_ERROR");
    }
}
