//! auditroute_intent
//!
//! C4 IntentRecognizer + C5 FilterExtractor. Turns a masked natural
//! language query into a `RecognizedIntent`. Two tiers: an LLM call
//! (schema-constrained, 5s timeout) and a deterministic pattern tier
//! that always runs so the router has something to merge regardless of
//! LLM availability.
//!
//! Orchestration shape (compute request, dispatch, validate/patch
//! response) is grounded on `pie_redaction::RedactionEngine`'s two-stage
//! compute-then-patch pattern.

use auditroute_department_index::DepartmentIndex;
use auditroute_dictionary as dictionary;
use auditroute_providers::{ChatMsg, ChatRequest, Provider, ProviderError};
use auditroute_schema::{Filters, RecognizedIntent, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("llm response timed out")]
    Timeout,
    #[error("llm response was not valid json")]
    InvalidJson,
}

const INTENT_TIMEOUT: Duration = Duration::from_secs(5);

const TRIGGER_WORDS: &[&str] = &[
    "why", "analyze", "analyse", "recommend", "pattern", "trend", "summarize", "summarise", "compare",
    "mengapa", "analisis", "rekomendasi", "tren", "bandingkan", "ringkas",
];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "in", "on", "for", "to", "and", "or", "is", "are", "show", "me", "all", "find",
    "yang", "dan", "di", "ke", "dari", "untuk", "adalah", "itu", "ini", "pada", "atau",
];

/// Schema-shaped wire format the LLM tier is asked to emit. Unknown
/// fields are dropped at deserialization time (`serde`'s default
/// behavior); enum values are clamped in `from_wire`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IntentWire {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    subholding: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    severity: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    requires_analysis: bool,
    #[serde(default)]
    confidence: f64,
}

fn from_wire(w: IntentWire) -> RecognizedIntent {
    let mut filters = Filters::default();
    filters.year = w.year.filter(|y| auditroute_schema::is_valid_year(y));
    filters.department = w.department;
    filters.subholding = w.subholding;
    filters.project_name = w.project_name;
    filters.severity = w
        .severity
        .iter()
        .filter_map(|s| Severity::from_token(s))
        .collect();
    filters.keywords = w.keywords.into_iter().map(|k| k.to_lowercase()).collect();
    filters.apply_severity_ranges();

    RecognizedIntent {
        intent: w.intent,
        filters,
        requires_analysis: w.requires_analysis,
        confidence: w.confidence.clamp(0.0, 1.0),
    }
}

/// Builds the system brief: queryable fields, aliases/examples, enum
/// values, plus a note that C2 defines domain acronyms and that a
/// matched acronym should be added as a keyword with
/// `requires_analysis = true`.
fn build_schema_brief() -> String {
    let acronym_examples = dictionary::all_entries()
        .iter()
        .map(|e| format!("{} ({})", e.acronym, e.full_form))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You classify audit-findings queries. Respond with JSON matching: \
         {{intent, year, department, subholding, project_name, severity: one of \
         [critical, high, medium, low], keywords: [string], requires_analysis: bool, \
         confidence: number in [0,1]}}. year is always a 4-digit string. \
         Domain acronyms (expand and treat as a keyword, and set requires_analysis=true \
         whenever one appears): {acronym_examples}."
    )
}

fn build_user_message(masked_query: &str) -> String {
    format!("Query: {masked_query}")
}

/// Sends the masked query plus schema brief to the LLM tier with a 5s
/// timeout. Falls through to the pattern tier on timeout, transport
/// error, or an unparseable body — the caller never sees those as
/// fatal.
pub async fn recognize(
    masked_query: &str,
    provider: Option<&dyn Provider>,
    model: &str,
    dept_index: &DepartmentIndex,
) -> RecognizedIntent {
    if masked_query.trim().is_empty() {
        return RecognizedIntent::empty();
    }

    if let Some(provider) = provider {
        let req = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMsg {
                    role: "system".into(),
                    content: build_schema_brief(),
                },
                ChatMsg {
                    role: "user".into(),
                    content: build_user_message(masked_query),
                },
            ],
            max_output_tokens: 512,
            temperature: 0.0,
            top_p: 1.0,
            stop: vec![],
        };

        let dispatched = tokio::time::timeout(INTENT_TIMEOUT, provider.dispatch(&req)).await;
        if let Ok(Ok(resp)) = dispatched {
            if let Ok(wire) = serde_json::from_str::<IntentWire>(&resp.normalized.content) {
                return from_wire(wire);
            }
        }
    }

    extract(masked_query, dept_index)
}

/// Deterministic pattern-tier extraction: year, severity synonyms,
/// department keyword lookup, explicit acronym lookup, and a residual
/// keyword extractor. Always callable standalone (C5's contract) and
/// reused internally as C4's fallback.
pub fn extract(masked_query: &str, dept_index: &DepartmentIndex) -> RecognizedIntent {
    if masked_query.trim().is_empty() {
        return RecognizedIntent::empty();
    }

    let lower = masked_query.to_lowercase();
    let mut filters = Filters::default();

    for token in masked_query.split(|c: char| !c.is_alphanumeric()) {
        if auditroute_schema::is_valid_year(token) {
            filters.year = Some(token.to_string());
            break;
        }
    }

    for token in lower.split(|c: char| !c.is_alphanumeric() && c != '-') {
        if let Some(sev) = Severity::from_token(token) {
            filters.severity.insert(sev);
        }
    }
    for phrase in ["highest risk", "sangat tinggi"] {
        if lower.contains(phrase) {
            filters.severity.insert(Severity::Critical);
        }
    }
    filters.apply_severity_ranges();

    let dept_matches = dept_index.search_by_name(masked_query);
    if let Some(first) = dept_matches.first() {
        filters.department = Some(first.canonical_name.clone());
    } else {
        for token in masked_query.split_whitespace() {
            if !dept_index.search_by_name(token).is_empty() {
                filters.department = Some(token.to_string());
                break;
            }
        }
    }

    let acronym_hits = dictionary::find_acronyms_in_text(masked_query);
    for entry in &acronym_hits {
        filters.keywords.extend(dictionary::expansion_keywords(entry));
    }

    let residual: BTreeSet<String> = masked_query
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| !auditroute_schema::is_valid_year(t))
        .collect();
    filters.keywords.extend(residual.clone());

    // requires_analysis is a classification signal, not a keyword-coverage
    // one: only trigger words and a genuine domain-acronym hit flip it,
    // never the residual leftover-content-word set (spec.md's "highest
    // risk findings 2024" example must stay requiresAnalysis=false).
    let has_trigger_word = TRIGGER_WORDS.iter().any(|w| lower.contains(w));
    let requires_analysis = has_trigger_word || !acronym_hits.is_empty();

    let confidence = if filters.is_empty() { 0.0 } else { 0.35 };

    RecognizedIntent {
        intent: masked_query.to_string(),
        filters,
        requires_analysis,
        confidence,
    }
}

/// Merges two recognized intents field-by-field, `primary` winning on
/// any field it actually set; `secondary` filling gaps. Used by the
/// router to combine C4's result with C5's standalone extraction.
pub fn merge_intents(primary: RecognizedIntent, secondary: RecognizedIntent) -> RecognizedIntent {
    let mut f = primary.filters;
    let s = secondary.filters;

    if f.year.is_none() {
        f.year = s.year;
    }
    if f.department.is_none() {
        f.department = s.department;
    }
    if f.subholding.is_none() {
        f.subholding = s.subholding;
    }
    if f.project_name.is_none() {
        f.project_name = s.project_name;
    }
    if f.severity.is_empty() {
        f.severity = s.severity;
    }
    f.keywords.extend(s.keywords);
    if f.min_nilai.is_none() {
        f.min_nilai = s.min_nilai;
    }
    if f.max_nilai.is_none() {
        f.max_nilai = s.max_nilai;
    }
    if f.finding_only.is_none() {
        f.finding_only = s.finding_only;
    }
    f.apply_severity_ranges();

    RecognizedIntent {
        intent: if primary.intent.is_empty() { secondary.intent } else { primary.intent },
        filters: f,
        requires_analysis: primary.requires_analysis || secondary.requires_analysis,
        confidence: primary.confidence.max(secondary.confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_yields_empty_intent() {
        let dept_index = DepartmentIndex::new();
        let intent = extract("", &dept_index);
        assert_eq!(intent.confidence, 0.0);
        assert!(!intent.requires_analysis);
        assert!(intent.filters.is_empty());
    }

    #[test]
    fn year_is_extracted_as_string() {
        let dept_index = DepartmentIndex::new();
        let intent = extract("findings from 2024 in IT", &dept_index);
        assert_eq!(intent.filters.year, Some("2024".to_string()));
    }

    #[test]
    fn severity_synonym_maps_to_critical_range() {
        let dept_index = DepartmentIndex::new();
        let intent = extract("show urgent findings", &dept_index);
        assert!(intent.filters.severity.contains(&Severity::Critical));
        assert_eq!(intent.filters.min_nilai, Some(15.0));
    }

    #[test]
    fn trigger_word_requires_analysis() {
        let dept_index = DepartmentIndex::new();
        let intent = extract("why did PPJB findings increase", &dept_index);
        assert!(intent.requires_analysis);
    }

    #[test]
    fn residual_keywords_alone_do_not_require_analysis() {
        let dept_index = DepartmentIndex::new();
        let intent = extract("show me highest risk findings 2024", &dept_index);
        assert!(!intent.requires_analysis);
        assert!(intent.filters.severity.contains(&Severity::Critical));
    }

    #[test]
    fn acronym_becomes_keyword_and_triggers_analysis() {
        let dept_index = DepartmentIndex::new();
        let intent = extract("PPJB compliance status", &dept_index);
        assert!(intent.filters.keywords.contains("PPJB"));
        assert!(intent.filters.keywords.contains("Perjanjian Pengikatan Jual Beli"));
        assert!(intent.filters.keywords.contains("binding sale agreement"));
        assert!(intent.requires_analysis);
    }

    #[test]
    fn merge_prefers_primary_and_fills_gaps() {
        let mut primary = RecognizedIntent::empty();
        primary.filters.year = Some("2024".into());
        let mut secondary = RecognizedIntent::empty();
        secondary.filters.year = Some("1999".into());
        secondary.filters.department = Some("IT".into());

        let merged = merge_intents(primary, secondary);
        assert_eq!(merged.filters.year, Some("2024".into()));
        assert_eq!(merged.filters.department, Some("IT".into()));
    }
}
