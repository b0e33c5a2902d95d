//! auditroute_context
//!
//! C7: ranks a candidate `AuditRecord` set against the recognized intent
//! and truncates to a token budget before the records go into an LLM
//! prompt. Three selectable strategies (`keyword`, `semantic`, `hybrid`);
//! never splits a record across the budget boundary.
//!
//! Ranking shape (score candidates, sort, cut at a budget) is grounded
//! on `pie_episodes::EpisodeStore::query`'s "filter, sort, truncate"
//! pipeline; the token-budget cutoff mirrors `pie_redaction`'s
//! `summary_budget_chars` truncation-at-a-ceiling idiom.

use auditroute_dictionary as dictionary;
use auditroute_schema::{AuditRecord, RecognizedIntent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    Keyword,
    /// Falls back to `Keyword` when a candidate (or the query) has no
    /// embedding attached.
    Semantic,
    /// Linear blend of keyword and semantic scores. `weight` is the
    /// semantic share, in `[0,1]`; defaults to 0.5 via `Strategy::hybrid_default`.
    Hybrid { weight: f64 },
}

impl Strategy {
    pub fn hybrid_default() -> Self {
        Strategy::Hybrid { weight: 0.5 }
    }
}

pub const DEFAULT_TOKEN_BUDGET: usize = 10_000;
pub const MAX_RECORDS: usize = 20;

/// `ceil(chars / 4)`, a standard auditable approximation that avoids
/// pulling in a tokenizer crate the rest of the workspace doesn't carry.
fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

fn record_summary(record: &AuditRecord) -> String {
    format!(
        "{} | {} | {} | {} | {} | {}",
        record.project_name, record.department, record.risk_area, record.descriptions, record.year, record.code
    )
}

fn keyword_score(record: &AuditRecord, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {} {}",
        record.project_name.to_lowercase(),
        record.department.to_lowercase(),
        record.risk_area.to_lowercase(),
        record.descriptions.to_lowercase()
    );
    keywords
        .iter()
        .map(|kw| haystack.matches(kw.as_str()).count() as f64)
        .sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

fn score(
    record: &AuditRecord,
    keywords: &[String],
    query_embedding: Option<&[f32]>,
    strategy: Strategy,
) -> f64 {
    let kw = || keyword_score(record, keywords);
    let semantic = || {
        query_embedding
            .zip(record.embedding.as_deref())
            .and_then(|(q, r)| cosine_similarity(q, r))
    };

    match strategy {
        Strategy::Keyword => kw(),
        Strategy::Semantic => semantic().unwrap_or_else(kw),
        Strategy::Hybrid { weight } => match semantic() {
            Some(sem) => weight * sem + (1.0 - weight) * kw(),
            // No embeddings available at all: behave exactly like `Keyword`.
            None => kw(),
        },
    }
}

/// Ranks `candidates` by `strategy` against `intent.filters.keywords`
/// (plus `intent.intent` split into words, so a query with no explicit
/// keyword filter still ranks on its own text), then takes records in
/// descending score order until the cumulative token estimate of their
/// summaries would exceed `token_budget` or `MAX_RECORDS` is reached.
/// Whole records only; returns `[]` for an empty candidate set.
///
/// Any domain acronym present among the intent's keywords or its own
/// text is widened via the dictionary (C2) to its full form and English
/// translation before scoring, so a record using the long Indonesian
/// form still matches a search phrased with the acronym alone.
pub fn build(
    candidates: &[AuditRecord],
    intent: &RecognizedIntent,
    strategy: Strategy,
    query_embedding: Option<&[f32]>,
    token_budget: usize,
) -> Vec<AuditRecord> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut keywords: Vec<String> = intent.filters.keywords.iter().map(|k| k.to_lowercase()).collect();
    keywords.extend(
        intent
            .intent
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() > 2),
    );

    let widened: Vec<String> = keywords
        .iter()
        .filter_map(|kw| dictionary::lookup_acronym(kw))
        .flat_map(dictionary::expansion_keywords)
        .map(|kw| kw.to_lowercase())
        .collect();
    keywords.extend(widened);

    let mut scored: Vec<(f64, &AuditRecord)> = candidates
        .iter()
        .map(|r| (score(r, &keywords, query_embedding, strategy), r))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.id.cmp(&b.1.id)));

    let mut out = Vec::new();
    let mut budget_used = 0usize;
    for (_, record) in scored {
        if out.len() >= MAX_RECORDS {
            break;
        }
        let cost = estimate_tokens(&record_summary(record));
        if budget_used + cost > token_budget && !out.is_empty() {
            break;
        }
        budget_used += cost;
        out.push(record.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, project: &str, desc: &str, embedding: Option<Vec<f32>>) -> AuditRecord {
        AuditRecord {
            id: id.into(),
            year: "2024".into(),
            subholding: "SH1".into(),
            project_name: project.into(),
            project_id: "P1".into(),
            department: "IT".into(),
            risk_area: "ops".into(),
            descriptions: desc.into(),
            code: "F-1".into(),
            bobot: 3.0,
            kadar: 3.0,
            created_at: 0.0,
            updated_at: 0.0,
            embedding,
        }
    }

    fn intent_with_keywords(keywords: &[&str]) -> RecognizedIntent {
        let mut intent = RecognizedIntent::empty();
        intent.filters.keywords = keywords.iter().map(|s| s.to_string()).collect();
        intent
    }

    #[test]
    fn empty_candidates_yield_empty_result() {
        let intent = RecognizedIntent::empty();
        let out = build(&[], &intent, Strategy::Keyword, None, DEFAULT_TOKEN_BUDGET);
        assert!(out.is_empty());
    }

    #[test]
    fn keyword_strategy_ranks_matches_first() {
        let candidates = vec![
            record("1", "Renovation", "no match here", None),
            record("2", "PPJB review", "ppjb ppjb mentioned twice", None),
        ];
        let intent = intent_with_keywords(&["ppjb"]);
        let out = build(&candidates, &intent, Strategy::Keyword, None, DEFAULT_TOKEN_BUDGET);
        assert_eq!(out[0].id, "2");
    }

    #[test]
    fn semantic_falls_back_to_keyword_without_embeddings() {
        let candidates = vec![
            record("1", "Renovation", "no match", None),
            record("2", "PPJB review", "ppjb findings", None),
        ];
        let intent = intent_with_keywords(&["ppjb"]);
        let out = build(&candidates, &intent, Strategy::Semantic, None, DEFAULT_TOKEN_BUDGET);
        assert_eq!(out[0].id, "2");
    }

    #[test]
    fn semantic_uses_cosine_similarity_when_embeddings_present() {
        let candidates = vec![
            record("1", "A", "x", Some(vec![1.0, 0.0])),
            record("2", "B", "y", Some(vec![0.0, 1.0])),
        ];
        let intent = RecognizedIntent::empty();
        let query = vec![1.0, 0.0];
        let out = build(&candidates, &intent, Strategy::Semantic, Some(&query), DEFAULT_TOKEN_BUDGET);
        assert_eq!(out[0].id, "1");
    }

    #[test]
    fn stops_at_token_budget_without_splitting_a_record() {
        let candidates: Vec<AuditRecord> = (0..50)
            .map(|i| record(&i.to_string(), "Project", &"x".repeat(200), None))
            .collect();
        let out = build(&candidates, &RecognizedIntent::empty(), Strategy::Keyword, None, 100);
        assert!(!out.is_empty());
        assert!(out.len() < candidates.len());
    }

    #[test]
    fn never_exceeds_max_records_cap() {
        let candidates: Vec<AuditRecord> = (0..50).map(|i| record(&i.to_string(), "P", "d", None)).collect();
        let out = build(&candidates, &RecognizedIntent::empty(), Strategy::Keyword, None, 1_000_000);
        assert_eq!(out.len(), MAX_RECORDS);
    }

    #[test]
    fn acronym_keyword_is_widened_via_dictionary() {
        let candidates = vec![
            record("1", "Property review", "no acronym here", None),
            record("2", "Property review", "covers Perjanjian Pengikatan Jual Beli disputes", None),
        ];
        let intent = intent_with_keywords(&["PPJB"]);
        let out = build(&candidates, &intent, Strategy::Keyword, None, DEFAULT_TOKEN_BUDGET);
        assert_eq!(out[0].id, "2");
    }

    #[test]
    fn hybrid_blends_keyword_and_semantic_scores() {
        let candidates = vec![
            record("1", "PPJB only keyword", "ppjb ppjb ppjb", None),
            record("2", "semantic only", "no keyword here", Some(vec![1.0, 0.0])),
        ];
        let intent = intent_with_keywords(&["ppjb"]);
        let query = vec![1.0, 0.0];
        let out = build(&candidates, &intent, Strategy::hybrid_default(), Some(&query), DEFAULT_TOKEN_BUDGET);
        assert_eq!(out.len(), 2);
    }
}
