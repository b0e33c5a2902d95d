//! auditroute_schema
//!
//! Shared data model for the query-routing pipeline: the audit finding
//! record, the normalized filter set, and the recognized-intent shape
//! that C4/C5 produce and C6/C7/C9 consume.
//!
//! Kept dependency-free (serde only) so every other crate in the
//! workspace can depend on it without pulling in HTTP/crypto/storage
//! concerns — the same role `pie_redaction`'s request/response structs
//! played for the teacher's provider + redaction crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single audit-findings record as retrieved from the document store.
///
/// `year` is stored and compared as a string, never coerced to an
/// integer — migrating every extractor and query predicate to a numeric
/// year would be a breaking change this core does not make.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub id: String,
    pub year: String,
    pub subholding: String,
    pub project_name: String,
    pub project_id: String,
    /// Raw variant as entered at ingestion time; never normalized in place.
    /// Use `auditroute_department_index` to expand a canonical name into
    /// the set of raw variants a query should match.
    pub department: String,
    pub risk_area: String,
    pub descriptions: String,
    /// Empty string = non-finding; non-empty = finding.
    pub code: String,
    pub bobot: f64,
    pub kadar: f64,
    pub created_at: f64,
    pub updated_at: f64,
    /// Optional pre-computed embedding for C7's semantic ranking strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl AuditRecord {
    /// `nilai = bobot * kadar`, always derived, never stored inconsistently.
    pub fn nilai(&self) -> f64 {
        self.bobot * self.kadar
    }

    pub fn is_finding(&self) -> bool {
        !self.code.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// The closed severity enum is exhaustive; iterate it for validation
    /// and for the severity-range mapping.
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// `(min_nilai, max_nilai)` inclusive/exclusive bounds implied by this
    /// severity. Critical: >=15, High: 10-14, Medium: 5-9, Low: <5.
    pub fn nilai_range(&self) -> (f64, Option<f64>) {
        match self {
            Severity::Critical => (15.0, None),
            Severity::High => (10.0, Some(15.0)),
            Severity::Medium => (5.0, Some(10.0)),
            Severity::Low => (0.0, Some(5.0)),
        }
    }

    /// Case-insensitive match against the canonical name plus its
    /// Indonesian/colloquial synonyms.
    pub fn from_token(token: &str) -> Option<Severity> {
        let t = token.trim().to_lowercase();
        match t.as_str() {
            "critical" | "kritis" | "urgent" | "highest risk" | "highest-risk" | "severe"
            | "sangat tinggi" => Some(Severity::Critical),
            "high" | "tinggi" => Some(Severity::High),
            "medium" | "sedang" | "moderate" => Some(Severity::Medium),
            "low" | "rendah" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// Normalized filter set attached to a `RecognizedIntent`.
///
/// `department` holds whatever the extractor produced (a raw fragment);
/// the router expands it into `department_raw_names` via
/// `auditroute_department_index` before handing filters to C6.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Populated by the router after department expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub department_raw_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subholding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub severity: BTreeSet<Severity>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keywords: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_nilai: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nilai: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding_only: Option<bool>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.year.is_none()
            && self.department.is_none()
            && self.subholding.is_none()
            && self.project_name.is_none()
            && self.severity.is_empty()
            && self.keywords.is_empty()
            && self.min_nilai.is_none()
            && self.max_nilai.is_none()
            && self.finding_only.is_none()
    }

    /// Merges the severity-range mapping implied by `severity` into
    /// `min_nilai`/`max_nilai`, without discarding any bound a caller
    /// already set narrower. Applies to whichever severity value
    /// survives, whether it came from the LLM tier or the pattern tier.
    pub fn apply_severity_ranges(&mut self) {
        if self.severity.is_empty() {
            return;
        }
        let mut lo: Option<f64> = None;
        // `None` = no severity folded in yet; `Some(None)` = union is
        // unbounded above; `Some(Some(h))` = union's upper bound so far.
        let mut hi: Option<Option<f64>> = None;
        for sev in &self.severity {
            let (min_b, max_b) = sev.nilai_range();
            lo = Some(lo.map_or(min_b, |l: f64| l.min(min_b)));
            hi = Some(match (hi, max_b) {
                (None, m) => m,
                (Some(None), _) => None, // already unbounded; stays unbounded
                (Some(Some(h)), Some(m)) => Some(h.max(m)),
                (Some(Some(_)), None) => None,
            });
        }
        let hi = hi.flatten();
        self.min_nilai = Some(self.min_nilai.map_or(lo.unwrap_or(0.0), |m| m.min(lo.unwrap_or(0.0))));
        if let Some(h) = hi {
            self.max_nilai = Some(self.max_nilai.map_or(h, |m| m.max(h)));
        } else {
            self.max_nilai = None;
        }
    }
}

/// Validates that a candidate `year` string is exactly four digits.
/// Used by C4/C5 when coercing extracted years.
pub fn is_valid_year(s: &str) -> bool {
    s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognizedIntent {
    pub intent: String,
    pub filters: Filters,
    pub requires_analysis: bool,
    pub confidence: f64,
}

impl RecognizedIntent {
    pub fn empty() -> Self {
        RecognizedIntent {
            intent: String::new(),
            filters: Filters::default(),
            requires_analysis: false,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Nilai,
    Year,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nilai_is_derived() {
        let r = AuditRecord {
            id: "1".into(),
            year: "2024".into(),
            subholding: "SH1".into(),
            project_name: "P".into(),
            project_id: "P1".into(),
            department: "IT".into(),
            risk_area: "ops".into(),
            descriptions: "desc".into(),
            code: "F-1".into(),
            bobot: 4.0,
            kadar: 3.0,
            created_at: 0.0,
            updated_at: 0.0,
            embedding: None,
        };
        assert_eq!(r.nilai(), 12.0);
        assert!(r.is_finding());
    }

    #[test]
    fn severity_synonyms_map_to_critical() {
        for tok in ["urgent", "highest risk", "severe", "kritis", "CRITICAL"] {
            assert_eq!(Severity::from_token(tok), Some(Severity::Critical));
        }
    }

    #[test]
    fn severity_is_exhaustive_on_the_closed_enum() {
        assert_eq!(Severity::ALL.len(), 4);
    }

    #[test]
    fn year_validation_requires_exactly_four_digits() {
        assert!(is_valid_year("2024"));
        assert!(!is_valid_year("24"));
        assert!(!is_valid_year("20245"));
        assert!(!is_valid_year("202a"));
    }

    #[test]
    fn severity_range_union_is_applied() {
        let mut f = Filters::default();
        f.severity.insert(Severity::High);
        f.apply_severity_ranges();
        assert_eq!(f.min_nilai, Some(10.0));
        assert_eq!(f.max_nilai, Some(15.0));
    }

    #[test]
    fn critical_severity_leaves_max_nilai_unbounded() {
        let mut f = Filters::default();
        f.severity.insert(Severity::Critical);
        f.apply_severity_ranges();
        assert_eq!(f.min_nilai, Some(15.0));
        assert_eq!(f.max_nilai, None);
    }
}
