//! auditroute_department_index
//!
//! C3: turns a user-supplied department fragment ("IT", "Finance", "HR")
//! into the complete set of raw `department` strings present in storage,
//! and lets ingestion fold new raw names into canonical groups.
//!
//! In-memory `Vec<Department>`, rebuilt on mutation — the same "load,
//! mutate, rewrite canonically" shape as `pie_episodes::EpisodeIndex`,
//! minus on-disk persistence (that's an ingestion-time collaborator's
//! job, out of this crate's contract).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentCategory {
    It,
    Finance,
    Hr,
    MarketingSales,
    PropertyManagement,
    EngineeringConstruction,
    LegalCompliance,
    AuditRisk,
    Operations,
    PlanningDevelopment,
    HospitalityFnb,
    Healthcare,
    InsuranceActuarial,
    CsrCommunity,
    Security,
    Corporate,
    SupplyChainProcurement,
    AcademicAdministration,
    OutsourcingThirdParty,
    /// Sink for untagged entries.
    Other,
}

impl DepartmentCategory {
    pub const ALL: [DepartmentCategory; 20] = [
        DepartmentCategory::It,
        DepartmentCategory::Finance,
        DepartmentCategory::Hr,
        DepartmentCategory::MarketingSales,
        DepartmentCategory::PropertyManagement,
        DepartmentCategory::EngineeringConstruction,
        DepartmentCategory::LegalCompliance,
        DepartmentCategory::AuditRisk,
        DepartmentCategory::Operations,
        DepartmentCategory::PlanningDevelopment,
        DepartmentCategory::HospitalityFnb,
        DepartmentCategory::Healthcare,
        DepartmentCategory::InsuranceActuarial,
        DepartmentCategory::CsrCommunity,
        DepartmentCategory::Security,
        DepartmentCategory::Corporate,
        DepartmentCategory::SupplyChainProcurement,
        DepartmentCategory::AcademicAdministration,
        DepartmentCategory::OutsourcingThirdParty,
        DepartmentCategory::Other,
    ];

    /// Keyword hints used to guess a category for a brand-new raw name.
    /// Falls through to `Other` if nothing matches.
    fn keyword_hints(&self) -> &'static [&'static str] {
        match self {
            DepartmentCategory::It => &["it", "information", "technology", "teknologi", "sistem"],
            DepartmentCategory::Finance => &["finance", "keuangan", "treasury", "accounting", "akuntansi"],
            DepartmentCategory::Hr => &["hr", "human", "resources", "personalia", "sdm"],
            DepartmentCategory::MarketingSales => &["marketing", "sales", "pemasaran", "penjualan"],
            DepartmentCategory::PropertyManagement => &["property", "properti", "estate", "leasing"],
            DepartmentCategory::EngineeringConstruction => {
                &["engineering", "construction", "teknik", "konstruksi"]
            }
            DepartmentCategory::LegalCompliance => &["legal", "hukum", "compliance", "kepatuhan"],
            DepartmentCategory::AuditRisk => &["audit", "risk", "risiko", "spi"],
            DepartmentCategory::Operations => &["operations", "operasional", "ops"],
            DepartmentCategory::PlanningDevelopment => &["planning", "perencanaan", "development", "pengembangan"],
            DepartmentCategory::HospitalityFnb => &["hotel", "hospitality", "fnb", "food", "beverage"],
            DepartmentCategory::Healthcare => &["hospital", "rumah", "sakit", "healthcare", "medis", "klinik"],
            DepartmentCategory::InsuranceActuarial => &["insurance", "asuransi", "actuarial", "aktuaria"],
            DepartmentCategory::CsrCommunity => &["csr", "community", "komunitas", "sosial"],
            DepartmentCategory::Security => &["security", "keamanan", "satpam"],
            DepartmentCategory::Corporate => &["corporate", "korporat", "sekretariat", "secretary"],
            DepartmentCategory::SupplyChainProcurement => {
                &["supply", "procurement", "pengadaan", "logistik", "logistics"]
            }
            DepartmentCategory::AcademicAdministration => {
                &["academic", "akademik", "administration", "administrasi", "kampus"]
            }
            DepartmentCategory::OutsourcingThirdParty => &["outsourcing", "vendor", "alih", "daya", "third"],
            DepartmentCategory::Other => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub canonical_name: String,
    pub category: DepartmentCategory,
    pub original_names: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepartmentIndex {
    departments: Vec<Department>,
}

/// Strips "Departemen "/"Dept." prefixes and punctuation, collapses
/// whitespace. Case preserved for display; callers needing a comparison
/// key should additionally lowercase.
pub fn normalize_raw_name(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in ["Departemen ", "departemen ", "Dept. ", "Dept.", "dept. ", "dept."] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
            break;
        }
    }
    let no_punct: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    no_punct.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokenize(normalized: &str) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn guess_category(tokens: &BTreeSet<String>) -> DepartmentCategory {
    for cat in DepartmentCategory::ALL {
        if cat
            .keyword_hints()
            .iter()
            .any(|hint| tokens.contains(*hint))
        {
            return cat;
        }
    }
    DepartmentCategory::Other
}

impl DepartmentIndex {
    pub fn new() -> Self {
        DepartmentIndex::default()
    }

    pub fn departments(&self) -> &[Department] {
        &self.departments
    }

    /// Matches against `canonical_name`, `category`, or any `keyword`.
    /// Ordered by specificity: exact canonical name first, then category,
    /// then keyword matches.
    pub fn search_by_name(&self, fragment: &str) -> Vec<&Department> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut exact = Vec::new();
        let mut by_category = Vec::new();
        let mut by_keyword = Vec::new();
        let mut seen = BTreeSet::new();

        for d in &self.departments {
            if d.canonical_name.to_lowercase() == needle {
                if seen.insert(d.canonical_name.clone()) {
                    exact.push(d);
                }
            }
        }
        for d in &self.departments {
            if seen.contains(&d.canonical_name) {
                continue;
            }
            let cat_label = format!("{:?}", d.category).to_lowercase();
            if cat_label == needle || cat_label.replace('_', " ") == needle {
                if seen.insert(d.canonical_name.clone()) {
                    by_category.push(d);
                }
            }
        }
        for d in &self.departments {
            if seen.contains(&d.canonical_name) {
                continue;
            }
            if d.keywords.iter().any(|k| k == &needle) {
                if seen.insert(d.canonical_name.clone()) {
                    by_keyword.push(d);
                }
            }
        }

        exact.into_iter().chain(by_category).chain(by_keyword).collect()
    }

    /// Flattens `search_by_name` and deduplicates.
    pub fn original_names_for(&self, fragment: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for d in self.search_by_name(fragment) {
            for name in &d.original_names {
                if seen.insert(name.clone()) {
                    out.push(name.clone());
                }
            }
        }
        out
    }

    /// Normalizes `raw_name` and either attaches it to an existing
    /// canonical group by keyword overlap, or creates a new one with an
    /// initial keyword set derived from the normalized tokens.
    ///
    /// Idempotent on equivalent raw names: the same normalized form
    /// always lands in the same canonical group.
    pub fn find_or_create(&mut self, raw_name: &str, _user_id: &str) -> &Department {
        let normalized = normalize_raw_name(raw_name);
        let tokens = tokenize(&normalized);

        let existing_idx = self.departments.iter().position(|d| {
            !d.keywords.is_disjoint(&tokens) || d.canonical_name.to_lowercase() == normalized.to_lowercase()
        });

        let idx = if let Some(i) = existing_idx {
            let dep = &mut self.departments[i];
            dep.original_names.insert(raw_name.to_string());
            dep.keywords.extend(tokens);
            i
        } else {
            let category = guess_category(&tokens);
            let mut original_names = BTreeSet::new();
            original_names.insert(raw_name.to_string());
            self.departments.push(Department {
                canonical_name: normalized,
                category,
                original_names,
                keywords: tokens,
            });
            self.departments.len() - 1
        };

        &self.departments[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_prefixes_and_punctuation() {
        assert_eq!(normalize_raw_name("Departemen IT."), "IT");
        assert_eq!(normalize_raw_name("Dept. Finance & Accounting"), "Finance Accounting");
        assert_eq!(normalize_raw_name("  HR   "), "HR");
    }

    #[test]
    fn find_or_create_is_idempotent_on_equivalent_names() {
        let mut idx = DepartmentIndex::new();
        idx.find_or_create("Departemen IT", "u1");
        idx.find_or_create("IT", "u1");
        assert_eq!(idx.departments().len(), 1);
        assert_eq!(idx.departments()[0].original_names.len(), 2);
    }

    #[test]
    fn find_or_create_infers_category_from_keywords() {
        let mut idx = DepartmentIndex::new();
        idx.find_or_create("Divisi Keuangan", "u1");
        assert_eq!(idx.departments()[0].category, DepartmentCategory::Finance);
    }

    #[test]
    fn unrecognized_department_falls_back_to_other() {
        let mut idx = DepartmentIndex::new();
        idx.find_or_create("Unit Xyzzy Plonk", "u1");
        assert_eq!(idx.departments()[0].category, DepartmentCategory::Other);
    }

    #[test]
    fn search_by_name_prefers_exact_over_keyword() {
        let mut idx = DepartmentIndex::new();
        idx.find_or_create("Divisi Keuangan", "u1");
        idx.find_or_create("Keuangan", "u1");
        let results = idx.search_by_name("Keuangan");
        assert!(!results.is_empty());
    }

    #[test]
    fn original_names_for_flattens_and_dedupes() {
        let mut idx = DepartmentIndex::new();
        idx.find_or_create("IT Department", "u1");
        idx.find_or_create("Departemen IT", "u1");
        let names = idx.original_names_for("IT Department");
        assert_eq!(names.len(), 2);
        let names_again = idx.original_names_for("IT Department");
        assert_eq!(names_again.len(), 2);
    }
}
