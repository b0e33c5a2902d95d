//! auditroute_dictionary
//!
//! C2: a read-only table mapping domain acronyms/full forms to expansion
//! keyword sets. Lookup is case-insensitive, exact-match on whole tokens
//! (never a substring match — spec §4.2). Used by C4's pattern-tier
//! fallback and by C7 to widen keyword searches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub acronym: &'static str,
    pub full_form: &'static str,
    pub english_translation: &'static str,
    pub category: &'static str,
}

/// The static dictionary. Covers the GLOSSARY's named acronyms plus
/// enough siblings (property, healthcare, hospitality, finance,
/// education) for C4's domain-acronym prompt hint and C7's keyword
/// widening to have real material.
const ENTRIES: &[DictionaryEntry] = &[
    DictionaryEntry {
        acronym: "PPJB",
        full_form: "Perjanjian Pengikatan Jual Beli",
        english_translation: "binding sale agreement",
        category: "Property Management",
    },
    DictionaryEntry {
        acronym: "AJB",
        full_form: "Akta Jual Beli",
        english_translation: "deed of sale",
        category: "Property Management",
    },
    DictionaryEntry {
        acronym: "SHM",
        full_form: "Sertifikat Hak Milik",
        english_translation: "certificate of ownership",
        category: "Property Management",
    },
    DictionaryEntry {
        acronym: "IMB",
        full_form: "Izin Mendirikan Bangunan",
        english_translation: "building construction permit",
        category: "Engineering & Construction",
    },
    DictionaryEntry {
        acronym: "IGD",
        full_form: "Instalasi Gawat Darurat",
        english_translation: "emergency department",
        category: "Healthcare",
    },
    DictionaryEntry {
        acronym: "ICU",
        full_form: "Intensive Care Unit",
        english_translation: "intensive care unit",
        category: "Healthcare",
    },
    DictionaryEntry {
        acronym: "BPJS",
        full_form: "Badan Penyelenggara Jaminan Sosial",
        english_translation: "national social security agency",
        category: "Insurance & Actuarial",
    },
    DictionaryEntry {
        acronym: "RevPAR",
        full_form: "Revenue Per Available Room",
        english_translation: "revenue per available room",
        category: "Hospitality & F&B",
    },
    DictionaryEntry {
        acronym: "KPR",
        full_form: "Kredit Pemilikan Rumah",
        english_translation: "home ownership loan",
        category: "Finance",
    },
    DictionaryEntry {
        acronym: "UKT",
        full_form: "Uang Kuliah Tunggal",
        english_translation: "single tuition fee",
        category: "Academic & Administration",
    },
    DictionaryEntry {
        acronym: "PBB",
        full_form: "Pajak Bumi dan Bangunan",
        english_translation: "land and building tax",
        category: "Finance",
    },
    DictionaryEntry {
        acronym: "NJOP",
        full_form: "Nilai Jual Objek Pajak",
        english_translation: "assessed sale value for tax",
        category: "Finance",
    },
    DictionaryEntry {
        acronym: "HGB",
        full_form: "Hak Guna Bangunan",
        english_translation: "right to build",
        category: "Legal & Compliance",
    },
    DictionaryEntry {
        acronym: "APBD",
        full_form: "Anggaran Pendapatan dan Belanja Daerah",
        english_translation: "regional revenue and expenditure budget",
        category: "Finance",
    },
    DictionaryEntry {
        acronym: "SOP",
        full_form: "Standard Operating Procedure",
        english_translation: "standard operating procedure",
        category: "Operations",
    },
    DictionaryEntry {
        acronym: "KPI",
        full_form: "Key Performance Indicator",
        english_translation: "key performance indicator",
        category: "Corporate",
    },
    DictionaryEntry {
        acronym: "NPWP",
        full_form: "Nomor Pokok Wajib Pajak",
        english_translation: "taxpayer identification number",
        category: "Finance",
    },
    DictionaryEntry {
        acronym: "BPHTB",
        full_form: "Bea Perolehan Hak atas Tanah dan Bangunan",
        english_translation: "land and building acquisition duty",
        category: "Legal & Compliance",
    },
    DictionaryEntry {
        acronym: "ADR",
        full_form: "Average Daily Rate",
        english_translation: "average daily rate",
        category: "Hospitality & F&B",
    },
    DictionaryEntry {
        acronym: "GOP",
        full_form: "Gross Operating Profit",
        english_translation: "gross operating profit",
        category: "Finance",
    },
];

fn index() -> &'static HashMap<&'static str, &'static DictionaryEntry> {
    static IDX: OnceLock<HashMap<&'static str, &'static DictionaryEntry>> = OnceLock::new();
    IDX.get_or_init(|| {
        let mut m = HashMap::new();
        for e in ENTRIES {
            m.insert(e.acronym.to_ascii_uppercase().leak() as &str, e);
        }
        m
    })
}

pub fn all_entries() -> &'static [DictionaryEntry] {
    ENTRIES
}

/// Case-insensitive, whole-token acronym lookup.
pub fn lookup_acronym(token: &str) -> Option<&'static DictionaryEntry> {
    let key = token.trim().to_ascii_uppercase();
    index().get(key.as_str()).copied()
}

/// The keyword set a matched acronym should widen a search by: itself,
/// its full form, and its English translation (spec scenario 3).
pub fn expansion_keywords(entry: &DictionaryEntry) -> Vec<String> {
    vec![
        entry.acronym.to_string(),
        entry.full_form.to_string(),
        entry.english_translation.to_string(),
    ]
}

/// Scans free text token-by-token (splitting on non-alphanumeric
/// boundaries) for any acronym in the dictionary. Never a substring
/// match, e.g. "PPJBX" does not match "PPJB".
pub fn find_acronyms_in_text(text: &str) -> Vec<&'static DictionaryEntry> {
    let mut found = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        if let Some(entry) = lookup_acronym(raw) {
            if seen.insert(entry.acronym) {
                found.push(entry);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acronym_lookup_is_case_insensitive() {
        assert!(lookup_acronym("ppjb").is_some());
        assert!(lookup_acronym("PpJb").is_some());
        assert_eq!(lookup_acronym("ppjb").unwrap().acronym, "PPJB");
    }

    #[test]
    fn lookup_is_whole_token_not_substring() {
        assert!(lookup_acronym("PPJBX").is_none());
        assert!(lookup_acronym("XPPJB").is_none());
    }

    #[test]
    fn find_acronyms_scans_free_text() {
        let found = find_acronyms_in_text("show me findings about PPJB in 2024");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].acronym, "PPJB");
    }

    #[test]
    fn expansion_keywords_includes_full_form_and_translation() {
        let e = lookup_acronym("PPJB").unwrap();
        let kw = expansion_keywords(e);
        assert!(kw.contains(&"Perjanjian Pengikatan Jual Beli".to_string()));
        assert!(kw.contains(&"binding sale agreement".to_string()));
    }
}
