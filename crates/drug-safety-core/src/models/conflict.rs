//! Allergy conflict models.

use serde::{Deserialize, Serialize};

use super::allergy::AllergySeverity;

/// How an allergen was matched to a drug.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Linked concept id or name match
    Exact,
    /// Allergen is one of the drug's active ingredients
    Ingredient,
    /// Allergen names one of the drug's classes
    DrugClass,
    /// Allergen's class is known to cross-react with the drug
    CrossReactive,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "EXACT",
            MatchType::Ingredient => "INGREDIENT",
            MatchType::DrugClass => "DRUG_CLASS",
            MatchType::CrossReactive => "CROSS_REACTIVE",
        }
    }
}

/// How sure the detector is about a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchConfidence::High => "HIGH",
            MatchConfidence::Medium => "MEDIUM",
            MatchConfidence::Low => "LOW",
        }
    }
}

/// A detected correspondence between a patient allergen and a drug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictMatch {
    pub allergy_id: String,
    pub allergen_name: String,
    pub matched_drug_id: String,
    pub matched_drug_name: String,
    pub match_type: MatchType,
    pub confidence: MatchConfidence,
    /// Copied from the allergy record at match time
    pub severity: AllergySeverity,
    /// The drug attribute that matched (name, ingredient or class)
    pub matched_on: String,
}

/// Stable sort by allergy severity, most severe first. Unknown sorts last.
pub fn sort_conflicts(conflicts: &mut [ConflictMatch]) {
    conflicts.sort_by_key(|c| std::cmp::Reverse(c.severity.rank()));
}

/// Result of an allergy conflict check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllergyCheckResult {
    /// History row id; `None` when the check was disabled
    pub check_id: Option<String>,
    pub has_conflicts: bool,
    /// Conflicts, most severe first
    pub conflicts: Vec<ConflictMatch>,
    pub checked_at: String,
    /// Distinct drug ids considered
    pub checked_drugs: Vec<String>,
    /// Reasons the result may be incomplete (e.g. drug details unavailable)
    pub warnings: Vec<String>,
}

impl AllergyCheckResult {
    /// A no-conflict result.
    pub fn empty(checked_drugs: Vec<String>) -> Self {
        Self {
            check_id: None,
            has_conflicts: false,
            conflicts: Vec::new(),
            checked_at: crate::now_timestamp(),
            checked_drugs,
            warnings: Vec::new(),
        }
    }
}
