//! Drug-drug interaction models.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Clinical-risk severity of an interaction pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionSeverity {
    High,
    Moderate,
    Low,
}

impl InteractionSeverity {
    /// Map a free-text severity label from a knowledge source.
    ///
    /// Matching is case-insensitive and by substring. Missing, blank,
    /// "n/a" and "unknown" labels map to `Moderate`; any other text that
    /// names no higher tier maps to `Low`.
    pub fn from_source_label(label: Option<&str>) -> Self {
        let Some(label) = label.map(str::to_lowercase) else {
            return InteractionSeverity::Moderate;
        };
        let label = label.trim();
        if label.is_empty() || label == "n/a" || label == "unknown" {
            return InteractionSeverity::Moderate;
        }

        if ["contraindicated", "severe", "high"]
            .iter()
            .any(|k| label.contains(k))
        {
            InteractionSeverity::High
        } else if ["moderate", "caution"].iter().any(|k| label.contains(k)) {
            InteractionSeverity::Moderate
        } else {
            InteractionSeverity::Low
        }
    }

    /// Numeric rank, higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            InteractionSeverity::High => 3,
            InteractionSeverity::Moderate => 2,
            InteractionSeverity::Low => 1,
        }
    }

    /// Is this the highest severity tier?
    pub fn is_top_tier(&self) -> bool {
        matches!(self, InteractionSeverity::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionSeverity::High => "HIGH",
            InteractionSeverity::Moderate => "MODERATE",
            InteractionSeverity::Low => "LOW",
        }
    }

    /// Parse a stored label as written by [`as_str`](Self::as_str).
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "HIGH" => Some(InteractionSeverity::High),
            "MODERATE" => Some(InteractionSeverity::Moderate),
            "LOW" => Some(InteractionSeverity::Low),
            _ => None,
        }
    }
}

/// One side of an interaction pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionDrug {
    /// Drug concept id
    pub id: String,
    /// Display name as reported by the source
    pub name: String,
}

/// A drug-drug interaction between an unordered pair of concepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRecord {
    pub drug_a: InteractionDrug,
    pub drug_b: InteractionDrug,
    pub severity: InteractionSeverity,
    pub description: String,
    /// Name of the originating knowledge source
    pub source: String,
    pub clinical_effect: Option<String>,
    pub evidence_level: Option<String>,
}

impl InteractionRecord {
    /// Order-independent identity of the pair: the two ids, sorted.
    pub fn pair_key(&self) -> (String, String) {
        if self.drug_a.id <= self.drug_b.id {
            (self.drug_a.id.clone(), self.drug_b.id.clone())
        } else {
            (self.drug_b.id.clone(), self.drug_a.id.clone())
        }
    }
}

/// Stable sort by severity (HIGH, then MODERATE, then LOW).
///
/// Records of equal severity keep their relative order.
pub fn sort_by_severity(records: &mut [InteractionRecord]) {
    records.sort_by(|a, b| compare_severity(a.severity, b.severity));
}

fn compare_severity(a: InteractionSeverity, b: InteractionSeverity) -> Ordering {
    b.rank().cmp(&a.rank())
}

/// Result of an interaction check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionCheckResult {
    /// History row id; `None` when the check did not run
    pub check_id: Option<String>,
    pub has_interactions: bool,
    /// Interactions, most severe first
    pub interactions: Vec<InteractionRecord>,
    pub checked_at: String,
    /// Number of distinct drug ids checked
    pub drug_count: usize,
    /// Reasons the result may be incomplete (e.g. knowledge source unreachable)
    pub warnings: Vec<String>,
}

impl InteractionCheckResult {
    /// An empty result that performed no lookup.
    pub fn empty(drug_count: usize) -> Self {
        Self {
            check_id: None,
            has_interactions: false,
            interactions: Vec::new(),
            checked_at: crate::now_timestamp(),
            drug_count,
            warnings: Vec::new(),
        }
    }

    /// Highest severity present, if any.
    pub fn highest_severity(&self) -> Option<InteractionSeverity> {
        self.interactions
            .iter()
            .map(|i| i.severity)
            .max_by_key(|s| s.rank())
    }
}
