//! Safety check history and override models.

use serde::{Deserialize, Serialize};

use super::{AllergySeverity, InteractionSeverity};

/// Which detector produced a check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Interaction,
    Allergy,
    /// Row created by an override that referenced an unrecorded check id
    Unknown,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Interaction => "interaction",
            CheckKind::Allergy => "allergy",
            CheckKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "interaction" => CheckKind::Interaction,
            "allergy" => CheckKind::Allergy,
            _ => CheckKind::Unknown,
        }
    }

    /// Does a stored severity label fall in the highest tier for this kind?
    pub fn is_top_tier(&self, label: &str) -> bool {
        match self {
            CheckKind::Interaction => InteractionSeverity::parse(label)
                .is_some_and(|severity| severity.is_top_tier()),
            CheckKind::Allergy => AllergySeverity::parse(label).is_top_tier(),
            CheckKind::Unknown => false,
        }
    }
}

/// A persisted interaction or allergy check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyCheck {
    pub check_id: String,
    pub kind: CheckKind,
    /// Patient, for allergy checks
    pub patient_id: Option<String>,
    pub drug_ids: Vec<String>,
    /// Severity label of every finding, in result order
    pub severities: Vec<String>,
    /// Number of interactions or conflicts found
    pub finding_count: u32,
    pub overridden: bool,
    pub override_reason: Option<String>,
    pub overridden_by: Option<String>,
    pub overridden_at: Option<String>,
    pub created_at: String,
}

impl SafetyCheck {
    /// Create a new, not yet overridden check.
    pub fn new(kind: CheckKind, patient_id: Option<String>, drug_ids: Vec<String>, severities: Vec<String>) -> Self {
        Self {
            check_id: uuid::Uuid::new_v4().to_string(),
            kind,
            patient_id,
            drug_ids,
            finding_count: severities.len() as u32,
            severities,
            overridden: false,
            override_reason: None,
            overridden_by: None,
            overridden_at: None,
            created_at: crate::now_timestamp(),
        }
    }

    /// Number of findings in the highest severity tier.
    pub fn top_tier_count(&self) -> usize {
        self.severities
            .iter()
            .filter(|label| self.kind.is_top_tier(label))
            .count()
    }
}

/// Outcome of applying an override to one check id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideApplication {
    /// The check existed and is now overridden
    Applied,
    /// The check was already overridden; nothing changed
    AlreadyOverridden,
    /// No row existed; a fresh overridden row was inserted
    Inserted,
}

/// A clinician's justification for proceeding despite warnings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverrideRecord {
    pub reason: String,
    pub acknowledged_checks: Vec<String>,
    pub overridden_by: String,
    pub overridden_at: String,
}

/// Result returned to the caller of `record_override`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverrideOutcome {
    /// Checks that moved to the overridden state in this call
    pub overridden_count: usize,
    /// Check ids that were already overridden before this call
    pub already_overridden: Vec<String>,
    /// Top-tier findings among the newly overridden checks
    pub high_severity_count: usize,
    pub timestamp: String,
}
