//! Patient allergy models.

use serde::{Deserialize, Serialize};

/// Kind of allergen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllergenType {
    Drug,
    Food,
    Environmental,
    Other,
}

impl AllergenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllergenType::Drug => "DRUG",
            AllergenType::Food => "FOOD",
            AllergenType::Environmental => "ENVIRONMENTAL",
            AllergenType::Other => "OTHER",
        }
    }

    /// Parse a stored value; anything unrecognized is `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "DRUG" => AllergenType::Drug,
            "FOOD" => AllergenType::Food,
            "ENVIRONMENTAL" => AllergenType::Environmental,
            _ => AllergenType::Other,
        }
    }
}

/// Reaction severity recorded for an allergy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllergySeverity {
    Mild,
    Moderate,
    Severe,
    LifeThreatening,
    /// Stored value was missing or not recognized
    #[serde(other)]
    Unknown,
}

impl AllergySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllergySeverity::Mild => "MILD",
            AllergySeverity::Moderate => "MODERATE",
            AllergySeverity::Severe => "SEVERE",
            AllergySeverity::LifeThreatening => "LIFE_THREATENING",
            AllergySeverity::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "MILD" => AllergySeverity::Mild,
            "MODERATE" => AllergySeverity::Moderate,
            "SEVERE" => AllergySeverity::Severe,
            "LIFE_THREATENING" => AllergySeverity::LifeThreatening,
            _ => AllergySeverity::Unknown,
        }
    }

    /// Sort rank, higher is more severe. `Unknown` ranks below `Mild`.
    pub fn rank(&self) -> u8 {
        match self {
            AllergySeverity::LifeThreatening => 4,
            AllergySeverity::Severe => 3,
            AllergySeverity::Moderate => 2,
            AllergySeverity::Mild => 1,
            AllergySeverity::Unknown => 0,
        }
    }

    /// Is this the highest severity tier?
    pub fn is_top_tier(&self) -> bool {
        matches!(self, AllergySeverity::LifeThreatening)
    }
}

/// A patient's recorded allergy. Soft-deleted via `is_active`, never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllergyRecord {
    /// Unique allergy ID
    pub id: String,
    /// Owning patient
    pub patient_id: String,
    /// Allergen as entered (e.g. "Penicillin", "Peanuts")
    pub allergen_name: String,
    pub allergen_type: AllergenType,
    /// Linked drug concept, when the allergen resolves to one
    pub allergen_concept_id: Option<String>,
    pub severity: AllergySeverity,
    /// Observed reaction (e.g. "hives")
    pub reaction: Option<String>,
    pub is_active: bool,
    /// Clinician who verified the record
    pub verified_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AllergyRecord {
    /// Create an active record from caller input.
    pub fn new(patient_id: String, input: NewAllergy) -> Self {
        let now = crate::now_timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            allergen_name: input.allergen_name.trim().to_string(),
            allergen_type: input.allergen_type,
            allergen_concept_id: input.allergen_concept_id,
            severity: input.severity,
            reaction: input.reaction,
            is_active: true,
            verified_by: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Lowercased allergen name used for duplicate detection.
    pub fn normalized_allergen(&self) -> String {
        normalize_allergen(&self.allergen_name)
    }
}

/// Trimmed, Unicode-lowercased allergen name. Two records are the same
/// allergen when these are equal.
pub fn normalize_allergen(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Caller input for recording an allergy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAllergy {
    pub allergen_name: String,
    pub allergen_type: AllergenType,
    pub allergen_concept_id: Option<String>,
    pub severity: AllergySeverity,
    pub reaction: Option<String>,
}

impl NewAllergy {
    /// A drug allergy with no linked concept and no reaction text.
    pub fn drug(allergen_name: impl Into<String>, severity: AllergySeverity) -> Self {
        Self {
            allergen_name: allergen_name.into(),
            allergen_type: AllergenType::Drug,
            allergen_concept_id: None,
            severity,
            reaction: None,
        }
    }
}

/// Partial update of an allergy record. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AllergyUpdate {
    pub severity: Option<AllergySeverity>,
    pub reaction: Option<String>,
    pub allergen_concept_id: Option<String>,
}
