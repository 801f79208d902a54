//! Drug concept models.

use serde::{Deserialize, Serialize};

/// Term type of a drug concept (ingredient, brand, dose form, ...).
///
/// Codes follow the RxNorm TTY vocabulary. Unrecognized codes are kept
/// verbatim in [`TermType::Other`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "String", from = "String")]
pub enum TermType {
    /// Base ingredient (IN)
    Ingredient,
    /// Precise ingredient, e.g. a salt form (PIN)
    PreciseIngredient,
    /// Multiple ingredients (MIN)
    MultipleIngredients,
    /// Brand name (BN)
    BrandName,
    /// Semantic clinical drug (SCD)
    ClinicalDrug,
    /// Semantic branded drug (SBD)
    BrandedDrug,
    /// Clinical drug form (SCDF)
    ClinicalDrugForm,
    /// Dose form (DF)
    DoseForm,
    /// Any other term type code
    Other(String),
}

impl TermType {
    /// TTY code for this term type.
    pub fn code(&self) -> &str {
        match self {
            TermType::Ingredient => "IN",
            TermType::PreciseIngredient => "PIN",
            TermType::MultipleIngredients => "MIN",
            TermType::BrandName => "BN",
            TermType::ClinicalDrug => "SCD",
            TermType::BrandedDrug => "SBD",
            TermType::ClinicalDrugForm => "SCDF",
            TermType::DoseForm => "DF",
            TermType::Other(code) => code,
        }
    }

    /// Parse a TTY code (case-insensitive).
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "IN" => TermType::Ingredient,
            "PIN" => TermType::PreciseIngredient,
            "MIN" => TermType::MultipleIngredients,
            "BN" => TermType::BrandName,
            "SCD" => TermType::ClinicalDrug,
            "SBD" => TermType::BrandedDrug,
            "SCDF" => TermType::ClinicalDrugForm,
            "DF" => TermType::DoseForm,
            _ => TermType::Other(code.trim().to_string()),
        }
    }

    /// Is this an ingredient-level concept?
    pub fn is_ingredient(&self) -> bool {
        matches!(
            self,
            TermType::Ingredient | TermType::PreciseIngredient | TermType::MultipleIngredients
        )
    }
}

impl From<TermType> for String {
    fn from(tty: TermType) -> Self {
        tty.code().to_string()
    }
}

impl From<String> for TermType {
    fn from(code: String) -> Self {
        TermType::from_code(&code)
    }
}

/// A canonical drug entity from the external knowledge source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrugConcept {
    /// Stable external identifier (e.g. RxCUI)
    pub id: String,
    /// Display name
    pub name: String,
    /// Generic name, if known
    pub generic_name: Option<String>,
    /// Brand names associated with this concept
    pub brand_names: Vec<String>,
    /// Term type (ingredient, brand, dose form, ...)
    pub term_type: TermType,
    /// Alternative names
    pub synonyms: Vec<String>,
    /// Strength (e.g. "500 MG")
    pub strength: Option<String>,
    /// Dosage form (e.g. "Oral Capsule")
    pub dosage_form: Option<String>,
    /// Route of administration
    pub route: Option<String>,
    /// Drug class names (e.g. "Penicillins", "NSAIDs")
    pub drug_classes: Vec<String>,
    /// Active ingredient names
    pub active_ingredients: Vec<String>,
}

impl DrugConcept {
    /// Create a concept with only the required fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>, term_type: TermType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            generic_name: None,
            brand_names: Vec::new(),
            term_type,
            synonyms: Vec::new(),
            strength: None,
            dosage_form: None,
            route: None,
            drug_classes: Vec::new(),
            active_ingredients: Vec::new(),
        }
    }

    /// Case-insensitive exact match against name, generic name, brands and synonyms.
    pub fn is_named(&self, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        std::iter::once(&self.name)
            .chain(self.generic_name.iter())
            .chain(self.brand_names.iter())
            .chain(self.synonyms.iter())
            .any(|candidate| candidate.trim().to_lowercase() == needle)
    }

    /// All names this concept is known by, display name first.
    pub fn all_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        names.extend(self.generic_name.as_deref());
        names.extend(self.brand_names.iter().map(String::as_str));
        names.extend(self.synonyms.iter().map(String::as_str));
        names
    }
}
