//! Allergen-to-drug matching stages.
//!
//! Stages run in priority order for each (allergy, drug) pair and the first
//! match wins. Matching is case-insensitive substring containment in either
//! direction; empty strings never match.

use super::CrossReactivityTable;
use crate::models::{AllergyRecord, DrugConcept, MatchConfidence, MatchType};

/// Inputs for evaluating one (allergy, drug) pair.
pub struct MatchContext<'a> {
    pub allergy: &'a AllergyRecord,
    pub drug: &'a DrugConcept,
    pub cross_reactivity: &'a CrossReactivityTable,
}

/// A stage hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMatch {
    pub match_type: MatchType,
    pub confidence: MatchConfidence,
    /// Drug attribute that matched
    pub matched_on: String,
}

impl StageMatch {
    fn new(match_type: MatchType, confidence: MatchConfidence, matched_on: &str) -> Self {
        Self {
            match_type,
            confidence,
            matched_on: matched_on.to_string(),
        }
    }
}

/// One matching strategy.
pub trait MatchStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &MatchContext<'_>) -> Option<StageMatch>;
}

/// Linked concept id, or allergen name against the drug's name or generic name.
pub struct ExactMatch;

impl MatchStage for ExactMatch {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn evaluate(&self, ctx: &MatchContext<'_>) -> Option<StageMatch> {
        if ctx.allergy.allergen_concept_id.as_deref() == Some(ctx.drug.id.as_str()) {
            return Some(StageMatch::new(MatchType::Exact, MatchConfidence::High, &ctx.drug.id));
        }
        std::iter::once(&ctx.drug.name)
            .chain(ctx.drug.generic_name.iter())
            .find(|name| mutual_contains(&ctx.allergy.allergen_name, name))
            .map(|name| StageMatch::new(MatchType::Exact, MatchConfidence::High, name))
    }
}

pub struct IngredientMatch;

impl MatchStage for IngredientMatch {
    fn name(&self) -> &'static str {
        "ingredient"
    }

    fn evaluate(&self, ctx: &MatchContext<'_>) -> Option<StageMatch> {
        first_containing(&ctx.allergy.allergen_name, &ctx.drug.active_ingredients)
            .map(|hit| StageMatch::new(MatchType::Ingredient, MatchConfidence::High, hit))
    }
}

pub struct DrugClassMatch;

impl MatchStage for DrugClassMatch {
    fn name(&self) -> &'static str {
        "drug_class"
    }

    fn evaluate(&self, ctx: &MatchContext<'_>) -> Option<StageMatch> {
        first_containing(&ctx.allergy.allergen_name, &ctx.drug.drug_classes)
            .map(|hit| StageMatch::new(MatchType::DrugClass, MatchConfidence::Medium, hit))
    }
}

/// Allergen root classes from the cross-reactivity table against the drug's
/// name, classes and ingredients.
pub struct CrossReactiveMatch;

impl MatchStage for CrossReactiveMatch {
    fn name(&self) -> &'static str {
        "cross_reactive"
    }

    fn evaluate(&self, ctx: &MatchContext<'_>) -> Option<StageMatch> {
        let related = ctx.cross_reactivity.related_classes(&ctx.allergy.allergen_name);
        if related.is_empty() {
            return None;
        }

        let drug = ctx.drug;
        let candidates = std::iter::once(&drug.name)
            .chain(drug.drug_classes.iter())
            .chain(drug.active_ingredients.iter());

        for candidate in candidates {
            for class in &related {
                if mutual_contains(class, candidate) {
                    return Some(StageMatch::new(
                        MatchType::CrossReactive,
                        MatchConfidence::Low,
                        candidate,
                    ));
                }
            }
        }
        None
    }
}

/// Exact, ingredient, drug class, cross-reactive.
pub fn default_stages() -> Vec<Box<dyn MatchStage>> {
    vec![
        Box::new(ExactMatch),
        Box::new(IngredientMatch),
        Box::new(DrugClassMatch),
        Box::new(CrossReactiveMatch),
    ]
}

/// First stage that matches, in order.
pub fn first_match(stages: &[Box<dyn MatchStage>], ctx: &MatchContext<'_>) -> Option<StageMatch> {
    stages.iter().find_map(|stage| {
        let hit = stage.evaluate(ctx)?;
        tracing::trace!(
            stage = stage.name(),
            allergy_id = %ctx.allergy.id,
            drug_id = %ctx.drug.id,
            "allergen matched"
        );
        Some(hit)
    })
}

/// Case-insensitive containment in either direction. Empty never matches.
pub fn mutual_contains(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

fn first_containing<'a>(needle: &str, haystack: &'a [String]) -> Option<&'a str> {
    haystack
        .iter()
        .find(|candidate| mutual_contains(needle, candidate))
        .map(String::as_str)
}
