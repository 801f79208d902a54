//! Similarity ranking for local fallback search.

use strsim::{jaro_winkler, normalized_levenshtein};

use crate::models::DrugConcept;

/// Combined similarity in `[0, 1]`.
pub fn fuzzy_match(a: &str, b: &str) -> f64 {
    // Jaro-Winkler favours shared prefixes, Levenshtein overall edit distance
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

/// Best similarity of `term` against any of the concept's names.
pub fn concept_score(term: &str, concept: &DrugConcept) -> f64 {
    let term = term.trim().to_lowercase();
    concept
        .all_names()
        .into_iter()
        .map(|name| fuzzy_match(&term, &name.to_lowercase()))
        .fold(0.0, f64::max)
}

/// Sort concepts by descending similarity to `term`. Ties keep input order.
pub fn rank_by_similarity(term: &str, concepts: Vec<DrugConcept>) -> Vec<DrugConcept> {
    let mut scored: Vec<(f64, DrugConcept)> = concepts
        .into_iter()
        .map(|c| (concept_score(term, &c), c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, c)| c).collect()
}
