//! Cache key builders.

/// Trim, drop empties, sort and deduplicate a drug id list.
pub fn normalize_ids(ids: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Order-independent key for an interaction lookup.
pub fn interactions(ids: &[String]) -> String {
    format!("interactions:{}", normalize_ids(ids).join(","))
}

pub fn search(term: &str) -> String {
    format!("drug:search:{}", term.trim().to_lowercase())
}

pub fn detail(id: &str) -> String {
    format!("drug:detail:{}", id.trim())
}

pub fn synonyms(id: &str) -> String {
    format!("drug:synonyms:{}", id.trim())
}

pub fn classes(id: &str) -> String {
    format!("drug:classes:{}", id.trim())
}

pub fn patient_allergies(patient_id: &str) -> String {
    format!("patient:allergies:{}", patient_id.trim())
}
