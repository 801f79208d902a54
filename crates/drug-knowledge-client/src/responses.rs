//! RxNav response payloads and their conversion to core models.
//!
//! Every payload wrapper is optional on the wire: RxNav answers an unknown
//! name or id with `{}` or with empty groups rather than an error.

use serde::Deserialize;

use drug_safety_core::models::{
    DrugConcept, InteractionDrug, InteractionRecord, InteractionSeverity, TermType,
};

/// One concept as RxNav reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ConceptProperties {
    pub rxcui: String,
    pub name: String,
    #[serde(default)]
    pub synonym: Option<String>,
    #[serde(default)]
    pub tty: Option<String>,
}

impl ConceptProperties {
    /// Partial concept: id, name, term type and the synonym if present.
    pub fn to_concept(&self) -> DrugConcept {
        let tty = TermType::from_code(self.tty.as_deref().unwrap_or_default());
        let mut concept = DrugConcept::new(self.rxcui.trim(), self.name.trim(), tty);
        if let Some(synonym) = non_blank(self.synonym.as_deref()) {
            concept.synonyms.push(synonym.to_string());
        }
        concept
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptGroup {
    #[serde(default)]
    pub tty: Option<String>,
    #[serde(default)]
    pub concept_properties: Vec<ConceptProperties>,
}

// =========================================================================
// /drugs.json
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    drug_group: Option<DrugGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrugGroup {
    #[serde(default)]
    concept_group: Vec<ConceptGroup>,
}

/// Search results, deduplicated by id in response order.
pub fn parse_search(json: &str) -> Result<Vec<DrugConcept>, serde_json::Error> {
    let response: SearchResponse = serde_json::from_str(json)?;
    let mut concepts: Vec<DrugConcept> = Vec::new();
    for group in response.drug_group.map(|g| g.concept_group).unwrap_or_default() {
        for props in group.concept_properties {
            if !concepts.iter().any(|c| c.id == props.rxcui) {
                concepts.push(props.to_concept());
            }
        }
    }
    Ok(concepts)
}

// =========================================================================
// /rxcui/{id}/properties.json
// =========================================================================

#[derive(Debug, Deserialize)]
struct PropertiesResponse {
    #[serde(default)]
    properties: Option<ConceptProperties>,
}

/// Base properties of one concept; `None` when the id is unknown.
pub fn parse_properties(json: &str) -> Result<Option<ConceptProperties>, serde_json::Error> {
    let response: PropertiesResponse = serde_json::from_str(json)?;
    Ok(response.properties)
}

// =========================================================================
// /rxcui/{id}/related.json
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedResponse {
    #[serde(default)]
    related_group: Option<RelatedGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedGroup {
    #[serde(default)]
    concept_group: Vec<ConceptGroup>,
}

/// Related concept names grouped by term type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedNames {
    pub ingredients: Vec<String>,
    pub brand_names: Vec<String>,
    pub dose_forms: Vec<String>,
}

pub fn parse_related(json: &str) -> Result<RelatedNames, serde_json::Error> {
    let response: RelatedResponse = serde_json::from_str(json)?;
    let mut related = RelatedNames::default();
    for group in response.related_group.map(|g| g.concept_group).unwrap_or_default() {
        let bucket = match TermType::from_code(group.tty.as_deref().unwrap_or_default()) {
            TermType::Ingredient | TermType::PreciseIngredient => &mut related.ingredients,
            TermType::BrandName => &mut related.brand_names,
            TermType::DoseForm => &mut related.dose_forms,
            _ => continue,
        };
        for props in group.concept_properties {
            push_unique(bucket, &props.name);
        }
    }
    Ok(related)
}

/// Assemble a full concept from its properties and related names.
pub fn build_detail(props: &ConceptProperties, related: RelatedNames) -> DrugConcept {
    let mut concept = props.to_concept();
    concept.generic_name = if concept.term_type.is_ingredient() {
        Some(concept.name.clone())
    } else if related.ingredients.is_empty() {
        None
    } else {
        Some(related.ingredients.join(" / "))
    };
    concept.active_ingredients = related.ingredients;
    concept.brand_names = related.brand_names;
    concept.dosage_form = related.dose_forms.into_iter().next();
    concept
}

// =========================================================================
// /rxcui/{id}/allProperties.json?prop=names
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllPropertiesResponse {
    #[serde(default)]
    prop_concept_group: Option<PropConceptGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropConceptGroup {
    #[serde(default)]
    prop_concept: Vec<PropConcept>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropConcept {
    #[serde(default)]
    prop_category: Option<String>,
    #[serde(default)]
    prop_value: Option<String>,
}

/// Alternative names from the NAMES property category.
pub fn parse_synonyms(json: &str) -> Result<Vec<String>, serde_json::Error> {
    let response: AllPropertiesResponse = serde_json::from_str(json)?;
    let mut synonyms = Vec::new();
    for prop in response.prop_concept_group.map(|g| g.prop_concept).unwrap_or_default() {
        let is_name = prop
            .prop_category
            .as_deref()
            .map_or(true, |c| c.eq_ignore_ascii_case("names"));
        if is_name {
            if let Some(value) = non_blank(prop.prop_value.as_deref()) {
                push_unique(&mut synonyms, value);
            }
        }
    }
    Ok(synonyms)
}

// =========================================================================
// /rxclass/class/byRxcui.json
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassResponse {
    #[serde(default)]
    rxclass_drug_info_list: Option<ClassInfoList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassInfoList {
    #[serde(default)]
    rxclass_drug_info: Vec<ClassInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassInfo {
    rxclass_min_concept_item: ClassItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassItem {
    class_name: String,
}

/// Distinct class names in response order.
pub fn parse_classes(json: &str) -> Result<Vec<String>, serde_json::Error> {
    let response: ClassResponse = serde_json::from_str(json)?;
    let mut classes = Vec::new();
    for info in response
        .rxclass_drug_info_list
        .map(|l| l.rxclass_drug_info)
        .unwrap_or_default()
    {
        push_unique(&mut classes, &info.rxclass_min_concept_item.class_name);
    }
    Ok(classes)
}

// =========================================================================
// /interaction/list.json
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionResponse {
    #[serde(default)]
    full_interaction_type_group: Vec<InteractionTypeGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionTypeGroup {
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    full_interaction_type: Vec<FullInteractionType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullInteractionType {
    #[serde(default)]
    interaction_pair: Vec<InteractionPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionPair {
    #[serde(default)]
    interaction_concept: Vec<InteractionConcept>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionConcept {
    min_concept_item: MinConcept,
}

#[derive(Debug, Deserialize)]
struct MinConcept {
    rxcui: String,
    name: String,
}

/// Interaction pairs in response order, unranked.
///
/// Pairs without exactly two concepts are skipped. `default_source` names
/// groups that carry no source of their own.
pub fn parse_interactions(
    json: &str,
    default_source: &str,
) -> Result<Vec<InteractionRecord>, serde_json::Error> {
    let response: InteractionResponse = serde_json::from_str(json)?;
    let mut records = Vec::new();

    for group in response.full_interaction_type_group {
        let source = non_blank(group.source_name.as_deref())
            .unwrap_or(default_source)
            .to_string();
        for pair in group
            .full_interaction_type
            .into_iter()
            .flat_map(|t| t.interaction_pair)
        {
            let [a, b] = match <[InteractionConcept; 2]>::try_from(pair.interaction_concept) {
                Ok(concepts) => concepts,
                Err(_) => continue,
            };
            records.push(InteractionRecord {
                drug_a: InteractionDrug {
                    id: a.min_concept_item.rxcui,
                    name: a.min_concept_item.name,
                },
                drug_b: InteractionDrug {
                    id: b.min_concept_item.rxcui,
                    name: b.min_concept_item.name,
                },
                severity: InteractionSeverity::from_source_label(pair.severity.as_deref()),
                description: pair.description.unwrap_or_default(),
                source: source.clone(),
                clinical_effect: None,
                evidence_level: None,
            });
        }
    }
    Ok(records)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !values.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        values.push(value.to_string());
    }
}
