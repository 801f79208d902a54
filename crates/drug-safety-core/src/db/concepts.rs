//! Drug concept fallback store.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{DrugConcept, TermType};

/// A persisted fallback copy of a concept.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConcept {
    pub concept: DrugConcept,
    /// When the copy was last confirmed against the knowledge source
    pub last_verified: String,
}

const CONCEPT_COLUMNS: &str = "c.id, c.name, c.generic_name, c.brand_names, c.term_type, c.synonyms, \
     c.strength, c.dosage_form, c.route, c.drug_classes, c.active_ingredients, c.last_verified";

impl Database {
    /// Insert or refresh the fallback copy of a concept.
    pub fn upsert_concept(&self, concept: &DrugConcept, verified_at: &str) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO drug_concepts (
                id, name, generic_name, brand_names, term_type, synonyms,
                strength, dosage_form, route, drug_classes, active_ingredients, last_verified
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                generic_name = excluded.generic_name,
                brand_names = excluded.brand_names,
                term_type = excluded.term_type,
                synonyms = excluded.synonyms,
                strength = excluded.strength,
                dosage_form = excluded.dosage_form,
                route = excluded.route,
                drug_classes = excluded.drug_classes,
                active_ingredients = excluded.active_ingredients,
                last_verified = excluded.last_verified
            "#,
            params![
                concept.id,
                concept.name,
                concept.generic_name,
                serde_json::to_string(&concept.brand_names)?,
                concept.term_type.code(),
                serde_json::to_string(&concept.synonyms)?,
                concept.strength,
                concept.dosage_form,
                concept.route,
                serde_json::to_string(&concept.drug_classes)?,
                serde_json::to_string(&concept.active_ingredients)?,
                verified_at,
            ],
        )?;
        Ok(())
    }

    /// Get the fallback copy of a concept.
    pub fn get_concept(&self, id: &str) -> DbResult<Option<StoredConcept>> {
        let sql = format!("SELECT {} FROM drug_concepts c WHERE c.id = ?", CONCEPT_COLUMNS);
        self.conn
            .query_row(&sql, [id], concept_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Full-text search over names, brands and synonyms (BM25 ranking).
    pub fn search_concepts(&self, query: &str, limit: usize) -> DbResult<Vec<StoredConcept>> {
        let escaped_query = escape_fts_query(query);
        if escaped_query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT {}
            FROM drug_concepts c
            JOIN drug_concepts_fts fts ON c.rowid = fts.rowid
            WHERE drug_concepts_fts MATCH ?
            ORDER BY bm25(drug_concepts_fts)
            LIMIT ?
            "#,
            CONCEPT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![escaped_query, limit as i64], concept_row)?;

        let mut concepts = Vec::new();
        for row in rows {
            concepts.push(row?.try_into()?);
        }
        Ok(concepts)
    }

    /// Ids of fallback rows last verified before `cutoff`, oldest first.
    pub fn stale_concept_ids(&self, cutoff: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM drug_concepts WHERE last_verified < ? ORDER BY last_verified",
        )?;
        let ids = stmt
            .query_map([cutoff], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

fn concept_row(row: &Row<'_>) -> rusqlite::Result<ConceptRow> {
    Ok(ConceptRow {
        id: row.get(0)?,
        name: row.get(1)?,
        generic_name: row.get(2)?,
        brand_names: row.get(3)?,
        term_type: row.get(4)?,
        synonyms: row.get(5)?,
        strength: row.get(6)?,
        dosage_form: row.get(7)?,
        route: row.get(8)?,
        drug_classes: row.get(9)?,
        active_ingredients: row.get(10)?,
        last_verified: row.get(11)?,
    })
}

/// Intermediate row struct for database mapping.
struct ConceptRow {
    id: String,
    name: String,
    generic_name: Option<String>,
    brand_names: String,
    term_type: String,
    synonyms: String,
    strength: Option<String>,
    dosage_form: Option<String>,
    route: Option<String>,
    drug_classes: String,
    active_ingredients: String,
    last_verified: String,
}

impl TryFrom<ConceptRow> for StoredConcept {
    type Error = DbError;

    fn try_from(row: ConceptRow) -> Result<Self, Self::Error> {
        Ok(StoredConcept {
            concept: DrugConcept {
                id: row.id,
                name: row.name,
                generic_name: row.generic_name,
                brand_names: serde_json::from_str(&row.brand_names)?,
                term_type: TermType::from_code(&row.term_type),
                synonyms: serde_json::from_str(&row.synonyms)?,
                strength: row.strength,
                dosage_form: row.dosage_form,
                route: row.route,
                drug_classes: serde_json::from_str(&row.drug_classes)?,
                active_ingredients: serde_json::from_str(&row.active_ingredients)?,
            },
            last_verified: row.last_verified,
        })
    }
}

/// Strip FTS5 operators and turn each word into a prefix query.
///
/// Words are lowercased so `AND`/`OR`/`NOT` lose their operator meaning.
fn escape_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| format!("{}*", word.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}
