//! Patient allergy database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{normalize_allergen, AllergenType, AllergyRecord, AllergySeverity};

const ALLERGY_COLUMNS: &str = "id, patient_id, allergen_name, allergen_type, allergen_concept_id, \
     severity, reaction, is_active, verified_by, created_at, updated_at";

impl Database {
    /// Insert a new allergy record.
    pub fn insert_allergy(&self, record: &AllergyRecord) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO allergies (
                id, patient_id, allergen_name, allergen_name_normalized, allergen_type,
                allergen_concept_id, severity, reaction, is_active, verified_by,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.id,
                record.patient_id,
                record.allergen_name,
                record.normalized_allergen(),
                record.allergen_type.as_str(),
                record.allergen_concept_id,
                record.severity.as_str(),
                record.reaction,
                record.is_active,
                record.verified_by,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get an allergy by ID, active or not.
    pub fn get_allergy(&self, id: &str) -> DbResult<Option<AllergyRecord>> {
        let sql = format!("SELECT {} FROM allergies WHERE id = ?", ALLERGY_COLUMNS);
        self.conn
            .query_row(&sql, [id], allergy_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Find the active allergy for a patient by case-insensitive allergen name.
    ///
    /// Case folding happens in Rust on both sides; SQLite's `lower()` only
    /// folds ASCII.
    pub fn find_active_allergy(
        &self,
        patient_id: &str,
        allergen_name: &str,
    ) -> DbResult<Option<AllergyRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM allergies
            WHERE patient_id = ?1
              AND is_active = 1
              AND allergen_name_normalized = ?2
            ORDER BY created_at
            LIMIT 1
            "#,
            ALLERGY_COLUMNS
        );
        let needle = normalize_allergen(allergen_name);
        self.conn
            .query_row(&sql, params![patient_id, needle], allergy_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List a patient's active allergies, oldest first.
    pub fn list_active_allergies(&self, patient_id: &str) -> DbResult<Vec<AllergyRecord>> {
        let sql = format!(
            "SELECT {} FROM allergies WHERE patient_id = ? AND is_active = 1 ORDER BY created_at, id",
            ALLERGY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], allergy_row)?;

        let mut allergies = Vec::new();
        for row in rows {
            allergies.push(row?.try_into()?);
        }
        Ok(allergies)
    }

    /// Write the mutable fields of an allergy back.
    pub fn update_allergy(&self, record: &AllergyRecord) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE allergies SET
                allergen_concept_id = ?2,
                severity = ?3,
                reaction = ?4,
                verified_by = ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                record.id,
                record.allergen_concept_id,
                record.severity.as_str(),
                record.reaction,
                record.verified_by,
                record.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Soft delete. Returns false if the record is absent or already inactive.
    pub fn deactivate_allergy(&self, id: &str, at: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE allergies SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
            params![id, at],
        )?;
        Ok(rows_affected > 0)
    }
}

fn allergy_row(row: &Row<'_>) -> rusqlite::Result<AllergyRow> {
    Ok(AllergyRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        allergen_name: row.get(2)?,
        allergen_type: row.get(3)?,
        allergen_concept_id: row.get(4)?,
        severity: row.get(5)?,
        reaction: row.get(6)?,
        is_active: row.get(7)?,
        verified_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Intermediate row struct for database mapping.
struct AllergyRow {
    id: String,
    patient_id: String,
    allergen_name: String,
    allergen_type: String,
    allergen_concept_id: Option<String>,
    severity: String,
    reaction: Option<String>,
    is_active: bool,
    verified_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AllergyRow> for AllergyRecord {
    type Error = DbError;

    fn try_from(row: AllergyRow) -> Result<Self, Self::Error> {
        Ok(AllergyRecord {
            id: row.id,
            patient_id: row.patient_id,
            allergen_name: row.allergen_name,
            allergen_type: AllergenType::parse(&row.allergen_type),
            allergen_concept_id: row.allergen_concept_id,
            severity: AllergySeverity::parse(&row.severity),
            reaction: row.reaction,
            is_active: row.is_active,
            verified_by: row.verified_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
