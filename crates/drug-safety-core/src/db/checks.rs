//! Safety check history, override and conflict-match operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{
    AllergySeverity, CheckKind, ConflictMatch, MatchConfidence, MatchType, OverrideApplication,
    SafetyCheck,
};

const CHECK_COLUMNS: &str = "check_id, kind, patient_id, drug_ids, severities, finding_count, \
     overridden, override_reason, overridden_by, overridden_at, created_at";

impl Database {
    /// Insert a check history row.
    pub fn insert_check(&self, check: &SafetyCheck) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO safety_checks (
                check_id, kind, patient_id, drug_ids, severities, finding_count,
                overridden, override_reason, overridden_by, overridden_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                check.check_id,
                check.kind.as_str(),
                check.patient_id,
                serde_json::to_string(&check.drug_ids)?,
                serde_json::to_string(&check.severities)?,
                check.finding_count,
                check.overridden,
                check.override_reason,
                check.overridden_by,
                check.overridden_at,
                check.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a check by ID.
    pub fn get_check(&self, check_id: &str) -> DbResult<Option<SafetyCheck>> {
        fetch_check(&self.conn, check_id)
    }

    /// Allergy checks for a patient, newest first.
    pub fn list_checks_for_patient(&self, patient_id: &str) -> DbResult<Vec<SafetyCheck>> {
        let sql = format!(
            "SELECT {} FROM safety_checks WHERE patient_id = ? ORDER BY created_at DESC, check_id",
            CHECK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], check_row)?;

        let mut checks = Vec::new();
        for row in rows {
            checks.push(row?.try_into()?);
        }
        Ok(checks)
    }

    /// Mark every check overridden, at most once each, in one transaction.
    ///
    /// Rows already overridden are left untouched. A check id with no row
    /// gets a fresh row with the override already applied. Any failure rolls
    /// back the whole batch. Each entry carries the check as it was before
    /// the override.
    pub fn apply_overrides(
        &mut self,
        check_ids: &[&str],
        reason: &str,
        overridden_by: &str,
        overridden_at: &str,
    ) -> DbResult<Vec<(Option<SafetyCheck>, OverrideApplication)>> {
        let tx = self.transaction()?;
        let mut outcomes = Vec::with_capacity(check_ids.len());
        for &check_id in check_ids {
            let prior = fetch_check(&tx, check_id)?;
            let outcome = override_one(&tx, check_id, reason, overridden_by, overridden_at)?;
            outcomes.push((prior, outcome));
        }
        tx.commit()?;
        Ok(outcomes)
    }

    /// Persist one row per detected conflict.
    pub fn insert_conflict_matches(
        &self,
        check_id: &str,
        patient_id: &str,
        conflicts: &[ConflictMatch],
        created_at: &str,
    ) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO conflict_matches (
                    check_id, patient_id, allergy_id, allergen_name, matched_drug_id,
                    matched_drug_name, match_type, confidence, severity, matched_on, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            for conflict in conflicts {
                stmt.execute(params![
                    check_id,
                    patient_id,
                    conflict.allergy_id,
                    conflict.allergen_name,
                    conflict.matched_drug_id,
                    conflict.matched_drug_name,
                    conflict.match_type.as_str(),
                    conflict.confidence.as_str(),
                    conflict.severity.as_str(),
                    conflict.matched_on,
                    created_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Conflicts persisted for a check, in insertion order.
    pub fn list_conflict_matches(&self, check_id: &str) -> DbResult<Vec<ConflictMatch>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT allergy_id, allergen_name, matched_drug_id, matched_drug_name,
                   match_type, confidence, severity, matched_on
            FROM conflict_matches
            WHERE check_id = ?
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([check_id], |row| {
            Ok(ConflictRow {
                allergy_id: row.get(0)?,
                allergen_name: row.get(1)?,
                matched_drug_id: row.get(2)?,
                matched_drug_name: row.get(3)?,
                match_type: row.get(4)?,
                confidence: row.get(5)?,
                severity: row.get(6)?,
                matched_on: row.get(7)?,
            })
        })?;

        let mut conflicts = Vec::new();
        for row in rows {
            conflicts.push(row?.try_into()?);
        }
        Ok(conflicts)
    }
}

fn fetch_check(conn: &Connection, check_id: &str) -> DbResult<Option<SafetyCheck>> {
    let sql = format!("SELECT {} FROM safety_checks WHERE check_id = ?", CHECK_COLUMNS);
    conn.query_row(&sql, [check_id], check_row)
        .optional()?
        .map(|row| row.try_into())
        .transpose()
}

/// Override one check inside the caller's transaction.
fn override_one(
    conn: &Connection,
    check_id: &str,
    reason: &str,
    overridden_by: &str,
    overridden_at: &str,
) -> DbResult<OverrideApplication> {
    let updated = conn.execute(
        r#"
        UPDATE safety_checks SET
            overridden = 1,
            override_reason = ?2,
            overridden_by = ?3,
            overridden_at = ?4
        WHERE check_id = ?1 AND overridden = 0
        "#,
        params![check_id, reason, overridden_by, overridden_at],
    )?;
    if updated > 0 {
        return Ok(OverrideApplication::Applied);
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM safety_checks WHERE check_id = ?)",
        [check_id],
        |row| row.get(0),
    )?;
    if exists {
        return Ok(OverrideApplication::AlreadyOverridden);
    }

    conn.execute(
        r#"
        INSERT INTO safety_checks (
            check_id, kind, overridden, override_reason,
            overridden_by, overridden_at, created_at
        ) VALUES (?1, 'unknown', 1, ?2, ?3, ?4, ?4)
        "#,
        params![check_id, reason, overridden_by, overridden_at],
    )?;
    Ok(OverrideApplication::Inserted)
}

fn check_row(row: &Row<'_>) -> rusqlite::Result<CheckRow> {
    Ok(CheckRow {
        check_id: row.get(0)?,
        kind: row.get(1)?,
        patient_id: row.get(2)?,
        drug_ids: row.get(3)?,
        severities: row.get(4)?,
        finding_count: row.get(5)?,
        overridden: row.get(6)?,
        override_reason: row.get(7)?,
        overridden_by: row.get(8)?,
        overridden_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Intermediate row struct for database mapping.
struct CheckRow {
    check_id: String,
    kind: String,
    patient_id: Option<String>,
    drug_ids: String,
    severities: String,
    finding_count: u32,
    overridden: bool,
    override_reason: Option<String>,
    overridden_by: Option<String>,
    overridden_at: Option<String>,
    created_at: String,
}

impl TryFrom<CheckRow> for SafetyCheck {
    type Error = DbError;

    fn try_from(row: CheckRow) -> Result<Self, Self::Error> {
        Ok(SafetyCheck {
            check_id: row.check_id,
            kind: CheckKind::parse(&row.kind),
            patient_id: row.patient_id,
            drug_ids: serde_json::from_str(&row.drug_ids)?,
            severities: serde_json::from_str(&row.severities)?,
            finding_count: row.finding_count,
            overridden: row.overridden,
            override_reason: row.override_reason,
            overridden_by: row.overridden_by,
            overridden_at: row.overridden_at,
            created_at: row.created_at,
        })
    }
}

struct ConflictRow {
    allergy_id: String,
    allergen_name: String,
    matched_drug_id: String,
    matched_drug_name: String,
    match_type: String,
    confidence: String,
    severity: String,
    matched_on: String,
}

impl TryFrom<ConflictRow> for ConflictMatch {
    type Error = DbError;

    fn try_from(row: ConflictRow) -> Result<Self, Self::Error> {
        let match_type = match row.match_type.as_str() {
            "EXACT" => MatchType::Exact,
            "INGREDIENT" => MatchType::Ingredient,
            "DRUG_CLASS" => MatchType::DrugClass,
            "CROSS_REACTIVE" => MatchType::CrossReactive,
            other => return Err(DbError::Constraint(format!("unknown match type: {}", other))),
        };
        let confidence = match row.confidence.as_str() {
            "HIGH" => MatchConfidence::High,
            "MEDIUM" => MatchConfidence::Medium,
            "LOW" => MatchConfidence::Low,
            other => return Err(DbError::Constraint(format!("unknown confidence: {}", other))),
        };

        Ok(ConflictMatch {
            allergy_id: row.allergy_id,
            allergen_name: row.allergen_name,
            matched_drug_id: row.matched_drug_id,
            matched_drug_name: row.matched_drug_name,
            match_type,
            confidence,
            severity: AllergySeverity::parse(&row.severity),
            matched_on: row.matched_on,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get_check() {
        let db = setup_db();
        let check = SafetyCheck::new(
            CheckKind::Interaction,
            None,
            vec!["1".into(), "2".into()],
            vec!["HIGH".into()],
        );
        db.insert_check(&check).unwrap();

        let retrieved = db.get_check(&check.check_id).unwrap().unwrap();
        assert_eq!(retrieved, check);
    }

    #[test]
    fn test_apply_override_once() {
        let mut db = setup_db();
        let check = SafetyCheck::new(CheckKind::Allergy, Some("p1".into()), vec![], vec![]);
        db.insert_check(&check).unwrap();
        let id = check.check_id.as_str();

        let first = db
            .apply_overrides(&[id], "benefit outweighs risk", "dr-1", "2024-01-01T00:00:00.000Z")
            .unwrap();
        assert_eq!(first[0].1, OverrideApplication::Applied);
        assert_eq!(first[0].0.as_ref().map(|c| c.overridden), Some(false));

        let second = db
            .apply_overrides(&[id], "different reason", "dr-2", "2024-01-02T00:00:00.000Z")
            .unwrap();
        assert_eq!(second[0].1, OverrideApplication::AlreadyOverridden);

        // First override wins
        let retrieved = db.get_check(id).unwrap().unwrap();
        assert!(retrieved.overridden);
        assert_eq!(retrieved.override_reason.as_deref(), Some("benefit outweighs risk"));
        assert_eq!(retrieved.overridden_by.as_deref(), Some("dr-1"));
    }

    #[test]
    fn test_apply_override_inserts_missing_check() {
        let mut db = setup_db();
        let outcome = db
            .apply_overrides(&["synthetic-1"], "reviewed", "dr-1", "2024-01-01T00:00:00.000Z")
            .unwrap();
        assert_eq!(outcome[0], (None, OverrideApplication::Inserted));

        let retrieved = db.get_check("synthetic-1").unwrap().unwrap();
        assert_eq!(retrieved.kind, CheckKind::Unknown);
        assert!(retrieved.overridden);

        let again = db
            .apply_overrides(&["synthetic-1"], "reviewed", "dr-1", "2024-01-01T00:00:00.000Z")
            .unwrap();
        assert_eq!(again[0].1, OverrideApplication::AlreadyOverridden);
    }

    #[test]
    fn test_apply_overrides_rolls_back_on_bad_row() {
        let mut db = setup_db();
        let good = SafetyCheck::new(CheckKind::Interaction, None, vec![], vec!["HIGH".into()]);
        db.insert_check(&good).unwrap();
        db.conn()
            .execute(
                "INSERT INTO safety_checks (check_id, kind, drug_ids, created_at) \
                 VALUES ('bad', 'interaction', 'not json', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();

        let result = db.apply_overrides(
            &[good.check_id.as_str(), "bad"],
            "reason",
            "dr-1",
            "2024-01-02T00:00:00.000Z",
        );
        assert!(matches!(result, Err(DbError::Json(_))));
        assert!(!db.get_check(&good.check_id).unwrap().unwrap().overridden);
    }

    #[test]
    fn test_conflict_matches_roundtrip() {
        let db = setup_db();
        let conflict = ConflictMatch {
            allergy_id: "a1".into(),
            allergen_name: "Penicillin".into(),
            matched_drug_id: "2231".into(),
            matched_drug_name: "Cephalexin".into(),
            match_type: MatchType::CrossReactive,
            confidence: MatchConfidence::Low,
            severity: AllergySeverity::Severe,
            matched_on: "cephalosporin".into(),
        };
        db.insert_conflict_matches("c1", "p1", &[conflict.clone()], "2024-01-01T00:00:00.000Z")
            .unwrap();

        let stored = db.list_conflict_matches("c1").unwrap();
        assert_eq!(stored, vec![conflict]);
        assert!(db.list_conflict_matches("c2").unwrap().is_empty());
    }

    #[test]
    fn test_list_checks_for_patient() {
        let db = setup_db();
        db.insert_check(&SafetyCheck::new(CheckKind::Allergy, Some("p1".into()), vec![], vec![]))
            .unwrap();
        db.insert_check(&SafetyCheck::new(CheckKind::Allergy, Some("p2".into()), vec![], vec![]))
            .unwrap();
        db.insert_check(&SafetyCheck::new(CheckKind::Interaction, None, vec![], vec![]))
            .unwrap();

        let checks = db.list_checks_for_patient("p1").unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].patient_id.as_deref(), Some("p1"));
    }
}
