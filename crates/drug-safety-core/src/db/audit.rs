//! Append-only audit log operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{AuditAction, AuditEvent, StoredAuditEvent};

const AUDIT_COLUMNS: &str =
    "sequence, user_id, action, resource_type, resource_id, metadata, timestamp, prev_hash, entry_hash";

impl Database {
    /// Append an event to the hash chain.
    pub fn append_audit_event(&self, event: &AuditEvent) -> DbResult<StoredAuditEvent> {
        let tx = self.conn.unchecked_transaction()?;

        let prev_hash: String = tx
            .query_row(
                "SELECT entry_hash FROM audit_log ORDER BY sequence DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_default();
        let entry_hash = event.chain_hash(&prev_hash)?;

        tx.execute(
            r#"
            INSERT INTO audit_log (
                user_id, action, resource_type, resource_id, metadata,
                timestamp, prev_hash, entry_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.user_id,
                event.action.as_str(),
                event.resource_type,
                event.resource_id,
                serde_json::to_string(&event.metadata)?,
                event.timestamp,
                prev_hash,
                entry_hash,
            ],
        )?;
        let sequence = tx.last_insert_rowid();
        tx.commit()?;

        Ok(StoredAuditEvent {
            sequence,
            event: event.clone(),
            prev_hash,
            entry_hash,
        })
    }

    /// Events in sequence order, optionally bounded by timestamp (inclusive).
    pub fn list_audit_events(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> DbResult<Vec<StoredAuditEvent>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM audit_log
            WHERE (?1 IS NULL OR timestamp >= ?1)
              AND (?2 IS NULL OR timestamp <= ?2)
            ORDER BY sequence
            "#,
            AUDIT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![from, to], audit_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.try_into()?);
        }
        Ok(events)
    }

    /// Events touching one resource, in sequence order.
    pub fn audit_events_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> DbResult<Vec<StoredAuditEvent>> {
        let sql = format!(
            "SELECT {} FROM audit_log WHERE resource_type = ? AND resource_id = ? ORDER BY sequence",
            AUDIT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![resource_type, resource_id], audit_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.try_into()?);
        }
        Ok(events)
    }

    /// Delete events older than `cutoff`. Returns the number removed.
    pub fn prune_audit_events(&self, cutoff: &str) -> DbResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM audit_log WHERE timestamp < ?", [cutoff])?)
    }

    /// Number of events in the log.
    pub fn audit_event_count(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn audit_row(row: &Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok(AuditRow {
        sequence: row.get(0)?,
        user_id: row.get(1)?,
        action: row.get(2)?,
        resource_type: row.get(3)?,
        resource_id: row.get(4)?,
        metadata: row.get(5)?,
        timestamp: row.get(6)?,
        prev_hash: row.get(7)?,
        entry_hash: row.get(8)?,
    })
}

/// Intermediate row struct for database mapping.
struct AuditRow {
    sequence: i64,
    user_id: Option<String>,
    action: String,
    resource_type: String,
    resource_id: String,
    metadata: String,
    timestamp: String,
    prev_hash: String,
    entry_hash: String,
}

impl TryFrom<AuditRow> for StoredAuditEvent {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action)
            .ok_or_else(|| DbError::Constraint(format!("unknown audit action: {}", row.action)))?;

        Ok(StoredAuditEvent {
            sequence: row.sequence,
            event: AuditEvent {
                user_id: row.user_id,
                action,
                resource_type: row.resource_type,
                resource_id: row.resource_id,
                metadata: serde_json::from_str(&row.metadata)?,
                timestamp: row.timestamp,
            },
            prev_hash: row.prev_hash,
            entry_hash: row.entry_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn event_at(resource_id: &str, timestamp: &str) -> AuditEvent {
        AuditEvent {
            user_id: Some("dr-1".into()),
            action: AuditAction::AllergyCheck,
            resource_type: "patient".into(),
            resource_id: resource_id.into(),
            metadata: json!({"conflict_count": 0}),
            timestamp: timestamp.into(),
        }
    }

    #[test]
    fn test_append_links_hashes() {
        let db = setup_db();
        let first = db.append_audit_event(&event_at("p1", "2024-01-01T00:00:00.000Z")).unwrap();
        let second = db.append_audit_event(&event_at("p2", "2024-01-02T00:00:00.000Z")).unwrap();

        assert_eq!(first.prev_hash, "");
        assert_eq!(second.prev_hash, first.entry_hash);
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_list_roundtrips_events() {
        let db = setup_db();
        let event = event_at("p1", "2024-01-01T00:00:00.000Z");
        let stored = db.append_audit_event(&event).unwrap();

        let events = db.list_audit_events(None, None).unwrap();
        assert_eq!(events, vec![stored]);
        assert_eq!(events[0].event.chain_hash("").unwrap(), events[0].entry_hash);
    }

    #[test]
    fn test_list_by_range_and_resource() {
        let db = setup_db();
        db.append_audit_event(&event_at("p1", "2024-01-01T00:00:00.000Z")).unwrap();
        db.append_audit_event(&event_at("p2", "2024-02-01T00:00:00.000Z")).unwrap();
        db.append_audit_event(&event_at("p1", "2024-03-01T00:00:00.000Z")).unwrap();

        let range = db
            .list_audit_events(Some("2024-01-15T00:00:00.000Z"), Some("2024-02-15T00:00:00.000Z"))
            .unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].event.resource_id, "p2");

        assert_eq!(db.audit_events_for_resource("patient", "p1").unwrap().len(), 2);
    }

    #[test]
    fn test_prune() {
        let db = setup_db();
        db.append_audit_event(&event_at("p1", "2020-01-01T00:00:00.000Z")).unwrap();
        db.append_audit_event(&event_at("p2", "2024-01-01T00:00:00.000Z")).unwrap();

        let removed = db.prune_audit_events("2023-01-01T00:00:00.000Z").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.audit_event_count().unwrap(), 1);
    }
}
