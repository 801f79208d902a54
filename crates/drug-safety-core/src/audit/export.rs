//! Audit log export for compliance review.

use serde::{Deserialize, Serialize};

use super::{verify_chain, ChainVerification};
use crate::db::{Database, DbResult};
use crate::models::StoredAuditEvent;

/// Export metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExportMetadata {
    /// Export format version
    pub format_version: String,
    /// Export timestamp
    pub exported_at: String,
    /// Hash algorithm used for the chain
    pub hash_algorithm: String,
    /// Exporting system identifier
    pub system_id: Option<String>,
    /// Events in this export
    pub event_count: usize,
    /// Verification of the full chain at export time
    pub chain: ChainVerification,
}

/// A set of audit events with the metadata needed to check them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    pub metadata: AuditExportMetadata,
    pub events: Vec<StoredAuditEvent>,
}

impl AuditExport {
    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Audit exporter.
pub struct AuditExporter<'a> {
    db: &'a Database,
    system_id: Option<String>,
}

impl<'a> AuditExporter<'a> {
    pub fn new(db: &'a Database, system_id: Option<String>) -> Self {
        Self { db, system_id }
    }

    /// Export every event.
    pub fn export_all(&self) -> DbResult<AuditExport> {
        self.export_range(None, None)
    }

    /// Export events with `from <= timestamp <= to`. Either bound may be open.
    pub fn export_range(&self, from: Option<&str>, to: Option<&str>) -> DbResult<AuditExport> {
        let events = self.db.list_audit_events(from, to)?;
        let chain = verify_chain(self.db)?;

        Ok(AuditExport {
            metadata: AuditExportMetadata {
                format_version: "1.0".to_string(),
                exported_at: crate::now_timestamp(),
                hash_algorithm: "SHA-256".to_string(),
                system_id: self.system_id.clone(),
                event_count: events.len(),
                chain,
            },
            events,
        })
    }
}
