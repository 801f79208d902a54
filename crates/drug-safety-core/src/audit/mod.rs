//! Override & Audit subsystem.
//!
//! Audit events are appended to a hash-chained log. Each entry stores the
//! previous entry's hash, so any edit or reordering breaks verification from
//! that entry on.
//!
//! Writes go through [`AuditTrail::log`], which never fails: a sink error is
//! logged and dropped so the clinical action that triggered it completes.

mod export;
mod overrides;

pub use export::{AuditExport, AuditExportMetadata, AuditExporter};
pub use overrides::OverrideService;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, DbError, DbResult, SharedDatabase};
use crate::models::AuditEvent;

/// Audit sink errors. Never escape [`AuditTrail`].
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

/// Destination for structured audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Appends to the `audit_log` table.
pub struct DatabaseAuditSink {
    db: SharedDatabase,
}

impl DatabaseAuditSink {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for DatabaseAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let db = self.db.lock().map_err(|e| AuditError::Lock(e.to_string()))?;
        db.append_audit_event(event)?;
        Ok(())
    }
}

/// Fire-and-forget audit handle shared by the services.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Audit trail writing to the shared store.
    pub fn database(db: SharedDatabase) -> Self {
        Self::new(Arc::new(DatabaseAuditSink::new(db)))
    }

    /// Record an event. Failures are logged, never returned.
    pub async fn log(&self, event: AuditEvent) {
        if let Err(e) = self.sink.record(&event).await {
            tracing::error!(
                action = event.action.as_str(),
                resource_type = %event.resource_type,
                resource_id = %event.resource_id,
                "audit write failed: {e}"
            );
        }
    }
}

/// Result of walking the audit hash chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    /// Entries examined
    pub checked: usize,
    /// First entry whose link or hash does not verify
    pub first_invalid_sequence: Option<i64>,
}

/// Verify every entry in the audit log.
///
/// The first surviving entry anchors the chain on its stored `prev_hash`, so
/// a log pruned by retention still verifies.
pub fn verify_chain(db: &Database) -> DbResult<ChainVerification> {
    let events = db.list_audit_events(None, None)?;

    let mut expected_prev: Option<&str> = None;
    for (checked, stored) in events.iter().enumerate() {
        let linked = expected_prev.map_or(true, |prev| prev == stored.prev_hash);
        let hashed = stored.event.chain_hash(&stored.prev_hash)? == stored.entry_hash;
        if !(linked && hashed) {
            tracing::warn!(sequence = stored.sequence, "audit chain broken");
            return Ok(ChainVerification {
                valid: false,
                checked: checked + 1,
                first_invalid_sequence: Some(stored.sequence),
            });
        }
        expected_prev = Some(&stored.entry_hash);
    }

    Ok(ChainVerification {
        valid: true,
        checked: events.len(),
        first_invalid_sequence: None,
    })
}

/// Delete audit entries older than `retention_days`. Returns the number removed.
pub fn prune(db: &Database, retention_days: u32) -> DbResult<usize> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days)))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let removed = db.prune_audit_events(&cutoff)?;
    if removed > 0 {
        tracing::info!(removed, retention_days, "pruned audit entries");
    }
    Ok(removed)
}
