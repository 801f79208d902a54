//! Periodic housekeeping: cache eviction and audit retention.
//!
//! Neither job is needed for correctness. Cache expiry is lazy and retention
//! only bounds the size of the audit log.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::audit;
use crate::cache::CacheLayer;
use crate::db::SharedDatabase;
use crate::SafetyResult;

/// Shortest interval the housekeeping task will run at.
pub const MIN_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Audit entries removed by retention
    pub pruned: usize,
}

/// Run cache maintenance and audit pruning once.
pub async fn run_maintenance_once(
    cache: &CacheLayer,
    db: &SharedDatabase,
    retention_days: u32,
) -> SafetyResult<MaintenanceReport> {
    cache.run_maintenance().await;
    let pruned = {
        let db = db.lock()?;
        audit::prune(&db, retention_days)?
    };
    Ok(MaintenanceReport { pruned })
}

/// Spawn a task that runs maintenance every `every`. The first pass runs
/// after one full interval. Abort the handle to stop it.
///
/// A zero interval is raised to [`MIN_MAINTENANCE_INTERVAL`].
pub fn spawn_maintenance(
    every: Duration,
    cache: CacheLayer,
    db: SharedDatabase,
    retention_days: u32,
) -> JoinHandle<()> {
    let every = if every.is_zero() {
        tracing::warn!(
            interval_ms = MIN_MAINTENANCE_INTERVAL.as_millis() as u64,
            "zero maintenance interval requested, using minimum"
        );
        MIN_MAINTENANCE_INTERVAL
    } else {
        every
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match run_maintenance_once(&cache, &db, retention_days).await {
                Ok(report) => tracing::debug!(pruned = report.pruned, "maintenance pass complete"),
                Err(e) => tracing::error!("maintenance pass failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::db::Database;
    use crate::models::{AuditAction, AuditEvent};

    fn seed_old_event(db: &SharedDatabase) {
        let mut event = AuditEvent::new(
            None,
            AuditAction::InteractionCheck,
            "safety_check",
            "old",
            serde_json::json!({}),
        );
        event.timestamp = "2001-01-01T00:00:00.000Z".into();
        db.lock().unwrap().append_audit_event(&event).unwrap();
    }

    #[tokio::test]
    async fn test_run_once_prunes() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let cache = CacheLayer::local(&CacheConfig::default());
        seed_old_event(&db);

        let report = run_maintenance_once(&cache, &db, 30).await.unwrap();
        assert_eq!(report.pruned, 1);

        let report = run_maintenance_once(&cache, &db, 30).await.unwrap();
        assert_eq!(report.pruned, 0);
    }

    #[tokio::test]
    async fn test_spawned_task_runs() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let cache = CacheLayer::local(&CacheConfig::default());
        seed_old_event(&db);

        let handle = spawn_maintenance(Duration::from_millis(20), cache, db.clone(), 30);
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert_eq!(db.lock().unwrap().audit_event_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let cache = CacheLayer::local(&CacheConfig::default());

        let handle = spawn_maintenance(Duration::ZERO, cache, db, 30);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A panic inside the task would have finished it
        assert!(!handle.is_finished());
        handle.abort();
    }
}
