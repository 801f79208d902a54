//! Clinician overrides of interaction and allergy checks.

use serde_json::json;

use super::AuditTrail;
use crate::db::SharedDatabase;
use crate::models::{AuditAction, AuditEvent, OverrideApplication, OverrideOutcome};
use crate::{SafetyError, SafetyResult};

/// Records overrides against persisted checks.
pub struct OverrideService {
    db: SharedDatabase,
    audit: AuditTrail,
}

/// What happened to the checks named in one override call.
#[derive(Default)]
struct OverrideTally {
    applied: Vec<String>,
    already_overridden: Vec<String>,
    inserted: Vec<String>,
    severities: Vec<String>,
    finding_count: u32,
    high_severity_count: usize,
}

impl OverrideService {
    pub fn new(db: SharedDatabase, audit: AuditTrail) -> Self {
        Self { db, audit }
    }

    /// Mark each check overridden with the clinician's reason.
    ///
    /// Checks already overridden are left untouched and reported in
    /// `already_overridden`; unknown check ids get a fresh overridden row.
    /// A separately tagged high-severity event is emitted when a newly
    /// overridden check contains top-tier findings. The batch is applied
    /// atomically: if any check cannot be updated, none are.
    pub async fn record_override(
        &self,
        check_ids: &[String],
        reason: &str,
        actor_id: &str,
    ) -> SafetyResult<OverrideOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SafetyError::Validation("override reason must not be empty".into()));
        }
        let actor_id = actor_id.trim();
        if actor_id.is_empty() {
            return Err(SafetyError::Validation("override actor must not be empty".into()));
        }
        if check_ids.is_empty() || check_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(SafetyError::Validation(
                "override requires a non-empty list of non-empty check ids".into(),
            ));
        }

        let mut ids: Vec<&str> = Vec::with_capacity(check_ids.len());
        for id in check_ids.iter().map(|id| id.trim()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let timestamp = crate::now_timestamp();
        let tally = self.apply_all(&ids, reason, actor_id, &timestamp)?;

        tracing::info!(
            actor_id,
            overridden = tally.applied.len() + tally.inserted.len(),
            already_overridden = tally.already_overridden.len(),
            high_severity = tally.high_severity_count,
            "override recorded"
        );

        let resource_id = ids.join(",");
        self.audit
            .log(AuditEvent::new(
                Some(actor_id),
                AuditAction::OverrideRecorded,
                "safety_check",
                &resource_id,
                json!({
                    "reason": reason,
                    "check_ids": ids,
                    "overridden": tally.applied,
                    "inserted": tally.inserted,
                    "already_overridden": tally.already_overridden,
                    "finding_count": tally.finding_count,
                    "severities": tally.severities,
                }),
            ))
            .await;

        if tally.high_severity_count > 0 {
            tracing::warn!(actor_id, count = tally.high_severity_count, "high-severity findings overridden");
            self.audit
                .log(AuditEvent::new(
                    Some(actor_id),
                    AuditAction::HighSeverityOverride,
                    "safety_check",
                    &resource_id,
                    json!({
                        "reason": reason,
                        "check_ids": tally.applied,
                        "high_severity_count": tally.high_severity_count,
                    }),
                ))
                .await;
        }

        Ok(OverrideOutcome {
            overridden_count: tally.applied.len() + tally.inserted.len(),
            already_overridden: tally.already_overridden,
            high_severity_count: tally.high_severity_count,
            timestamp,
        })
    }

    fn apply_all(
        &self,
        ids: &[&str],
        reason: &str,
        actor_id: &str,
        timestamp: &str,
    ) -> SafetyResult<OverrideTally> {
        let outcomes = self.db.lock()?.apply_overrides(ids, reason, actor_id, timestamp)?;
        let mut tally = OverrideTally::default();

        for (&id, (check, outcome)) in ids.iter().zip(outcomes) {
            match outcome {
                OverrideApplication::Applied => {
                    if let Some(check) = check {
                        tally.high_severity_count += check.top_tier_count();
                        tally.finding_count += check.finding_count;
                        tally.severities.extend(check.severities);
                    }
                    tally.applied.push(id.to_string());
                }
                OverrideApplication::AlreadyOverridden => {
                    tally.already_overridden.push(id.to_string());
                }
                OverrideApplication::Inserted => {
                    tracing::debug!(check_id = id, "override for unrecorded check");
                    tally.inserted.push(id.to_string());
                }
            }
        }
        Ok(tally)
    }
}
