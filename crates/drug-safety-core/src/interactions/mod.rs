//! Interaction Checker.
//!
//! Ranked drug-drug interaction warnings for a set of drug ids. Results are
//! cached under an order-independent key; an unreachable knowledge source
//! yields an empty result with a warning instead of an error.

use std::sync::Arc;

use serde_json::json;

use crate::audit::AuditTrail;
use crate::cache::{keys, CacheLayer, EntryKind};
use crate::catalog::DrugCatalogService;
use crate::db::SharedDatabase;
use crate::flags::{FeatureFlag, FeatureFlagSource};
use crate::knowledge::{ExternalServiceError, KnowledgeResult};
use crate::models::{
    sort_by_severity, AuditAction, AuditEvent, CheckKind, InteractionCheckResult,
    InteractionRecord, SafetyCheck,
};
use crate::{SafetyError, SafetyResult};

pub struct InteractionChecker {
    catalog: Arc<DrugCatalogService>,
    cache: CacheLayer,
    db: SharedDatabase,
    flags: Arc<dyn FeatureFlagSource>,
    audit: AuditTrail,
}

impl InteractionChecker {
    pub fn new(
        catalog: Arc<DrugCatalogService>,
        cache: CacheLayer,
        db: SharedDatabase,
        flags: Arc<dyn FeatureFlagSource>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            catalog,
            cache,
            db,
            flags,
            audit,
        }
    }

    /// Check a set of drug ids for pairwise interactions.
    ///
    /// Ids are trimmed and deduplicated. Fewer than two distinct ids return an
    /// empty result without any lookup. When interaction checking is disabled
    /// nothing is read from the cache or the knowledge source.
    pub async fn check_interactions(&self, drug_ids: &[String]) -> SafetyResult<InteractionCheckResult> {
        let enabled = self.flags.is_enabled(FeatureFlag::InteractionChecking);
        let ids = keys::normalize_ids(drug_ids);
        if !enabled {
            tracing::debug!("interaction checking disabled");
            return Ok(InteractionCheckResult::empty(ids.len()));
        }

        if drug_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(SafetyError::Validation("drug ids must not be empty".into()));
        }
        if ids.len() < 2 {
            return Ok(InteractionCheckResult::empty(ids.len()));
        }

        let mut warnings = Vec::new();
        let interactions = match self.lookup(&ids).await {
            Ok(interactions) => interactions,
            Err(e) => {
                tracing::warn!(drug_count = ids.len(), endpoint = %e.endpoint, "interaction lookup failed: {e}");
                warnings.push(format!(
                    "Interaction data unavailable ({}); interactions could not be verified",
                    e.kind
                ));
                Vec::new()
            }
        };

        let check = SafetyCheck::new(
            CheckKind::Interaction,
            None,
            ids.clone(),
            interactions.iter().map(|i| i.severity.as_str().to_string()).collect(),
        );
        let check_id = self.persist(&check);

        let result = InteractionCheckResult {
            check_id,
            has_interactions: !interactions.is_empty(),
            interactions,
            checked_at: check.created_at.clone(),
            drug_count: ids.len(),
            warnings,
        };

        self.audit
            .log(AuditEvent::new(
                None,
                AuditAction::InteractionCheck,
                "safety_check",
                &check.check_id,
                json!({
                    "drug_ids": ids,
                    "interaction_count": result.interactions.len(),
                    "highest_severity": result.highest_severity().map(|s| s.as_str()),
                    "severities": check.severities,
                    "degraded": !result.warnings.is_empty(),
                }),
            ))
            .await;

        Ok(result)
    }

    /// Cached interaction lookup. Failures are not cached.
    async fn lookup(&self, ids: &[String]) -> KnowledgeResult<Vec<InteractionRecord>> {
        let key = keys::interactions(ids);
        self.cache
            .get_or_compute(&key, self.cache.ttl(EntryKind::Interactions), || async {
                let mut records = self.catalog.lookup_interactions(ids).await?;
                sort_by_severity(&mut records);
                Ok::<_, ExternalServiceError>(records)
            })
            .await
    }

    fn persist(&self, check: &SafetyCheck) -> Option<String> {
        let result = self
            .db
            .lock()
            .map_err(SafetyError::from)
            .and_then(|db| Ok(db.insert_check(check)?));
        match result {
            Ok(()) => Some(check.check_id.clone()),
            Err(e) => {
                tracing::error!(check_id = %check.check_id, "failed to persist interaction check: {e}");
                None
            }
        }
    }
}
