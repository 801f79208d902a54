//! Allergy Conflict Detector.
//!
//! Matches a patient's active allergies against the drugs being considered.
//! Each (allergy, drug) pair runs through the matching stages in priority
//! order and keeps the first hit:
//!
//! ```text
//! exact (HIGH) → ingredient (HIGH) → drug class (MEDIUM) → cross-reactive (LOW)
//! ```
//!
//! Conflicts are sorted most severe allergy first. Every check that runs is
//! persisted and audited; conflicts are also stored one row each.

mod cross_reactivity;
mod registry;
pub mod stages;

pub use cross_reactivity::CrossReactivityTable;
pub use registry::AllergyRegistry;

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;

use crate::audit::AuditTrail;
use crate::cache::keys;
use crate::catalog::{DrugCatalogService, LookupSource};
use crate::db::SharedDatabase;
use crate::flags::{FeatureFlag, FeatureFlagSource};
use crate::models::{
    sort_conflicts, AllergyCheckResult, AllergyRecord, AuditAction, AuditEvent, CheckKind,
    ConflictMatch, DrugConcept, SafetyCheck,
};
use crate::{SafetyError, SafetyResult};
use stages::{default_stages, first_match, MatchContext, MatchStage};

pub struct AllergyConflictDetector {
    catalog: Arc<DrugCatalogService>,
    registry: Arc<AllergyRegistry>,
    db: SharedDatabase,
    flags: Arc<dyn FeatureFlagSource>,
    audit: AuditTrail,
    cross_reactivity: Arc<CrossReactivityTable>,
    stages: Vec<Box<dyn MatchStage>>,
}

impl AllergyConflictDetector {
    pub fn new(
        catalog: Arc<DrugCatalogService>,
        registry: Arc<AllergyRegistry>,
        db: SharedDatabase,
        flags: Arc<dyn FeatureFlagSource>,
        audit: AuditTrail,
        cross_reactivity: Arc<CrossReactivityTable>,
    ) -> Self {
        Self {
            catalog,
            registry,
            db,
            flags,
            audit,
            cross_reactivity,
            stages: default_stages(),
        }
    }

    /// Replace the matching stages. They run in the given order.
    pub fn with_stages(mut self, stages: Vec<Box<dyn MatchStage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Check a patient's active allergies against a set of drugs.
    ///
    /// The allergy-checking flag is read once at call start. A patient with
    /// no active allergies short-circuits before any drug lookup. Drugs whose
    /// details are unavailable are skipped and reported in `warnings`.
    pub async fn check_allergy_conflicts(
        &self,
        patient_id: &str,
        drug_ids: &[String],
    ) -> SafetyResult<AllergyCheckResult> {
        let enabled = self.flags.is_enabled(FeatureFlag::AllergyChecking);
        let ids = keys::normalize_ids(drug_ids);
        if !enabled {
            tracing::debug!(patient_id, "allergy checking disabled");
            return Ok(AllergyCheckResult::empty(ids));
        }

        let patient_id = patient_id.trim();
        if patient_id.is_empty() {
            return Err(SafetyError::Validation("patient id must not be empty".into()));
        }
        if drug_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(SafetyError::Validation("drug ids must not be empty".into()));
        }

        let allergies = self.registry.list_active(patient_id).await?;
        if allergies.is_empty() || ids.is_empty() {
            return Ok(self.finish(patient_id, ids, Vec::new(), Vec::new(), allergies.len()).await);
        }

        let (drugs, warnings) = self.fetch_drugs(&ids).await;

        let mut conflicts = Vec::new();
        for allergy in &allergies {
            for drug in &drugs {
                if let Some(conflict) = self.match_pair(allergy, drug) {
                    conflicts.push(conflict);
                }
            }
        }
        sort_conflicts(&mut conflicts);

        Ok(self.finish(patient_id, ids, conflicts, warnings, allergies.len()).await)
    }

    fn match_pair(&self, allergy: &AllergyRecord, drug: &DrugConcept) -> Option<ConflictMatch> {
        let ctx = MatchContext {
            allergy,
            drug,
            cross_reactivity: &self.cross_reactivity,
        };
        let hit = first_match(&self.stages, &ctx)?;
        Some(ConflictMatch {
            allergy_id: allergy.id.clone(),
            allergen_name: allergy.allergen_name.clone(),
            matched_drug_id: drug.id.clone(),
            matched_drug_name: drug.name.clone(),
            match_type: hit.match_type,
            confidence: hit.confidence,
            severity: allergy.severity,
            matched_on: hit.matched_on,
        })
    }

    /// Fetch drug details concurrently. Missing or stale details become warnings.
    async fn fetch_drugs(&self, ids: &[String]) -> (Vec<DrugConcept>, Vec<String>) {
        let lookups = join_all(ids.iter().map(|id| self.catalog.get_drug_detail(id))).await;

        let mut drugs = Vec::with_capacity(ids.len());
        let mut warnings = Vec::new();
        for (id, lookup) in ids.iter().zip(lookups) {
            match lookup {
                Ok(detail) => {
                    if detail.source == LookupSource::Fallback {
                        warnings.push(format!(
                            "Drug {} details may be outdated (last verified {})",
                            id,
                            detail.verified_at.as_deref().unwrap_or("unknown")
                        ));
                    }
                    drugs.push(detail.concept);
                }
                Err(SafetyError::NotFound(_)) => {
                    warnings.push(format!("Drug {} not found; not checked for allergies", id));
                }
                Err(e) => {
                    tracing::warn!(drug_id = %id, "drug detail unavailable: {e}");
                    warnings.push(format!("Drug {} details unavailable; not checked for allergies", id));
                }
            }
        }
        (drugs, warnings)
    }

    /// Persist and audit a completed check.
    async fn finish(
        &self,
        patient_id: &str,
        ids: Vec<String>,
        conflicts: Vec<ConflictMatch>,
        warnings: Vec<String>,
        allergy_count: usize,
    ) -> AllergyCheckResult {
        let check = SafetyCheck::new(
            CheckKind::Allergy,
            Some(patient_id.to_string()),
            ids.clone(),
            conflicts.iter().map(|c| c.severity.as_str().to_string()).collect(),
        );
        let check_id = self.persist(&check, &conflicts);

        if !conflicts.is_empty() {
            tracing::info!(patient_id, conflicts = conflicts.len(), "allergy conflicts detected");
        }
        self.audit
            .log(AuditEvent::new(
                None,
                AuditAction::AllergyCheck,
                "patient",
                patient_id,
                json!({
                    "check_id": check.check_id,
                    "drug_ids": ids,
                    "allergy_count": allergy_count,
                    "conflict_count": conflicts.len(),
                    "severities": check.severities,
                    "match_types": conflicts.iter().map(|c| c.match_type.as_str()).collect::<Vec<_>>(),
                    "degraded": !warnings.is_empty(),
                }),
            ))
            .await;

        AllergyCheckResult {
            check_id,
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            checked_at: check.created_at.clone(),
            checked_drugs: ids,
            warnings,
        }
    }

    fn persist(&self, check: &SafetyCheck, conflicts: &[ConflictMatch]) -> Option<String> {
        let result = self.db.lock().map_err(SafetyError::from).and_then(|db| {
            db.insert_check(check)?;
            if let Some(patient_id) = check.patient_id.as_deref() {
                if !conflicts.is_empty() {
                    db.insert_conflict_matches(&check.check_id, patient_id, conflicts, &check.created_at)?;
                }
            }
            Ok(())
        });
        match result {
            Ok(()) => Some(check.check_id.clone()),
            Err(e) => {
                tracing::error!(check_id = %check.check_id, "failed to persist allergy check: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::config::CacheConfig;
    use crate::db::Database;
    use crate::flags::StaticFeatureFlags;
    use crate::knowledge::mock::{MockFailure, MockKnowledgeSource};
    use crate::models::{AllergySeverity, MatchConfidence, MatchType, NewAllergy, TermType};
    use std::sync::atomic::Ordering;

    struct Fixture {
        detector: AllergyConflictDetector,
        registry: Arc<AllergyRegistry>,
        source: Arc<MockKnowledgeSource>,
        flags: Arc<StaticFeatureFlags>,
        db: SharedDatabase,
    }

    fn concept(id: &str, name: &str, ingredients: &[&str], classes: &[&str]) -> DrugConcept {
        let mut concept = DrugConcept::new(id, name, TermType::ClinicalDrug);
        concept.active_ingredients = ingredients.iter().map(|s| s.to_string()).collect();
        concept.drug_classes = classes.iter().map(|s| s.to_string()).collect();
        concept
    }

    fn fixture() -> Fixture {
        let source = Arc::new(
            MockKnowledgeSource::new()
                .with_concept(concept("1", "Penicillin V Potassium 250 MG", &["penicillin V"], &["Penicillins"]))
                .with_concept(concept("2", "Cefazolin 1 G Injection", &["cefazolin"], &["Cephalosporins"]))
                .with_concept(concept("3", "Ibuprofen 200 MG Oral Tablet", &["ibuprofen"], &["NSAIDs"]))
                .with_concept(concept("4", "Metformin 500 MG", &["metformin"], &["Biguanides"])),
        );
        let db = Database::open_in_memory().unwrap().into_shared();
        let cache = CacheLayer::local(&CacheConfig::default());
        let flags = Arc::new(StaticFeatureFlags::default());
        let audit = AuditTrail::database(db.clone());
        let catalog = Arc::new(DrugCatalogService::new(source.clone(), cache.clone(), db.clone()));
        let registry = Arc::new(AllergyRegistry::new(db.clone(), cache, catalog.clone(), audit.clone()));
        let detector = AllergyConflictDetector::new(
            catalog,
            registry.clone(),
            db.clone(),
            flags.clone(),
            audit,
            Arc::new(CrossReactivityTable::default()),
        );
        Fixture {
            detector,
            registry,
            source,
            flags,
            db,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn add(f: &Fixture, name: &str, severity: AllergySeverity) -> AllergyRecord {
        f.registry
            .add_allergy("p1", NewAllergy::drug(name, severity), "dr-1")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_allergies_skips_drug_lookups() {
        let f = fixture();
        let result = f.detector.check_allergy_conflicts("p1", &ids(&["1", "2"])).await.unwrap();
        assert!(!result.has_conflicts);
        assert!(result.check_id.is_some());
        assert_eq!(f.source.calls.detail.load(Ordering::SeqCst), 0);

        // Still audited
        let db = f.db.lock().unwrap();
        let events = db.audit_events_for_resource("patient", "p1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.action, AuditAction::AllergyCheck);
    }

    #[tokio::test]
    async fn test_penicillin_matches() {
        let f = fixture();
        add(&f, "Penicillin", AllergySeverity::Severe).await;

        let result = f
            .detector
            .check_allergy_conflicts("p1", &ids(&["1", "2", "4"]))
            .await
            .unwrap();
        assert_eq!(result.conflicts.len(), 2);

        let direct = result.conflicts.iter().find(|c| c.matched_drug_id == "1").unwrap();
        assert_eq!(direct.match_type, MatchType::Exact);
        let cross = result.conflicts.iter().find(|c| c.matched_drug_id == "2").unwrap();
        assert_eq!(cross.match_type, MatchType::CrossReactive);
        assert_eq!(cross.confidence, MatchConfidence::Low);

        let stored = f
            .db
            .lock()
            .unwrap()
            .list_conflict_matches(result.check_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_allergen_no_conflict() {
        let f = fixture();
        add(&f, "Peanuts", AllergySeverity::LifeThreatening).await;

        let result = f.detector.check_allergy_conflicts("p1", &ids(&["2"])).await.unwrap();
        assert!(!result.has_conflicts);
        assert_eq!(result.checked_drugs, ids(&["2"]));
    }

    #[tokio::test]
    async fn test_conflicts_sorted_by_severity() {
        let f = fixture();
        add(&f, "ibuprofen", AllergySeverity::Mild).await;
        add(&f, "cefazolin", AllergySeverity::LifeThreatening).await;
        add(&f, "penicillin", AllergySeverity::Moderate).await;

        let result = f
            .detector
            .check_allergy_conflicts("p1", &ids(&["3", "1", "2"]))
            .await
            .unwrap();
        let severities: Vec<_> = result.conflicts.iter().map(|c| c.severity).collect();
        assert_eq!(severities.first(), Some(&AllergySeverity::LifeThreatening));
        assert_eq!(severities.last(), Some(&AllergySeverity::Mild));
        assert!(severities.windows(2).all(|w| w[0].rank() >= w[1].rank()));
    }

    #[tokio::test]
    async fn test_disabled_flag_logs_nothing() {
        let f = fixture();
        add(&f, "Penicillin", AllergySeverity::Severe).await;
        f.flags.set(FeatureFlag::AllergyChecking, false);

        let result = f.detector.check_allergy_conflicts("p1", &ids(&["1"])).await.unwrap();
        assert!(!result.has_conflicts);
        assert!(result.check_id.is_none());
        assert_eq!(f.source.calls.detail.load(Ordering::SeqCst), 0);

        let db = f.db.lock().unwrap();
        assert!(db.audit_events_for_resource("patient", "p1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flag_read_once_per_call() {
        let f = fixture();
        add(&f, "Penicillin", AllergySeverity::Severe).await;
        f.source.set_latency(Some(std::time::Duration::from_millis(100)));

        let drugs = ids(&["1"]);
        let check = f.detector.check_allergy_conflicts("p1", &drugs);
        let toggle = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            f.flags.set(FeatureFlag::AllergyChecking, false);
        };
        let (result, ()) = tokio::join!(check, toggle);

        assert!(result.unwrap().has_conflicts);
    }

    #[tokio::test]
    async fn test_unavailable_drug_becomes_warning() {
        let f = fixture();
        add(&f, "Penicillin", AllergySeverity::Severe).await;

        // Drug 1 reaches the fallback store, then the source goes down
        f.detector.check_allergy_conflicts("p1", &ids(&["1"])).await.unwrap();
        f.source.set_failure(Some(MockFailure::Timeout));

        let result = f
            .detector
            .check_allergy_conflicts("p1", &ids(&["1", "999"]))
            .await
            .unwrap();
        // Drug 1 is still cached; 999 is neither cached nor stored
        assert!(result.has_conflicts);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("999"));
    }

    #[tokio::test]
    async fn test_blank_patient_rejected() {
        let f = fixture();
        assert!(matches!(
            f.detector.check_allergy_conflicts(" ", &ids(&["1"])).await,
            Err(SafetyError::Validation(_))
        ));
    }
}
