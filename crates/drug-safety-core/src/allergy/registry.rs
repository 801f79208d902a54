//! Patient allergy records.

use std::sync::Arc;

use serde_json::json;

use crate::audit::AuditTrail;
use crate::cache::{keys, CacheLayer, EntryKind};
use crate::catalog::DrugCatalogService;
use crate::db::SharedDatabase;
use crate::models::{
    AllergenType, AllergyRecord, AllergySeverity, AllergyUpdate, AuditAction, AuditEvent,
    NewAllergy,
};
use crate::{SafetyError, SafetyResult};

/// Creates, updates and soft-deletes allergy records.
///
/// Every mutation drops the patient's cached allergy list and is audited.
/// The duplicate check is a read followed by a separate insert, so two
/// concurrent adds for the same allergen can both succeed.
pub struct AllergyRegistry {
    db: SharedDatabase,
    cache: CacheLayer,
    catalog: Arc<DrugCatalogService>,
    audit: AuditTrail,
}

impl AllergyRegistry {
    pub fn new(
        db: SharedDatabase,
        cache: CacheLayer,
        catalog: Arc<DrugCatalogService>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            db,
            cache,
            catalog,
            audit,
        }
    }

    /// Record a new active allergy.
    ///
    /// Fails with [`SafetyError::Duplicate`] if the patient already has an
    /// active allergy with the same name, ignoring case. Drug allergens with
    /// no concept id get one resolved from the catalog when possible.
    pub async fn add_allergy(
        &self,
        patient_id: &str,
        input: NewAllergy,
        actor_id: &str,
    ) -> SafetyResult<AllergyRecord> {
        let patient_id = non_empty(patient_id, "patient id")?;
        let allergen_name = non_empty(&input.allergen_name, "allergen name")?.to_string();
        if input.severity == AllergySeverity::Unknown {
            return Err(SafetyError::Validation("allergy severity is required".into()));
        }

        if self.find_active(patient_id, &allergen_name)?.is_some() {
            return Err(SafetyError::Duplicate {
                patient_id: patient_id.to_string(),
                allergen_name,
            });
        }

        let mut record = AllergyRecord::new(patient_id.to_string(), input);
        if record.allergen_type == AllergenType::Drug && record.allergen_concept_id.is_none() {
            match self.catalog.resolve_drug_name(&allergen_name).await {
                Ok(concept) => record.allergen_concept_id = Some(concept.id),
                Err(e) => tracing::debug!(allergen = %allergen_name, "allergen not resolved to a drug concept: {e}"),
            }
        }

        self.db.lock()?.insert_allergy(&record)?;
        self.invalidate(patient_id).await;

        tracing::info!(allergy_id = %record.id, patient_id, "allergy recorded");
        self.audit
            .log(AuditEvent::new(
                Some(actor_id),
                AuditAction::AllergyCreated,
                "allergy",
                &record.id,
                json!({
                    "patient_id": record.patient_id,
                    "allergen_name": record.allergen_name,
                    "allergen_type": record.allergen_type.as_str(),
                    "allergen_concept_id": record.allergen_concept_id,
                    "severity": record.severity.as_str(),
                }),
            ))
            .await;

        Ok(record)
    }

    /// Apply a partial update to an active allergy.
    pub async fn update_allergy(
        &self,
        allergy_id: &str,
        update: AllergyUpdate,
        actor_id: &str,
    ) -> SafetyResult<AllergyRecord> {
        let mut record = self.get_active(allergy_id)?;
        let previous_severity = record.severity;

        if let Some(severity) = update.severity {
            if severity == AllergySeverity::Unknown {
                return Err(SafetyError::Validation("allergy severity is required".into()));
            }
            record.severity = severity;
        }
        if update.reaction.is_some() {
            record.reaction = update.reaction;
        }
        if update.allergen_concept_id.is_some() {
            record.allergen_concept_id = update.allergen_concept_id;
        }
        record.updated_at = crate::now_timestamp();

        self.db.lock()?.update_allergy(&record)?;
        self.invalidate(&record.patient_id).await;

        self.audit
            .log(AuditEvent::new(
                Some(actor_id),
                AuditAction::AllergyUpdated,
                "allergy",
                &record.id,
                json!({
                    "patient_id": record.patient_id,
                    "previous_severity": previous_severity.as_str(),
                    "severity": record.severity.as_str(),
                    "reaction": record.reaction,
                    "allergen_concept_id": record.allergen_concept_id,
                }),
            ))
            .await;

        Ok(record)
    }

    /// Soft delete. Deactivating an inactive record is a no-op.
    pub async fn deactivate_allergy(&self, allergy_id: &str, actor_id: &str) -> SafetyResult<()> {
        let record = self.get(allergy_id)?;
        if !record.is_active {
            return Ok(());
        }

        let deactivated = self
            .db
            .lock()?
            .deactivate_allergy(&record.id, &crate::now_timestamp())?;
        self.invalidate(&record.patient_id).await;

        if deactivated {
            tracing::info!(allergy_id = %record.id, patient_id = %record.patient_id, "allergy deactivated");
            self.audit
                .log(AuditEvent::new(
                    Some(actor_id),
                    AuditAction::AllergyDeactivated,
                    "allergy",
                    &record.id,
                    json!({
                        "patient_id": record.patient_id,
                        "allergen_name": record.allergen_name,
                    }),
                ))
                .await;
        }
        Ok(())
    }

    /// Mark an active allergy as verified by a clinician.
    pub async fn verify_allergy(&self, allergy_id: &str, verifier_id: &str) -> SafetyResult<AllergyRecord> {
        let verifier_id = non_empty(verifier_id, "verifier id")?;
        let mut record = self.get_active(allergy_id)?;
        record.verified_by = Some(verifier_id.to_string());
        record.updated_at = crate::now_timestamp();

        self.db.lock()?.update_allergy(&record)?;
        self.invalidate(&record.patient_id).await;

        self.audit
            .log(AuditEvent::new(
                Some(verifier_id),
                AuditAction::AllergyVerified,
                "allergy",
                &record.id,
                json!({ "patient_id": record.patient_id }),
            ))
            .await;

        Ok(record)
    }

    /// A patient's active allergies, oldest first. Cached briefly.
    pub async fn list_active(&self, patient_id: &str) -> SafetyResult<Vec<AllergyRecord>> {
        let patient_id = non_empty(patient_id, "patient id")?;
        self.cache
            .get_or_compute(
                &keys::patient_allergies(patient_id),
                self.cache.ttl(EntryKind::PatientAllergies),
                || async { self.load_active(patient_id) },
            )
            .await
    }

    fn load_active(&self, patient_id: &str) -> SafetyResult<Vec<AllergyRecord>> {
        let db = self.db.lock()?;
        Ok(db.list_active_allergies(patient_id)?)
    }

    fn find_active(&self, patient_id: &str, allergen_name: &str) -> SafetyResult<Option<AllergyRecord>> {
        let db = self.db.lock()?;
        Ok(db.find_active_allergy(patient_id, allergen_name)?)
    }

    fn get(&self, allergy_id: &str) -> SafetyResult<AllergyRecord> {
        let db = self.db.lock()?;
        db.get_allergy(allergy_id)?
            .ok_or_else(|| SafetyError::NotFound(format!("allergy {}", allergy_id)))
    }

    fn get_active(&self, allergy_id: &str) -> SafetyResult<AllergyRecord> {
        let record = self.get(allergy_id)?;
        if !record.is_active {
            return Err(SafetyError::Validation(format!(
                "allergy {} is no longer active",
                allergy_id
            )));
        }
        Ok(record)
    }

    async fn invalidate(&self, patient_id: &str) {
        self.cache.delete(&keys::patient_allergies(patient_id)).await;
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> SafetyResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SafetyError::Validation(format!("{} must not be empty", what)));
    }
    Ok(value)
}
