//! Drug Safety Core Library
//!
//! Drug-drug interaction and allergy conflict verification against a slow,
//! rate-limited pharmacological knowledge source.
//!
//! # Architecture
//!
//! ```text
//!                 prescribing workflow
//!                          │
//!          ┌───────────────┴───────────────┐
//!          ▼                               ▼
//!  InteractionChecker           AllergyConflictDetector
//!          │                    (exact → ingredient →
//!          │                     class → cross-reactive)
//!          └───────────────┬───────────────┘
//!                          ▼
//!                 DrugCatalogService ──────► SQLite fallback store
//!                          │
//!                    CacheLayer (local moka tier + optional shared tier)
//!                          │
//!                 DrugKnowledgeSource (HTTP)
//!
//!  OverrideService ──► safety_checks      AuditTrail ──► hash-chained audit_log
//! ```
//!
//! # Core Principle
//!
//! **Never block the prescribing workflow.** External outages degrade to the
//! fallback store or to an empty result with `warnings`; audit writes never fail
//! the caller.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence (fallback concepts, allergies, check history, audit log)
//! - [`models`]: Domain types (DrugConcept, InteractionRecord, AllergyRecord, ...)
//! - [`cache`]: Tiered TTL cache
//! - [`knowledge`]: Knowledge source trait, error type and test double
//! - [`catalog`]: Drug Catalog Service
//! - [`interactions`]: Interaction Checker
//! - [`allergy`]: Allergy Conflict Detector and allergy registry
//! - [`audit`]: Override recording, audit trail and export

pub mod allergy;
pub mod audit;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod flags;
pub mod interactions;
pub mod knowledge;
pub mod maintenance;
pub mod models;
pub mod telemetry;

// Re-export commonly used types
pub use allergy::{AllergyConflictDetector, AllergyRegistry, CrossReactivityTable};
pub use audit::{AuditExport, AuditExporter, AuditTrail, ChainVerification, OverrideService};
pub use cache::CacheLayer;
pub use catalog::{CatalogDetail, DrugCatalogService, LookupSource, SearchResults};
pub use config::SafetyConfig;
pub use db::{Database, SharedDatabase};
pub use flags::{FeatureFlag, FeatureFlagSource, StaticFeatureFlags};
pub use interactions::InteractionChecker;
pub use knowledge::{DrugKnowledgeSource, ExternalErrorKind, ExternalServiceError};
pub use models::{
    AllergenType, AllergyCheckResult, AllergyRecord, AllergySeverity, AllergyUpdate, ConflictMatch,
    DrugConcept, InteractionCheckResult, InteractionRecord, InteractionSeverity, MatchConfidence,
    MatchType, NewAllergy, OverrideOutcome, SafetyCheck, TermType,
};

use std::sync::Arc;

// =========================================================================
// Error Type
// =========================================================================

/// Errors surfaced to callers of the safety core.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Active allergy to '{allergen_name}' already recorded for patient {patient_id}")]
    Duplicate {
        patient_id: String,
        allergen_name: String,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type SafetyResult<T> = Result<T, SafetyError>;

impl From<db::DbError> for SafetyError {
    fn from(e: db::DbError) -> Self {
        SafetyError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for SafetyError {
    fn from(e: serde_json::Error) -> Self {
        SafetyError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for SafetyError {
    fn from(e: config::ConfigError) -> Self {
        SafetyError::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for SafetyError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        SafetyError::Database(format!("Lock poisoned: {}", e))
    }
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
///
/// All stored timestamps use this format so they compare lexically.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// =========================================================================
// Composition Root
// =========================================================================

/// Explicitly wired safety services sharing one store, cache and flag source.
pub struct DrugSafety {
    config: SafetyConfig,
    db: SharedDatabase,
    cache: CacheLayer,
    flags: Arc<StaticFeatureFlags>,
    catalog: Arc<DrugCatalogService>,
    registry: Arc<AllergyRegistry>,
    interactions: InteractionChecker,
    allergies: AllergyConflictDetector,
    overrides: OverrideService,
    audit: AuditTrail,
}

impl DrugSafety {
    /// Open the database, connect the cache and load the cross-reactivity table
    /// named by `config`.
    pub async fn open(
        config: SafetyConfig,
        source: Arc<dyn DrugKnowledgeSource>,
    ) -> SafetyResult<Self> {
        let db = Database::open(&config.database_path)?;
        let cache = cache::connect(&config.cache).await;
        let table = match &config.cross_reactivity_path {
            Some(path) => CrossReactivityTable::from_file(path)?,
            None => CrossReactivityTable::default(),
        };
        tracing::info!(
            database = %config.database_path.display(),
            shared_cache = cache.is_tiered(),
            "drug safety core opened"
        );
        Ok(Self::with_parts(config, source, db.into_shared(), cache, table))
    }

    /// Wire the services from already constructed parts.
    pub fn with_parts(
        config: SafetyConfig,
        source: Arc<dyn DrugKnowledgeSource>,
        db: SharedDatabase,
        cache: CacheLayer,
        cross_reactivity: CrossReactivityTable,
    ) -> Self {
        let flags = Arc::new(StaticFeatureFlags::from_config(&config.flags));
        let flag_source: Arc<dyn FeatureFlagSource> = flags.clone();
        let audit = AuditTrail::database(db.clone());

        let catalog = Arc::new(DrugCatalogService::new(source, cache.clone(), db.clone()));
        let registry = Arc::new(AllergyRegistry::new(
            db.clone(),
            cache.clone(),
            catalog.clone(),
            audit.clone(),
        ));
        let interactions = InteractionChecker::new(
            catalog.clone(),
            cache.clone(),
            db.clone(),
            flag_source.clone(),
            audit.clone(),
        );
        let allergies = AllergyConflictDetector::new(
            catalog.clone(),
            registry.clone(),
            db.clone(),
            flag_source,
            audit.clone(),
            Arc::new(cross_reactivity),
        );
        let overrides = OverrideService::new(db.clone(), audit.clone());

        Self {
            config,
            db,
            cache,
            flags,
            catalog,
            registry,
            interactions,
            allergies,
            overrides,
            audit,
        }
    }

    /// In-memory store, local-only cache and default configuration.
    pub fn in_memory(source: Arc<dyn DrugKnowledgeSource>) -> SafetyResult<Self> {
        let config = SafetyConfig::default();
        let db = Database::open_in_memory()?.into_shared();
        let cache = CacheLayer::local(&config.cache);
        Ok(Self::with_parts(config, source, db, cache, CrossReactivityTable::default()))
    }

    // =====================================================================
    // Checks
    // =====================================================================

    /// Ranked drug-drug interaction warnings for a set of drug ids.
    pub async fn check_interactions(&self, drug_ids: &[String]) -> SafetyResult<InteractionCheckResult> {
        self.interactions.check_interactions(drug_ids).await
    }

    /// Allergy conflicts between a patient's active allergies and a set of drugs.
    pub async fn check_allergy_conflicts(
        &self,
        patient_id: &str,
        drug_ids: &[String],
    ) -> SafetyResult<AllergyCheckResult> {
        self.allergies.check_allergy_conflicts(patient_id, drug_ids).await
    }

    /// Record a clinician's justification for proceeding despite warnings.
    pub async fn record_override(
        &self,
        check_ids: &[String],
        reason: &str,
        actor_id: &str,
    ) -> SafetyResult<OverrideOutcome> {
        self.overrides.record_override(check_ids, reason, actor_id).await
    }

    /// A patient's allergy check history, newest first.
    pub fn check_history(&self, patient_id: &str) -> SafetyResult<Vec<SafetyCheck>> {
        let db = self.db.lock()?;
        Ok(db.list_checks_for_patient(patient_id)?)
    }

    // =====================================================================
    // Catalog
    // =====================================================================

    pub async fn get_drug_detail(&self, id: &str) -> SafetyResult<CatalogDetail> {
        self.catalog.get_drug_detail(id).await
    }

    pub async fn search_drugs(&self, term: &str) -> SearchResults {
        self.catalog.search_drugs(term).await
    }

    pub async fn resolve_drug_name(&self, name: &str) -> SafetyResult<DrugConcept> {
        self.catalog.resolve_drug_name(name).await
    }

    // =====================================================================
    // Allergies
    // =====================================================================

    pub async fn add_allergy(
        &self,
        patient_id: &str,
        input: NewAllergy,
        actor_id: &str,
    ) -> SafetyResult<AllergyRecord> {
        self.registry.add_allergy(patient_id, input, actor_id).await
    }

    pub async fn update_allergy(
        &self,
        allergy_id: &str,
        update: AllergyUpdate,
        actor_id: &str,
    ) -> SafetyResult<AllergyRecord> {
        self.registry.update_allergy(allergy_id, update, actor_id).await
    }

    pub async fn deactivate_allergy(&self, allergy_id: &str, actor_id: &str) -> SafetyResult<()> {
        self.registry.deactivate_allergy(allergy_id, actor_id).await
    }

    pub async fn verify_allergy(&self, allergy_id: &str, verifier_id: &str) -> SafetyResult<AllergyRecord> {
        self.registry.verify_allergy(allergy_id, verifier_id).await
    }

    pub async fn active_allergies(&self, patient_id: &str) -> SafetyResult<Vec<AllergyRecord>> {
        self.registry.list_active(patient_id).await
    }

    // =====================================================================
    // Audit
    // =====================================================================

    /// Walk the audit hash chain.
    pub fn verify_audit_chain(&self) -> SafetyResult<ChainVerification> {
        let db = self.db.lock()?;
        Ok(audit::verify_chain(&db)?)
    }

    /// Export the full audit log.
    pub fn export_audit(&self) -> SafetyResult<AuditExport> {
        let db = self.db.lock()?;
        let exporter = AuditExporter::new(&db, self.config.audit.system_id.clone());
        Ok(exporter.export_all()?)
    }

    /// Start the periodic cache maintenance and audit retention task.
    pub fn spawn_maintenance(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        maintenance::spawn_maintenance(
            every,
            self.cache.clone(),
            self.db.clone(),
            self.config.audit.retention_days,
        )
    }

    // =====================================================================
    // Accessors
    // =====================================================================

    /// Runtime-togglable feature flags.
    pub fn flags(&self) -> &Arc<StaticFeatureFlags> {
        &self.flags
    }

    pub fn catalog(&self) -> &Arc<DrugCatalogService> {
        &self.catalog
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }
}
