//! Drug Catalog Service.
//!
//! Orchestrates the knowledge source, the cache and the local fallback store.
//! Knowledge source failures on read paths never propagate: detail lookups
//! fall back to the last persisted copy and searches to a local full-text
//! search.

pub mod ranking;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{keys, CacheLayer, EntryKind};
use crate::db::{SharedDatabase, StoredConcept};
use crate::knowledge::{rank_interactions, DrugKnowledgeSource, KnowledgeResult};
use crate::models::{DrugConcept, InteractionRecord};
use crate::{SafetyError, SafetyResult};

/// Maximum rows returned by local fallback search.
const FALLBACK_SEARCH_LIMIT: usize = 25;

/// Where a lookup result came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    Cache,
    External,
    /// Local persisted copy, possibly stale
    Fallback,
}

/// A drug detail lookup with provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogDetail {
    pub concept: DrugConcept,
    pub source: LookupSource,
    /// When the fallback copy was last verified (fallback results only)
    pub verified_at: Option<String>,
}

impl CatalogDetail {
    pub fn is_fallback(&self) -> bool {
        self.source == LookupSource::Fallback
    }
}

/// Search results with provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResults {
    pub concepts: Vec<DrugConcept>,
    pub source: LookupSource,
}

/// Search, detail, synonym and class lookups for the rest of the core.
pub struct DrugCatalogService {
    source: Arc<dyn DrugKnowledgeSource>,
    cache: CacheLayer,
    db: SharedDatabase,
}

impl DrugCatalogService {
    pub fn new(source: Arc<dyn DrugKnowledgeSource>, cache: CacheLayer, db: SharedDatabase) -> Self {
        Self { source, cache, db }
    }

    /// Search by free-text term.
    pub async fn search_drugs(&self, term: &str) -> SearchResults {
        let term = term.trim();
        if term.is_empty() {
            return SearchResults {
                concepts: Vec::new(),
                source: LookupSource::External,
            };
        }

        let key = keys::search(term);
        if let Some(concepts) = self.cache.get::<Vec<DrugConcept>>(&key).await {
            return SearchResults {
                concepts,
                source: LookupSource::Cache,
            };
        }

        match self.source.search(term).await {
            Ok(concepts) => {
                self.cache
                    .set(&key, &concepts, self.cache.ttl(EntryKind::Search))
                    .await;
                SearchResults {
                    concepts,
                    source: LookupSource::External,
                }
            }
            Err(e) => {
                tracing::warn!(term, endpoint = %e.endpoint, "drug search failed, searching fallback store: {e}");
                SearchResults {
                    concepts: self.search_fallback(term),
                    source: LookupSource::Fallback,
                }
            }
        }
    }

    /// Detail for one drug: cache, then knowledge source, then fallback store.
    pub async fn get_drug_detail(&self, id: &str) -> SafetyResult<CatalogDetail> {
        let id = id.trim();
        if id.is_empty() {
            return Err(SafetyError::Validation("drug id must not be empty".into()));
        }

        let key = keys::detail(id);
        if let Some(concept) = self.cache.get::<DrugConcept>(&key).await {
            return Ok(CatalogDetail {
                concept,
                source: LookupSource::Cache,
                verified_at: None,
            });
        }

        match self.source.get_detail(id).await {
            Ok(Some(concept)) => {
                let concept = self.store_verified(concept).await;
                Ok(CatalogDetail {
                    concept,
                    source: LookupSource::External,
                    verified_at: None,
                })
            }
            Ok(None) => Err(SafetyError::NotFound(format!("drug {}", id))),
            Err(e) => {
                tracing::warn!(drug_id = id, endpoint = %e.endpoint, "drug detail lookup failed, using fallback store: {e}");
                match self.load_fallback(id)? {
                    Some(stored) => Ok(CatalogDetail {
                        concept: stored.concept,
                        source: LookupSource::Fallback,
                        verified_at: Some(stored.last_verified),
                    }),
                    None => Err(SafetyError::NotFound(format!("drug {}", id))),
                }
            }
        }
    }

    pub async fn get_synonyms(&self, id: &str) -> Vec<String> {
        let result = self
            .cache
            .get_or_compute(&keys::synonyms(id), self.cache.ttl(EntryKind::Synonyms), || {
                self.source.get_synonyms(id)
            })
            .await;
        match result {
            Ok(synonyms) => synonyms,
            Err(e) => {
                tracing::warn!(drug_id = id, "synonym lookup failed: {e}");
                self.fallback_field(id, |c| c.synonyms)
            }
        }
    }

    pub async fn get_classes(&self, id: &str) -> Vec<String> {
        let result = self
            .cache
            .get_or_compute(&keys::classes(id), self.cache.ttl(EntryKind::Classes), || {
                self.source.get_classes(id)
            })
            .await;
        match result {
            Ok(classes) => classes,
            Err(e) => {
                tracing::warn!(drug_id = id, "class lookup failed: {e}");
                self.fallback_field(id, |c| c.drug_classes)
            }
        }
    }

    /// Resolve free text to a concept: exact case-insensitive name match,
    /// else the first search result.
    pub async fn resolve_drug_name(&self, name: &str) -> SafetyResult<DrugConcept> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SafetyError::Validation("drug name must not be empty".into()));
        }

        let mut concepts = self.search_drugs(name).await.concepts;
        let needle = name.to_lowercase();
        if let Some(pos) = concepts
            .iter()
            .position(|c| c.name.trim().to_lowercase() == needle)
        {
            return Ok(concepts.swap_remove(pos));
        }
        concepts
            .into_iter()
            .next()
            .ok_or_else(|| SafetyError::NotFound(format!("drug named '{}'", name)))
    }

    /// Interaction lookup against the knowledge source, most severe first.
    ///
    /// Not cached here; the interaction checker owns those entries.
    pub async fn lookup_interactions(&self, ids: &[String]) -> KnowledgeResult<Vec<InteractionRecord>> {
        if ids.len() < 2 {
            return Ok(Vec::new());
        }
        self.source.check_interactions(ids).await.map(rank_interactions)
    }

    /// Refresh one concept from the knowledge source, bypassing the cache.
    pub async fn reverify(&self, id: &str) -> SafetyResult<DrugConcept> {
        match self.source.get_detail(id).await? {
            Some(concept) => Ok(self.store_verified(concept).await),
            None => Err(SafetyError::NotFound(format!("drug {}", id))),
        }
    }

    /// Fallback rows not verified within `max_age`, oldest first.
    pub fn stale_concept_ids(&self, max_age: chrono::Duration) -> SafetyResult<Vec<String>> {
        let cutoff = (chrono::Utc::now() - max_age)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let db = self.db.lock()?;
        Ok(db.stale_concept_ids(&cutoff)?)
    }

    /// Fill in classes when the detail record has none, then write through to
    /// the cache and the fallback store.
    async fn store_verified(&self, mut concept: DrugConcept) -> DrugConcept {
        if concept.drug_classes.is_empty() {
            concept.drug_classes = self.get_classes(&concept.id).await;
        }

        self.cache
            .set(&keys::detail(&concept.id), &concept, self.cache.ttl(EntryKind::Detail))
            .await;
        if let Err(e) = self.persist_fallback(&concept) {
            tracing::warn!(drug_id = %concept.id, "failed to persist fallback copy: {e}");
        }
        concept
    }

    fn persist_fallback(&self, concept: &DrugConcept) -> SafetyResult<()> {
        let db = self.db.lock()?;
        db.upsert_concept(concept, &crate::now_timestamp())?;
        Ok(())
    }

    fn load_fallback(&self, id: &str) -> SafetyResult<Option<StoredConcept>> {
        let db = self.db.lock()?;
        Ok(db.get_concept(id)?)
    }

    fn fallback_field<F>(&self, id: &str, field: F) -> Vec<String>
    where
        F: FnOnce(DrugConcept) -> Vec<String>,
    {
        match self.load_fallback(id) {
            Ok(Some(stored)) => field(stored.concept),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(drug_id = id, "fallback store read failed: {e}");
                Vec::new()
            }
        }
    }

    fn search_fallback(&self, term: &str) -> Vec<DrugConcept> {
        let rows = self
            .db
            .lock()
            .map_err(SafetyError::from)
            .and_then(|db| Ok(db.search_concepts(term, FALLBACK_SEARCH_LIMIT)?));
        match rows {
            Ok(rows) => {
                let concepts = rows.into_iter().map(|r| r.concept).collect();
                ranking::rank_by_similarity(term, concepts)
            }
            Err(e) => {
                tracing::error!(term, "fallback search failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::db::Database;
    use crate::knowledge::mock::{MockFailure, MockKnowledgeSource};
    use crate::models::TermType;
    use std::sync::atomic::Ordering;

    fn amoxicillin() -> DrugConcept {
        let mut concept = DrugConcept::new("723", "Amoxicillin", TermType::Ingredient);
        concept.active_ingredients = vec!["amoxicillin".into()];
        concept.drug_classes = vec!["Penicillins".into()];
        concept
    }

    fn service(source: Arc<MockKnowledgeSource>) -> DrugCatalogService {
        DrugCatalogService::new(
            source,
            CacheLayer::local(&CacheConfig::default()),
            Database::open_in_memory().unwrap().into_shared(),
        )
    }

    #[tokio::test]
    async fn test_detail_cached_after_first_lookup() {
        let source = Arc::new(MockKnowledgeSource::new().with_concept(amoxicillin()));
        let catalog = service(source.clone());

        let first = catalog.get_drug_detail("723").await.unwrap();
        assert_eq!(first.source, LookupSource::External);

        let second = catalog.get_drug_detail("723").await.unwrap();
        assert_eq!(second.source, LookupSource::Cache);
        assert_eq!(second.concept, first.concept);
        assert_eq!(source.calls.detail.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detail_falls_back_on_outage() {
        let source = Arc::new(MockKnowledgeSource::new().with_concept(amoxicillin()));
        let db = Database::open_in_memory().unwrap().into_shared();
        let catalog = DrugCatalogService::new(
            source.clone(),
            CacheLayer::local(&CacheConfig::default()),
            db.clone(),
        );

        // Populate fallback store, then lose both cache and source
        catalog.get_drug_detail("723").await.unwrap();
        let catalog = DrugCatalogService::new(
            source.clone(),
            CacheLayer::local(&CacheConfig::default()),
            db,
        );
        source.set_failure(Some(MockFailure::Timeout));

        let detail = catalog.get_drug_detail("723").await.unwrap();
        assert!(detail.is_fallback());
        assert_eq!(detail.concept.name, "Amoxicillin");
        assert!(detail.verified_at.is_some());

        let missing = catalog.get_drug_detail("999").await;
        assert!(matches!(missing, Err(SafetyError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_detail_not_found_is_not_an_outage() {
        let source = Arc::new(MockKnowledgeSource::new());
        let catalog = service(source);
        assert!(matches!(
            catalog.get_drug_detail("999").await,
            Err(SafetyError::NotFound(_))
        ));
        assert!(matches!(
            catalog.get_drug_detail("  ").await,
            Err(SafetyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_detail_enriches_missing_classes() {
        let mut concept = DrugConcept::new("5640", "Ibuprofen", TermType::Ingredient);
        concept.drug_classes = Vec::new();
        let source = Arc::new(MockKnowledgeSource::new().with_concept(concept));
        let catalog = service(source.clone());

        catalog.get_drug_detail("5640").await.unwrap();
        assert_eq!(source.calls.classes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_falls_back_to_local_store() {
        let source = Arc::new(
            MockKnowledgeSource::new()
                .with_concept(amoxicillin())
                .with_concept(DrugConcept::new("1191", "Aspirin", TermType::Ingredient)),
        );
        let catalog = service(source.clone());
        catalog.get_drug_detail("723").await.unwrap();
        catalog.get_drug_detail("1191").await.unwrap();

        source.set_failure(Some(MockFailure::Status(503)));
        let results = catalog.search_drugs("amox").await;
        assert_eq!(results.source, LookupSource::Fallback);
        assert_eq!(results.concepts.len(), 1);
        assert_eq!(results.concepts[0].id, "723");
    }

    #[tokio::test]
    async fn test_search_cached() {
        let source = Arc::new(MockKnowledgeSource::new().with_concept(amoxicillin()));
        let catalog = service(source.clone());

        assert_eq!(catalog.search_drugs("amox").await.source, LookupSource::External);
        assert_eq!(catalog.search_drugs("AMOX ").await.source, LookupSource::Cache);
        assert_eq!(source.calls.search.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_prefers_exact_name() {
        let source = Arc::new(
            MockKnowledgeSource::new()
                .with_concept(DrugConcept::new("1", "Amoxicillin / Clavulanate", TermType::MultipleIngredients))
                .with_concept(DrugConcept::new("723", "Amoxicillin", TermType::Ingredient)),
        );
        let catalog = service(source);

        let resolved = catalog.resolve_drug_name("amoxicillin").await.unwrap();
        assert_eq!(resolved.id, "723");

        let first = catalog.resolve_drug_name("clavul").await.unwrap();
        assert_eq!(first.id, "1");

        assert!(matches!(
            catalog.resolve_drug_name("unobtainium").await,
            Err(SafetyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_synonyms_fall_back_to_store() {
        let mut concept = amoxicillin();
        concept.synonyms = vec!["amoxycillin".into()];
        let source = Arc::new(MockKnowledgeSource::new().with_concept(concept));
        let catalog = service(source.clone());
        catalog.get_drug_detail("723").await.unwrap();

        source.set_failure(Some(MockFailure::Timeout));
        assert_eq!(catalog.get_synonyms("723").await, vec!["amoxycillin".to_string()]);
        assert!(catalog.get_synonyms("999").await.is_empty());
    }

    #[tokio::test]
    async fn test_reverify_and_stale_ids() {
        let source = Arc::new(MockKnowledgeSource::new().with_concept(amoxicillin()));
        let catalog = service(source.clone());
        catalog.get_drug_detail("723").await.unwrap();

        assert!(catalog.stale_concept_ids(chrono::Duration::days(1)).unwrap().is_empty());
        assert_eq!(
            catalog.stale_concept_ids(chrono::Duration::milliseconds(-1000)).unwrap(),
            vec!["723".to_string()]
        );

        let refreshed = catalog.reverify("723").await.unwrap();
        assert_eq!(refreshed.id, "723");
        assert_eq!(source.calls.detail.load(Ordering::SeqCst), 2);

        source.set_failure(Some(MockFailure::Timeout));
        assert!(matches!(
            catalog.reverify("723").await,
            Err(SafetyError::ExternalService(_))
        ));
    }
}
