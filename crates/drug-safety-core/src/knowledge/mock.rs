//! In-memory knowledge source for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{rank_interactions, DrugKnowledgeSource, ExternalServiceError, KnowledgeResult};
use crate::models::{DrugConcept, InteractionRecord};

/// Failure injected into every call of a [`MockKnowledgeSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    Status(u16),
}

/// Per-method call counters.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub search: AtomicUsize,
    pub detail: AtomicUsize,
    pub synonyms: AtomicUsize,
    pub classes: AtomicUsize,
    pub interactions: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.search.load(Ordering::SeqCst)
            + self.detail.load(Ordering::SeqCst)
            + self.synonyms.load(Ordering::SeqCst)
            + self.classes.load(Ordering::SeqCst)
            + self.interactions.load(Ordering::SeqCst)
    }
}

/// Knowledge source backed by in-memory concepts and interaction pairs.
///
/// Search is a case-insensitive substring match over all concept names.
#[derive(Default)]
pub struct MockKnowledgeSource {
    concepts: Mutex<HashMap<String, DrugConcept>>,
    interactions: Mutex<Vec<InteractionRecord>>,
    failure: Mutex<Option<MockFailure>>,
    latency: Mutex<Option<Duration>>,
    pub calls: CallCounts,
}

impl MockKnowledgeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concept(self, concept: DrugConcept) -> Self {
        self.add_concept(concept);
        self
    }

    pub fn with_interaction(self, record: InteractionRecord) -> Self {
        self.interactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        self
    }

    pub fn add_concept(&self, concept: DrugConcept) {
        self.concepts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(concept.id.clone(), concept);
    }

    /// Make every subsequent call fail (`None` restores normal behaviour).
    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Delay every subsequent call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    async fn enter(&self, endpoint: &str, counter: &AtomicUsize) -> KnowledgeResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = *self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        match failure {
            Some(MockFailure::Timeout) => Err(ExternalServiceError::timeout(endpoint)),
            Some(MockFailure::Status(code)) => {
                Err(ExternalServiceError::status(endpoint, code, "mock failure"))
            }
            None => Ok(()),
        }
    }

    fn concept(&self, id: &str) -> Option<DrugConcept> {
        self.concepts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl DrugKnowledgeSource for MockKnowledgeSource {
    fn source_name(&self) -> &str {
        "mock"
    }

    async fn search(&self, term: &str) -> KnowledgeResult<Vec<DrugConcept>> {
        self.enter("mock://search", &self.calls.search).await?;

        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let concepts = self.concepts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut results: Vec<DrugConcept> = concepts
            .values()
            .filter(|c| c.all_names().iter().any(|n| n.to_lowercase().contains(&needle)))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn get_detail(&self, id: &str) -> KnowledgeResult<Option<DrugConcept>> {
        self.enter("mock://detail", &self.calls.detail).await?;
        Ok(self.concept(id))
    }

    async fn get_synonyms(&self, id: &str) -> KnowledgeResult<Vec<String>> {
        self.enter("mock://synonyms", &self.calls.synonyms).await?;
        Ok(self.concept(id).map(|c| c.synonyms).unwrap_or_default())
    }

    async fn get_classes(&self, id: &str) -> KnowledgeResult<Vec<String>> {
        self.enter("mock://classes", &self.calls.classes).await?;
        Ok(self.concept(id).map(|c| c.drug_classes).unwrap_or_default())
    }

    async fn check_interactions(&self, ids: &[String]) -> KnowledgeResult<Vec<InteractionRecord>> {
        if ids.len() < 2 {
            return Ok(Vec::new());
        }
        self.enter("mock://interactions", &self.calls.interactions).await?;

        let records = self
            .interactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| ids.contains(&r.drug_a.id) && ids.contains(&r.drug_b.id))
            .cloned()
            .collect();
        Ok(rank_interactions(records))
    }
}
