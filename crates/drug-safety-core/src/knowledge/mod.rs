//! External drug knowledge source abstraction.
//!
//! The HTTP implementation lives in the `drug-knowledge-client` crate; this
//! module defines the contract every source honours and the error type the
//! rest of the core degrades on.

pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{sort_by_severity, DrugConcept, InteractionRecord};

/// What went wrong talking to the knowledge source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalErrorKind {
    /// Request exceeded the configured timeout
    Timeout,
    /// Connection or protocol failure
    Transport,
    /// Non-2xx response
    Status,
    /// Response body could not be decoded
    Decode,
}

impl std::fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExternalErrorKind::Timeout => "timeout",
            ExternalErrorKind::Transport => "transport",
            ExternalErrorKind::Status => "status",
            ExternalErrorKind::Decode => "decode",
        };
        f.write_str(label)
    }
}

/// Transport, timeout or non-2xx failure from the knowledge source.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error from {endpoint}{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct ExternalServiceError {
    pub endpoint: String,
    pub status: Option<u16>,
    pub kind: ExternalErrorKind,
    pub message: String,
}

impl ExternalServiceError {
    pub fn timeout(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: None,
            kind: ExternalErrorKind::Timeout,
            message: "request timed out".into(),
        }
    }

    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: None,
            kind: ExternalErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: Some(status),
            kind: ExternalErrorKind::Status,
            message: body.into(),
        }
    }

    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: None,
            kind: ExternalErrorKind::Decode,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ExternalErrorKind::Timeout
    }
}

pub type KnowledgeResult<T> = Result<T, ExternalServiceError>;

/// A pharmacological reference service.
///
/// Every call is bounded by a timeout. Transport failures are errors; an
/// empty or `None` result always means the source confirmed there is nothing.
#[async_trait]
pub trait DrugKnowledgeSource: Send + Sync {
    /// Name recorded as the `source` of interaction records.
    fn source_name(&self) -> &str;

    /// Concepts matching a free-text term (partial records).
    async fn search(&self, term: &str) -> KnowledgeResult<Vec<DrugConcept>>;

    /// Full record for one concept, `None` if the source has no such id.
    async fn get_detail(&self, id: &str) -> KnowledgeResult<Option<DrugConcept>>;

    async fn get_synonyms(&self, id: &str) -> KnowledgeResult<Vec<String>>;

    async fn get_classes(&self, id: &str) -> KnowledgeResult<Vec<String>>;

    /// Interactions among a set of ids, most severe first.
    ///
    /// Fewer than two ids is a no-op returning an empty list.
    async fn check_interactions(&self, ids: &[String]) -> KnowledgeResult<Vec<InteractionRecord>>;
}

/// Re-rank interaction records HIGH, then MODERATE, then LOW, keeping source
/// order within a tier.
pub fn rank_interactions(mut records: Vec<InteractionRecord>) -> Vec<InteractionRecord> {
    sort_by_severity(&mut records);
    records
}
