//! HTTP client for the RxNav REST service.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;

use drug_safety_core::config::KnowledgeConfig;
use drug_safety_core::knowledge::{
    rank_interactions, DrugKnowledgeSource, ExternalServiceError, KnowledgeResult,
};
use drug_safety_core::models::{DrugConcept, InteractionRecord};

use crate::responses::{self, RelatedNames};

const SOURCE_NAME: &str = "RxNav";

/// Error bodies longer than this are cut before they reach logs.
const MAX_ERROR_BODY: usize = 512;

/// [`DrugKnowledgeSource`] backed by RxNav.
///
/// Every request is bounded by the configured timeout. A 404 means "no such
/// concept" and is not an error.
#[derive(Debug, Clone)]
pub struct RxNavClient {
    http: reqwest::Client,
    base_url: String,
}

impl RxNavClient {
    /// Build a client from configuration.
    pub fn new(config: &KnowledgeConfig) -> anyhow::Result<Self> {
        Self::with_settings(&config.base_url, config.timeout(), &config.user_agent)
    }

    pub fn with_settings(base_url: &str, timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        anyhow::ensure!(!base_url.is_empty(), "knowledge base URL is empty");

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;

        tracing::info!(base_url, timeout_ms = timeout.as_millis() as u64, "RxNav client ready");
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON body. `Ok(None)` on 404.
    async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> KnowledgeResult<Option<String>> {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .query(query)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| map_transport_error(&url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(&url, e))?;

        tracing::debug!(
            endpoint = path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "RxNav request"
        );

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ExternalServiceError::status(
                url,
                status.as_u16(),
                truncate(&body, MAX_ERROR_BODY),
            ));
        }
        Ok(Some(body))
    }

    async fn get_parsed<T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        parse: impl FnOnce(&str) -> serde_json::Result<T>,
    ) -> KnowledgeResult<Option<T>> {
        match self.get_text(path, query).await? {
            Some(body) => parse(&body)
                .map(Some)
                .map_err(|e| ExternalServiceError::decode(format!("{}{}", self.base_url, path), e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DrugKnowledgeSource for RxNavClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn search(&self, term: &str) -> KnowledgeResult<Vec<DrugConcept>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .get_parsed("/drugs.json", &[("name", term)], responses::parse_search)
            .await?
            .unwrap_or_default())
    }

    async fn get_detail(&self, id: &str) -> KnowledgeResult<Option<DrugConcept>> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }

        let properties = self
            .get_parsed(&format!("/rxcui/{id}/properties.json"), &[], responses::parse_properties)
            .await?
            .flatten();
        let Some(properties) = properties else {
            return Ok(None);
        };

        let related = self
            .get_parsed(
                &format!("/rxcui/{id}/related.json"),
                &[("tty", "IN PIN BN DF")],
                responses::parse_related,
            )
            .await?
            .unwrap_or_else(RelatedNames::default);

        Ok(Some(responses::build_detail(&properties, related)))
    }

    async fn get_synonyms(&self, id: &str) -> KnowledgeResult<Vec<String>> {
        Ok(self
            .get_parsed(
                &format!("/rxcui/{}/allProperties.json", id.trim()),
                &[("prop", "names")],
                responses::parse_synonyms,
            )
            .await?
            .unwrap_or_default())
    }

    async fn get_classes(&self, id: &str) -> KnowledgeResult<Vec<String>> {
        Ok(self
            .get_parsed(
                "/rxclass/class/byRxcui.json",
                &[("rxcui", id.trim())],
                responses::parse_classes,
            )
            .await?
            .unwrap_or_default())
    }

    async fn check_interactions(&self, ids: &[String]) -> KnowledgeResult<Vec<InteractionRecord>> {
        if ids.len() < 2 {
            return Ok(Vec::new());
        }
        let joined = ids.join(" ");
        let records = self
            .get_parsed("/interaction/list.json", &[("rxcuis", joined.as_str())], |body| {
                responses::parse_interactions(body, SOURCE_NAME)
            })
            .await?
            .unwrap_or_default();
        Ok(rank_interactions(records))
    }
}

fn map_transport_error(url: &str, error: reqwest::Error) -> ExternalServiceError {
    if error.is_timeout() {
        ExternalServiceError::timeout(url)
    } else if error.is_decode() {
        ExternalServiceError::decode(url, error.to_string())
    } else {
        ExternalServiceError::transport(url, error.to_string())
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
