//! Runtime configuration.
//!
//! Loaded from JSON (every section optional) and then overridden from
//! `DRUG_SAFETY_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub knowledge: KnowledgeConfig,
    pub cache: CacheConfig,
    pub flags: FlagsConfig,
    pub audit: AuditConfig,
    /// SQLite database file
    pub database_path: PathBuf,
    /// JSON file with the cross-reactivity table; built-in table when absent
    pub cross_reactivity_path: Option<PathBuf>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            knowledge: KnowledgeConfig::default(),
            cache: CacheConfig::default(),
            flags: FlagsConfig::default(),
            audit: AuditConfig::default(),
            database_path: PathBuf::from("drug_safety.db"),
            cross_reactivity_path: None,
        }
    }
}

/// External knowledge service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://rxnav.nlm.nih.gov/REST".to_string(),
            timeout_secs: 10,
            user_agent: format!("drug-safety-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl KnowledgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Cache sizing, shared tier endpoint and per-entity-kind TTLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the local tier
    pub max_local_entries: u64,
    /// Shared tier endpoint (e.g. `redis://cache:6379`)
    pub shared_url: Option<String>,
    /// Search results (volatile)
    pub search_ttl_secs: u64,
    /// Interaction pair results
    pub interaction_ttl_secs: u64,
    /// Per-drug detail, synonyms and classes (stable)
    pub detail_ttl_secs: u64,
    /// A patient's active allergy list
    pub allergy_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_local_entries: 10_000,
            shared_url: None,
            search_ttl_secs: 15 * 60,
            interaction_ttl_secs: 6 * 60 * 60,
            detail_ttl_secs: 24 * 60 * 60,
            allergy_ttl_secs: 5 * 60,
        }
    }
}

/// Initial values of the feature flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlagsConfig {
    pub interaction_checking: bool,
    pub allergy_checking: bool,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            interaction_checking: true,
            allergy_checking: true,
        }
    }
}

/// Audit retention and export settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Events older than this are pruned by the maintenance task
    pub retention_days: u32,
    /// Identifier written into exports
    pub system_id: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 2555,
            system_id: None,
        }
    }
}

impl SafetyConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Apply `DRUG_SAFETY_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DRUG_SAFETY_KNOWLEDGE_URL") {
            self.knowledge.base_url = url;
        }
        if let Some(value) = lookup("DRUG_SAFETY_KNOWLEDGE_TIMEOUT_SECS") {
            self.knowledge.timeout_secs = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DRUG_SAFETY_KNOWLEDGE_TIMEOUT_SECS".into(),
                value: value.clone(),
            })?;
        }
        if let Some(url) = lookup("DRUG_SAFETY_SHARED_CACHE_URL") {
            self.cache.shared_url = if url.trim().is_empty() { None } else { Some(url) };
        }
        if let Some(path) = lookup("DRUG_SAFETY_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("DRUG_SAFETY_INTERACTIONS_ENABLED") {
            self.flags.interaction_checking = parse_bool("DRUG_SAFETY_INTERACTIONS_ENABLED", &value)?;
        }
        if let Some(value) = lookup("DRUG_SAFETY_ALLERGIES_ENABLED") {
            self.flags.allergy_checking = parse_bool("DRUG_SAFETY_ALLERGIES_ENABLED", &value)?;
        }
        Ok(self)
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SafetyConfig::default();
        assert_eq!(config.knowledge.timeout(), Duration::from_secs(10));
        assert!(config.cache.search_ttl_secs < config.cache.interaction_ttl_secs);
        assert!(config.cache.interaction_ttl_secs < config.cache.detail_ttl_secs);
        assert!(config.flags.interaction_checking && config.flags.allergy_checking);
        assert!(config.cache.shared_url.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SafetyConfig::from_json_str(
            r#"{"cache": {"shared_url": "redis://localhost:6379"}, "flags": {"allergy_checking": false}}"#,
        )
        .unwrap();
        assert_eq!(config.cache.shared_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.cache.max_local_entries, 10_000);
        assert!(!config.flags.allergy_checking);
        assert!(config.flags.interaction_checking);
        assert_eq!(config.audit.retention_days, 2555);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DRUG_SAFETY_KNOWLEDGE_URL", "http://localhost:4000/REST"),
            ("DRUG_SAFETY_KNOWLEDGE_TIMEOUT_SECS", "3"),
            ("DRUG_SAFETY_INTERACTIONS_ENABLED", "off"),
            ("DRUG_SAFETY_DATABASE_PATH", "/tmp/safety.db"),
        ]
        .into_iter()
        .collect();

        let config = SafetyConfig::default()
            .with_overrides_from(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.knowledge.base_url, "http://localhost:4000/REST");
        assert_eq!(config.knowledge.timeout_secs, 3);
        assert!(!config.flags.interaction_checking);
        assert_eq!(config.database_path, PathBuf::from("/tmp/safety.db"));
    }

    #[test]
    fn test_invalid_env_value() {
        let result = SafetyConfig::default().with_overrides_from(|var| {
            (var == "DRUG_SAFETY_ALLERGIES_ENABLED").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"database_path": "other.db"}"#).unwrap();

        let config = SafetyConfig::from_file(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("other.db"));

        let missing = SafetyConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
