//! Allergen cross-reactivity table.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Allergen root name to the drug classes and names it cross-reacts with.
///
/// Loaded from JSON as a plain object, e.g.
/// `{"penicillin": ["cephalosporin", "carbapenem"]}`. Keys and values are
/// matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CrossReactivityTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl Default for CrossReactivityTable {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("penicillin", &["cephalosporin", "carbapenem"]),
            ("amoxicillin", &["cephalosporin", "carbapenem"]),
            ("ampicillin", &["cephalosporin", "carbapenem"]),
            ("cephalosporin", &["penicillin", "carbapenem"]),
            ("sulfonamide", &["sulfonylurea", "thiazide"]),
            ("sulfa", &["sulfonylurea", "thiazide"]),
            ("aspirin", &["nsaid", "ibuprofen", "naproxen", "salicylate"]),
            ("nsaid", &["aspirin", "ibuprofen", "naproxen", "diclofenac"]),
            ("codeine", &["opioid", "morphine"]),
            ("morphine", &["opioid", "codeine"]),
        ];
        Self::from_entries(
            table
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect())),
        )
    }
}

impl CrossReactivityTable {
    /// Build from `(allergen, related)` pairs. Everything is lowercased.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, related)| {
                (
                    key.trim().to_lowercase(),
                    related.into_iter().map(|r| r.trim().to_lowercase()).collect(),
                )
            })
            .filter(|(key, _): &(String, Vec<String>)| !key.is_empty())
            .collect();
        Self { entries }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        Ok(Self::from_entries(raw))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), entries = table.len(), "loaded cross-reactivity table");
        Ok(table)
    }

    /// Related classes for every root contained in `allergen`, deduplicated.
    pub fn related_classes(&self, allergen: &str) -> Vec<&str> {
        let allergen = allergen.trim().to_lowercase();
        if allergen.is_empty() {
            return Vec::new();
        }

        let mut related: Vec<&str> = Vec::new();
        for (root, classes) in &self.entries {
            if allergen.contains(root.as_str()) {
                for class in classes {
                    if !class.is_empty() && !related.contains(&class.as_str()) {
                        related.push(class);
                    }
                }
            }
        }
        related
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
