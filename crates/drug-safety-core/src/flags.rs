//! Feature flags read per call.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::FlagsConfig;

/// A boolean switch for one safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFlag {
    InteractionChecking,
    AllergyChecking,
}

/// Source of feature flag values.
///
/// Checks read a flag once at call start and keep that value for the whole call.
pub trait FeatureFlagSource: Send + Sync {
    fn is_enabled(&self, flag: FeatureFlag) -> bool;
}

/// In-process flags that can be flipped at runtime.
#[derive(Debug)]
pub struct StaticFeatureFlags {
    interaction_checking: AtomicBool,
    allergy_checking: AtomicBool,
}

impl StaticFeatureFlags {
    pub fn new(interaction_checking: bool, allergy_checking: bool) -> Self {
        Self {
            interaction_checking: AtomicBool::new(interaction_checking),
            allergy_checking: AtomicBool::new(allergy_checking),
        }
    }

    pub fn from_config(config: &FlagsConfig) -> Self {
        Self::new(config.interaction_checking, config.allergy_checking)
    }

    pub fn set(&self, flag: FeatureFlag, enabled: bool) {
        tracing::info!(?flag, enabled, "feature flag changed");
        self.slot(flag).store(enabled, Ordering::SeqCst);
    }

    fn slot(&self, flag: FeatureFlag) -> &AtomicBool {
        match flag {
            FeatureFlag::InteractionChecking => &self.interaction_checking,
            FeatureFlag::AllergyChecking => &self.allergy_checking,
        }
    }
}

impl Default for StaticFeatureFlags {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl FeatureFlagSource for StaticFeatureFlags {
    fn is_enabled(&self, flag: FeatureFlag) -> bool {
        self.slot(flag).load(Ordering::SeqCst)
    }
}
