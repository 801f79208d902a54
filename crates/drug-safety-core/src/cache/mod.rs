//! Tiered key/value cache with per-entry TTL.
//!
//! ```text
//! CacheLayer (typed, JSON values)
//!   └── dyn CacheStore
//!         ├── LocalCache                 <- moka, always present
//!         └── TieredCache                <- LocalCache + dyn SharedCacheTier
//!               └── RedisSharedTier      <- feature `redis-cache`
//! ```
//!
//! Expiry is lazy: an expired entry is never returned by `get`. Shared tier
//! failures are logged and never reach callers.

pub mod keys;
mod local;
#[cfg(feature = "redis-cache")]
mod shared;
mod tiered;

pub use local::LocalCache;
#[cfg(feature = "redis-cache")]
pub use shared::RedisSharedTier;
pub use tiered::TieredCache;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::CacheConfig;

/// Shared tier errors. Never escape the cache layer.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Shared cache unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "redis-cache")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Raw string store with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    /// Last write wins.
    async fn set(&self, key: &str, value: String, ttl: Duration);

    async fn delete(&self, key: &str);

    /// Evict expired entries eagerly. Optional; expiry is lazy regardless.
    async fn run_maintenance(&self) {}

    /// Whether a shared tier is attached.
    fn is_tiered(&self) -> bool {
        false
    }
}

/// A tier shared between processes.
#[async_trait]
pub trait SharedCacheTier: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<()>;
    /// Reachability check used at startup.
    async fn ping(&self) -> CacheResult<()>;
}

/// Kind of cached entity, each with its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Search,
    Detail,
    Synonyms,
    Classes,
    Interactions,
    PatientAllergies,
}

/// TTL per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub search: Duration,
    pub interactions: Duration,
    pub detail: Duration,
    pub patient_allergies: Duration,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            search: Duration::from_secs(config.search_ttl_secs),
            interactions: Duration::from_secs(config.interaction_ttl_secs),
            detail: Duration::from_secs(config.detail_ttl_secs),
            patient_allergies: Duration::from_secs(config.allergy_ttl_secs),
        }
    }

    pub fn ttl(&self, kind: EntryKind) -> Duration {
        match kind {
            EntryKind::Search => self.search,
            EntryKind::Interactions => self.interactions,
            EntryKind::Detail | EntryKind::Synonyms | EntryKind::Classes => self.detail,
            EntryKind::PatientAllergies => self.patient_allergies,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Typed cache handle shared by every service.
///
/// Values are stored as JSON. An entry that no longer decodes is dropped and
/// treated as a miss.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    ttls: TtlPolicy,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, ttls: TtlPolicy) -> Self {
        Self { store, ttls }
    }

    /// Local-only cache sized and timed from `config`.
    pub fn local(config: &CacheConfig) -> Self {
        Self::new(
            Arc::new(LocalCache::new(config.max_local_entries)),
            TtlPolicy::from_config(config),
        )
    }

    pub fn ttl(&self, kind: EntryKind) -> Duration {
        self.ttls.ttl(kind)
    }

    pub fn is_tiered(&self) -> bool {
        self.store.is_tiered()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, "dropping undecodable cache entry: {e}");
                self.store.delete(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, raw, ttl).await,
            Err(e) => tracing::warn!(key, "failed to encode cache entry: {e}"),
        }
    }

    pub async fn delete(&self, key: &str) {
        self.store.delete(key).await;
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// On a hit `factory` is not invoked. A failed computation is not cached.
    /// Concurrent misses for one key may each compute; the last write wins.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = factory().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    pub async fn run_maintenance(&self) {
        self.store.run_maintenance().await;
    }
}

/// Build the cache selected by `config`.
///
/// A configured shared tier is attached only if it answers a ping; otherwise
/// the cache runs local-only.
pub async fn connect(config: &CacheConfig) -> CacheLayer {
    let ttls = TtlPolicy::from_config(config);
    let local = LocalCache::new(config.max_local_entries);

    let Some(url) = config.shared_url.as_deref() else {
        return CacheLayer::new(Arc::new(local), ttls);
    };

    match connect_shared(url).await {
        Ok(shared) => {
            tracing::info!(url, "shared cache tier attached");
            CacheLayer::new(Arc::new(TieredCache::new(local, shared)), ttls)
        }
        Err(e) => {
            tracing::warn!(url, "shared cache tier unreachable, running local-only: {e}");
            CacheLayer::new(Arc::new(local), ttls)
        }
    }
}

#[cfg(feature = "redis-cache")]
async fn connect_shared(url: &str) -> CacheResult<Arc<dyn SharedCacheTier>> {
    let tier = RedisSharedTier::connect(url).await?;
    tier.ping().await?;
    Ok(Arc::new(tier))
}

#[cfg(not(feature = "redis-cache"))]
async fn connect_shared(_url: &str) -> CacheResult<Arc<dyn SharedCacheTier>> {
    Err(CacheError::Unavailable(
        "built without the redis-cache feature".into(),
    ))
}
