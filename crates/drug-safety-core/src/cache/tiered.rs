//! Local tier decorated with an optional shared tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CacheStore, LocalCache, SharedCacheTier};

/// Two-tier cache.
///
/// Reads consult the shared tier first and fall back to the local tier.
/// Writes and deletes go to both. Shared tier errors degrade to local-only
/// behaviour for that call.
pub struct TieredCache {
    local: LocalCache,
    shared: Arc<dyn SharedCacheTier>,
}

impl TieredCache {
    pub fn new(local: LocalCache, shared: Arc<dyn SharedCacheTier>) -> Self {
        Self { local, shared }
    }
}

#[async_trait]
impl CacheStore for TieredCache {
    async fn get(&self, key: &str) -> Option<String> {
        match self.shared.get(key).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => tracing::warn!(key, "shared cache read failed: {e}"),
        }
        self.local.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        if let Err(e) = self.shared.set(key, &value, ttl).await {
            tracing::warn!(key, "shared cache write failed: {e}");
        }
        self.local.set(key, value, ttl).await;
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.shared.delete(key).await {
            tracing::warn!(key, "shared cache delete failed: {e}");
        }
        self.local.delete(key).await;
    }

    async fn run_maintenance(&self) {
        self.local.run_maintenance().await;
    }

    fn is_tiered(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, CacheResult};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Shared tier double that can be switched off.
    #[derive(Default)]
    struct FakeShared {
        entries: Mutex<HashMap<String, String>>,
        down: AtomicBool,
    }

    impl FakeShared {
        fn check(&self) -> CacheResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::Unavailable("down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SharedCacheTier for FakeShared {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            self.check()?;
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, _ttl: Duration) -> CacheResult<()> {
            self.check()?;
            self.entries.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.check()?;
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn ping(&self) -> CacheResult<()> {
            self.check()
        }
    }

    #[tokio::test]
    async fn test_writes_both_tiers() {
        let shared = Arc::new(FakeShared::default());
        let local = LocalCache::new(100);
        let cache = TieredCache::new(local.clone(), shared.clone());

        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(local.get("k").await.as_deref(), Some("v"));
        assert_eq!(shared.entries.lock().unwrap().get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn test_shared_tier_wins_on_read() {
        let shared = Arc::new(FakeShared::default());
        let local = LocalCache::new(100);
        let cache = TieredCache::new(local.clone(), shared.clone());

        local.set("k", "stale".into(), Duration::from_secs(60)).await;
        shared.entries.lock().unwrap().insert("k".into(), "fresh".into());

        assert_eq!(cache.get("k").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_shared_failure_degrades_to_local() {
        let shared = Arc::new(FakeShared::default());
        let cache = TieredCache::new(LocalCache::new(100), shared.clone());

        shared.down.store(true, Ordering::SeqCst);
        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_shared_recovers_after_outage() {
        let shared = Arc::new(FakeShared::default());
        let cache = TieredCache::new(LocalCache::new(100), shared.clone());

        shared.down.store(true, Ordering::SeqCst);
        cache.set("k", "local-only".into(), Duration::from_secs(60)).await;
        shared.down.store(false, Ordering::SeqCst);

        // Shared tier misses, local still answers
        assert_eq!(cache.get("k").await.as_deref(), Some("local-only"));
    }
}
