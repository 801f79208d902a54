//! Redis-backed shared tier.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CacheError, CacheResult, SharedCacheTier};

const KEY_PREFIX: &str = "drug-safety:";
const PING_KEY: &str = "drug-safety:ping";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared tier on a Redis server, keys namespaced under `drug-safety:`.
#[derive(Clone)]
pub struct RedisSharedTier {
    manager: ConnectionManager,
}

impl RedisSharedTier {
    /// Connect to `url`. Fails fast if the server does not answer.
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;

        // ConnectionManager retries with backoff; probe once first.
        let mut probe = tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::Unavailable(format!("connect to {} timed out", url)))??;
        let _: bool = probe.exists(PING_KEY).await?;

        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    fn key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl SharedCacheTier for RedisSharedTier {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(Self::key(key)).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(Self::key(key), value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(Self::key(key)).await?;
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let _: bool = conn.exists(PING_KEY).await?;
        Ok(())
    }
}
