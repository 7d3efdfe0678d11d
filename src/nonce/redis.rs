//! Redis-backed nonce cache shared between instances.

use super::{NonceCache, NonceCacheConfig};
use crate::error::{SasError, SasResult};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

/// Nonce cache stored in Redis.
///
/// Check-and-insert is a single `SET NX EX` command, so replicas sharing a
/// server agree on which request saw a nonce first.
pub struct RedisNonceCache {
    conn: ConnectionManager,
    config: NonceCacheConfig,
}

impl RedisNonceCache {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::Cache`] if the URL is invalid or the server is
    /// unreachable.
    pub async fn connect(redis_url: &str, config: NonceCacheConfig) -> SasResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SasError::cache(format!("Invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client).await?;

        info!(namespace = %config.namespace, "Connected Redis nonce cache");
        Ok(Self { conn, config })
    }

    /// Cache settings.
    #[must_use]
    pub const fn config(&self) -> &NonceCacheConfig {
        &self.config
    }
}

// Redis expiry granularity is one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl NonceCache for RedisNonceCache {
    async fn exists(&self, nonce: &str) -> SasResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.config.key(nonce)).await?;
        Ok(exists)
    }

    async fn insert(&self, nonce: &str, ttl: Duration) -> SasResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.config.key(nonce), 1, ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> SasResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.config.key(nonce))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_rounds_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_secs(300)), 300);
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisNonceCache::connect("not a url", NonceCacheConfig::default()).await;
        assert!(matches!(result, Err(SasError::Cache(_))));
    }
}
