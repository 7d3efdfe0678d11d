//! Process-local nonce cache.

use super::{NonceCache, NonceCacheConfig};
use crate::error::{SasError, SasResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// In-memory nonce cache.
///
/// Suitable for single-instance deployments; replicas do not share state.
/// Holds at most `max_entries` live nonces. Once full, new nonces are refused
/// with [`SasError::Cache`] until entries expire; live nonces are never
/// evicted early.
pub struct MemoryNonceCache {
    config: NonceCacheConfig,
    entries: RwLock<Entries>,
}

/// Nonce keys with their expiry, indexed by expiry for cheap eviction.
#[derive(Default)]
struct Entries {
    expires: HashMap<String, Instant>,
    by_expiry: BTreeSet<(Instant, String)>,
}

impl Entries {
    fn is_live(&self, key: &str, now: Instant) -> bool {
        self.expires.get(key).is_some_and(|expires_at| *expires_at > now)
    }

    fn evict_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((expires_at, _)) = self.by_expiry.first() {
            if *expires_at > now {
                break;
            }
            if let Some((_, key)) = self.by_expiry.pop_first() {
                self.expires.remove(&key);
                removed += 1;
            }
        }
        removed
    }
}

impl Default for MemoryNonceCache {
    fn default() -> Self {
        Self::new(NonceCacheConfig::default())
    }
}

impl MemoryNonceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: NonceCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Cache settings.
    #[must_use]
    pub const fn config(&self) -> &NonceCacheConfig {
        &self.config
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.expires.len()
    }

    /// True if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.expires.is_empty()
    }

    /// Drop expired entries and return how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.evict_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "Purged expired nonces");
        }
        removed
    }

    fn store(&self, entries: &mut Entries, nonce: &str, ttl: Duration) -> SasResult<()> {
        let now = Instant::now();
        entries.evict_expired(now);

        let key = self.config.key(nonce);
        match entries.expires.get(&key) {
            Some(previous) => {
                let previous = *previous;
                entries.by_expiry.remove(&(previous, key.clone()));
            }
            None if entries.expires.len() >= self.config.max_entries => {
                warn!(max_entries = self.config.max_entries, "Nonce cache is full");
                return Err(SasError::cache("nonce cache is full"));
            }
            None => {}
        }

        let expires_at = now + ttl;
        entries.by_expiry.insert((expires_at, key.clone()));
        entries.expires.insert(key, expires_at);
        Ok(())
    }
}

#[async_trait]
impl NonceCache for MemoryNonceCache {
    async fn exists(&self, nonce: &str) -> SasResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries.is_live(&self.config.key(nonce), Instant::now()))
    }

    async fn insert(&self, nonce: &str, ttl: Duration) -> SasResult<()> {
        let mut entries = self.entries.write().await;
        self.store(&mut entries, nonce, ttl)
    }

    async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> SasResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.is_live(&self.config.key(nonce), Instant::now()) {
            return Ok(false);
        }
        self.store(&mut entries, nonce, ttl)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_insert_and_exists() {
        let cache = MemoryNonceCache::default();
        assert!(!cache.exists("abc").await.unwrap());

        cache.insert("abc", TTL).await.unwrap();
        assert!(cache.exists("abc").await.unwrap());
        assert!(!cache.exists("abd").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_and_insert_once() {
        let cache = MemoryNonceCache::default();
        assert!(cache.check_and_insert("abc", TTL).await.unwrap());
        assert!(!cache.check_and_insert("abc", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_nonce_is_accepted_again() {
        let cache = MemoryNonceCache::default();
        cache.insert("abc", Duration::from_millis(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!cache.exists("abc").await.unwrap());
        assert!(cache.check_and_insert("abc", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = MemoryNonceCache::default();
        cache.insert("old", Duration::from_millis(1)).await.unwrap();
        cache.insert("new", TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_eviction_over_bound() {
        let cache = MemoryNonceCache::new(NonceCacheConfig::default().with_max_entries(2));
        cache.insert("a", Duration::from_millis(1)).await.unwrap();
        cache.insert("b", Duration::from_millis(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        cache.insert("c", TTL).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_full_cache_refuses_new_nonces() {
        let cache = MemoryNonceCache::new(NonceCacheConfig::default().with_max_entries(2));
        assert!(cache.check_and_insert("a", TTL).await.unwrap());
        assert!(cache.check_and_insert("b", TTL).await.unwrap());

        let err = cache.check_and_insert("c", TTL).await.unwrap_err();
        assert!(matches!(err, SasError::Cache(_)));
        assert!(cache.insert("c", TTL).await.is_err());
        assert_eq!(cache.len().await, 2);
        assert!(!cache.exists("c").await.unwrap());

        assert!(!cache.check_and_insert("a", TTL).await.unwrap());
        cache.insert("b", TTL).await.unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_reinsert_replaces_expiry() {
        let cache = MemoryNonceCache::default();
        cache.insert("abc", Duration::from_millis(1)).await.unwrap();
        cache.insert("abc", TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.purge_expired().await, 0);
        assert!(cache.exists("abc").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_check_and_insert() {
        let cache = Arc::new(MemoryNonceCache::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.check_and_insert("shared", TTL).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
