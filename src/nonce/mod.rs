//! Nonce cache for replay protection.
//!
//! A nonce is accepted once per time-to-live window. The validator only
//! consults a cache when one is injected; running without one is the
//! stateless opt-out.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryNonceCache;
pub use self::redis::RedisNonceCache;

use crate::error::{SasError, SasResult};
use async_trait::async_trait;
use std::time::Duration;

/// Default nonce time-to-live.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(300);

/// Shortest accepted nonce time-to-live.
pub const MIN_NONCE_TTL: Duration = Duration::from_secs(60);

/// Default bound on the in-memory cache before expired entries are evicted.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "sas";

/// Store of nonces already seen.
#[async_trait]
pub trait NonceCache: Send + Sync {
    /// True if `nonce` was recorded and has not expired.
    async fn exists(&self, nonce: &str) -> SasResult<bool>;

    /// Record `nonce` for `ttl`, replacing any previous entry.
    async fn insert(&self, nonce: &str, ttl: Duration) -> SasResult<()>;

    /// Record `nonce` unless it is already live.
    ///
    /// Returns true when the nonce was newly recorded. Concurrent callers
    /// racing on one nonce see exactly one `true`.
    async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> SasResult<bool>;
}

/// Enforce the [`MIN_NONCE_TTL`] floor.
///
/// # Errors
///
/// Returns [`SasError::InvalidArgument`] if `ttl` is below the floor.
pub fn check_ttl(ttl: Duration) -> SasResult<Duration> {
    if ttl < MIN_NONCE_TTL {
        return Err(SasError::invalid_argument(format!(
            "nonce TTL must be at least {}s, got {}ms",
            MIN_NONCE_TTL.as_secs(),
            ttl.as_millis()
        )));
    }
    Ok(ttl)
}

/// Nonce cache settings.
#[derive(Debug, Clone)]
pub struct NonceCacheConfig {
    /// Time-to-live of a recorded nonce
    pub ttl: Duration,
    /// In-memory size bound before expired entries are evicted
    pub max_entries: usize,
    /// Key namespace
    pub namespace: String,
}

impl Default for NonceCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_NONCE_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl NonceCacheConfig {
    /// Set the nonce time-to-live.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::InvalidArgument`] if `ttl` is below
    /// [`MIN_NONCE_TTL`].
    pub fn with_ttl(mut self, ttl: Duration) -> SasResult<Self> {
        self.ttl = check_ttl(ttl)?;
        Ok(self)
    }

    /// Set the in-memory size bound.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Namespaced cache key for `nonce`.
    #[must_use]
    pub fn key(&self, nonce: &str) -> String {
        format!("{}:nonce:{}", self.namespace, nonce)
    }
}
