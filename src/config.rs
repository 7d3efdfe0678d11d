//! Configuration loaded from environment variables.

use crate::error::{SasError, SasResult};
use crate::nonce::{
    DEFAULT_MAX_ENTRIES, DEFAULT_NAMESPACE, MemoryNonceCache, NonceCache, NonceCacheConfig,
    RedisNonceCache,
};
use crate::observability::TracingConfig;
use crate::policy::{InMemoryPolicyRepository, PolicyOptions, PolicyRepository, SettingsPolicyRepository};
use crate::validator::TokenValidator;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Nonce cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCacheKind {
    /// Process-local cache
    Memory,
    /// Redis shared between instances
    Redis,
    /// No replay protection
    None,
}

impl FromStr for NonceCacheKind {
    type Err = SasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "none" => Ok(Self::None),
            _ => Err(SasError::config(format!("Invalid nonce cache: {s}"))),
        }
    }
}

/// SAS library configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Nonce cache backend
    pub nonce_cache_kind: NonceCacheKind,
    /// Redis endpoint for [`NonceCacheKind::Redis`]
    pub redis_url: String,
    /// Nonce cache settings
    pub nonce: NonceCacheConfig,
    /// JSON policy settings file
    pub policy_file: Option<PathBuf>,
    /// Tracing settings
    pub tracing: TracingConfig,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` when
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::Config`] for unparsable values and
    /// [`SasError::InvalidArgument`] for a nonce TTL under one minute.
    pub fn from_env() -> SasResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> SasResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nonce_cache_kind = parse_var(&lookup, "SAS_NONCE_CACHE", NonceCacheKind::Memory)?;
        let redis_url = lookup("SAS_REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let nonce = NonceCacheConfig::default()
            .with_ttl(Duration::from_secs(parse_var(&lookup, "SAS_NONCE_TTL_SECS", 300)?))?
            .with_max_entries(parse_var(&lookup, "SAS_NONCE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES)?)
            .with_namespace(
                lookup("SAS_NONCE_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            );

        let policy_file = lookup("SAS_POLICY_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let tracing = TracingConfig::default()
            .with_log_level(lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()))
            .with_json_output(parse_var(&lookup, "LOG_JSON", false)?);

        Ok(Self {
            nonce_cache_kind,
            redis_url,
            nonce,
            policy_file,
            tracing,
        })
    }

    /// Build the configured nonce cache, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::Cache`] if Redis is unreachable.
    pub async fn nonce_cache(&self) -> SasResult<Option<Arc<dyn NonceCache>>> {
        let cache: Arc<dyn NonceCache> = match self.nonce_cache_kind {
            NonceCacheKind::Memory => Arc::new(MemoryNonceCache::new(self.nonce.clone())),
            NonceCacheKind::Redis => {
                Arc::new(RedisNonceCache::connect(&self.redis_url, self.nonce.clone()).await?)
            }
            NonceCacheKind::None => return Ok(None),
        };
        Ok(Some(cache))
    }

    /// Build the policy repository: read-only from the settings file when one
    /// is configured, otherwise an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be read or holds an
    /// invalid policy.
    pub fn policy_repository(&self) -> SasResult<Arc<dyn PolicyRepository>> {
        let repository: Arc<dyn PolicyRepository> = match &self.policy_file {
            Some(path) => Arc::new(SettingsPolicyRepository::new(PolicyOptions::from_file(path)?)?),
            None => Arc::new(InMemoryPolicyRepository::new()),
        };
        Ok(repository)
    }

    /// Wire a validator from this configuration.
    ///
    /// # Errors
    ///
    /// Any error of [`Config::policy_repository`] or [`Config::nonce_cache`].
    pub async fn validator(&self) -> SasResult<TokenValidator> {
        let validator = TokenValidator::new(self.policy_repository()?);
        match self.nonce_cache().await? {
            Some(cache) => validator.with_nonce_cache(cache, self.nonce.ttl),
            None => Ok(validator),
        }
    }
}

/// Parse a variable with default value.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> SasResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| SasError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}
