//! Shared Access Signature token library.
//!
//! Issues and validates SAS tokens: signed, time-boxed grants for named
//! resources under a signing policy. Provides:
//! - Policy model and repositories (in-memory and settings-backed)
//! - Canonical string construction and keyed hashing
//! - Token issuance and the query-string / base64 wire forms
//! - Nonce replay protection (in-memory and Redis)
//! - The validation pipeline and a framework-free request authorizer
//! - Environment configuration, tracing setup and Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod nonce;
pub mod observability;
pub mod policy;
pub mod signature;
pub mod token;
pub mod validator;

// Re-exports for convenience
pub use config::{Config, NonceCacheKind};
pub use error::{MIN_SECRET_LENGTH, SasError, SasResult};
pub use host::{AuthorizationContext, Rejection, SasAuthorizer};
pub use nonce::{MemoryNonceCache, NonceCache, NonceCacheConfig, RedisNonceCache};
pub use observability::{TracingConfig, init_tracing};
pub use policy::{
    HashAlgorithm, InMemoryPolicyRepository, Policy, PolicyClaim, PolicyOptions,
    PolicyRepository, SettingsPolicyRepository,
};
pub use token::{ParsedToken, TokenFactory, TokenParameters};
pub use validator::{TokenResponseCode, TokenValidator, ValidationResult};
