//! Signing policies and the repository that serves them.

pub mod model;
pub mod repository;

pub use model::{
    DEFAULT_RESOURCE_EXPRESSION, DEFAULT_TOKEN_LIFETIME_SECS, DEFAULT_TYPE_NAME, HashAlgorithm,
    MIN_TOKEN_LIFETIME_SECS, Policy,
};
pub use repository::{
    InMemoryPolicyRepository, PolicyClaim, PolicyOptions, PolicyRepository, PolicySettings,
    SettingsPolicyRepository,
};
