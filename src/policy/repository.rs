//! Policy repository: resolves signing key names to policies.
//!
//! The validator only reads through [`PolicyRepository`]. Two
//! implementations ship with the crate: a read-write in-memory store and a
//! read-only store built from deserialized settings.

use crate::error::{SasError, SasResult};
use crate::policy::model::{
    DEFAULT_TOKEN_LIFETIME_SECS, DEFAULT_TYPE_NAME, HashAlgorithm, Policy,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Source of signing policies.
///
/// Lookups may perform I/O. Mutators may fail with
/// [`SasError::NotSupported`] in read-only deployments.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// True if a policy exists for `skn`.
    async fn signing_key_exists(&self, skn: &str) -> SasResult<bool>;

    /// Policy for `skn`.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::PolicyNotFound`] if no policy exists.
    async fn get_policy(&self, skn: &str) -> SasResult<Arc<Policy>>;

    /// Extra claims for `skn` as ordered `(type, value)` pairs.
    async fn get_policy_claims(&self, skn: &str) -> SasResult<Vec<(String, String)>>;

    /// Insert or replace the policy keyed by its signing key name.
    async fn add_or_update_policy(&self, policy: Policy) -> SasResult<()>;

    /// Remove the policy and its claims.
    async fn remove_policy(&self, skn: &str) -> SasResult<()>;

    /// Attach an extra claim to an existing policy.
    async fn add_policy_claim(&self, skn: &str, claim_type: &str, claim_value: &str)
    -> SasResult<()>;
}

/// An extra claim attached to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyClaim {
    /// Signing key name the claim belongs to
    pub skn: String,
    /// Claim type
    pub claim_type: String,
    /// Claim value
    pub claim_value: String,
}

fn default_type_name() -> String {
    DEFAULT_TYPE_NAME.to_string()
}

const fn default_token_lifetime() -> u32 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

/// Policy as written in settings.
#[derive(Clone, Deserialize)]
pub struct PolicySettings {
    /// Signing key name
    pub skn: String,
    /// Shared secret
    pub key: String,
    /// Policy type name
    #[serde(default = "default_type_name")]
    pub type_name: String,
    /// Whether tokens carry a nonce
    #[serde(default)]
    pub use_nonce: bool,
    /// Signing algorithm
    #[serde(default)]
    pub hash_type: HashAlgorithm,
    /// Token lifetime in seconds
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime: u32,
    /// Allowed permissions; empty means unrestricted
    #[serde(default)]
    pub allowed_permissions: Vec<String>,
    /// Resource expression; defaults to matching everything
    #[serde(default)]
    pub resource_expression: Option<String>,
    /// Additional canonical-string keys, in signing order
    #[serde(default)]
    pub additional_keys: Vec<String>,
}

impl fmt::Debug for PolicySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySettings")
            .field("skn", &self.skn)
            .field("key", &"[REDACTED]")
            .field("type_name", &self.type_name)
            .field("use_nonce", &self.use_nonce)
            .field("hash_type", &self.hash_type)
            .field("token_lifetime", &self.token_lifetime)
            .field("allowed_permissions", &self.allowed_permissions)
            .field("resource_expression", &self.resource_expression)
            .field("additional_keys", &self.additional_keys)
            .finish()
    }
}

impl TryFrom<PolicySettings> for Policy {
    type Error = SasError;

    fn try_from(settings: PolicySettings) -> Result<Self, Self::Error> {
        let policy = Self::new(
            settings.skn,
            settings.key,
            settings.token_lifetime,
            settings.hash_type,
        )?
        .with_type_name(settings.type_name)
        .with_nonce(settings.use_nonce)
        .with_permissions(settings.allowed_permissions)
        .with_additional_keys(settings.additional_keys);

        match settings.resource_expression {
            Some(expression) => policy.with_match(&expression),
            None => Ok(policy),
        }
    }
}

/// Policies and claims as read from settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyOptions {
    /// Policy definitions
    #[serde(default)]
    pub policies: Vec<PolicySettings>,
    /// Extra claims per signing key name
    #[serde(default)]
    pub policy_claims: Vec<PolicyClaim>,
}

impl PolicyOptions {
    /// Parse options from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::Serialization`] for malformed JSON or unknown hash
    /// algorithms.
    pub fn from_json_str(json: &str) -> SasResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::Config`] if the file cannot be read, or any error
    /// of [`PolicyOptions::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> SasResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SasError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}

fn claims_for(claims: &[PolicyClaim], skn: &str) -> Vec<(String, String)> {
    claims
        .iter()
        .filter(|c| c.skn == skn)
        .map(|c| (c.claim_type.clone(), c.claim_value.clone()))
        .collect()
}

/// Read-only repository built from [`PolicyOptions`].
#[derive(Debug)]
pub struct SettingsPolicyRepository {
    policies: HashMap<String, Arc<Policy>>,
    claims: Vec<PolicyClaim>,
}

impl SettingsPolicyRepository {
    /// Build the repository, computing each policy's claims flag.
    ///
    /// # Errors
    ///
    /// Returns an error if a policy is invalid or a signing key name appears
    /// twice.
    pub fn new(options: PolicyOptions) -> SasResult<Self> {
        let PolicyOptions {
            policies: settings,
            policy_claims: claims,
        } = options;

        let mut policies = HashMap::with_capacity(settings.len());
        for setting in settings {
            let has_claims = claims.iter().any(|c| c.skn == setting.skn);
            let policy = Policy::try_from(setting)?.with_claims(has_claims);
            let skn = policy.skn().to_string();
            if policies.insert(skn.clone(), Arc::new(policy)).is_some() {
                return Err(SasError::config(format!("Duplicate policy for signing key {skn}")));
            }
        }

        info!(policies = policies.len(), claims = claims.len(), "Loaded SAS policies from settings");
        Ok(Self { policies, claims })
    }
}

#[async_trait]
impl PolicyRepository for SettingsPolicyRepository {
    async fn signing_key_exists(&self, skn: &str) -> SasResult<bool> {
        Ok(self.policies.contains_key(skn))
    }

    async fn get_policy(&self, skn: &str) -> SasResult<Arc<Policy>> {
        self.policies
            .get(skn)
            .cloned()
            .ok_or_else(|| SasError::policy_not_found(skn))
    }

    async fn get_policy_claims(&self, skn: &str) -> SasResult<Vec<(String, String)>> {
        Ok(claims_for(&self.claims, skn))
    }

    async fn add_or_update_policy(&self, _policy: Policy) -> SasResult<()> {
        Err(SasError::not_supported("add_or_update_policy"))
    }

    async fn remove_policy(&self, _skn: &str) -> SasResult<()> {
        Err(SasError::not_supported("remove_policy"))
    }

    async fn add_policy_claim(
        &self,
        _skn: &str,
        _claim_type: &str,
        _claim_value: &str,
    ) -> SasResult<()> {
        Err(SasError::not_supported("add_policy_claim"))
    }
}

#[derive(Default)]
struct RepositoryState {
    policies: HashMap<String, Arc<Policy>>,
    claims: Vec<PolicyClaim>,
}

/// Read-write in-memory repository.
#[derive(Default)]
pub struct InMemoryPolicyRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryPolicyRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding `policies`. Later duplicates replace
    /// earlier ones.
    #[must_use]
    pub fn from_policies(policies: impl IntoIterator<Item = Policy>) -> Self {
        let policies = policies
            .into_iter()
            .map(|p| (p.skn().to_string(), Arc::new(p)))
            .collect();
        Self {
            state: RwLock::new(RepositoryState {
                policies,
                claims: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn signing_key_exists(&self, skn: &str) -> SasResult<bool> {
        Ok(self.state.read().await.policies.contains_key(skn))
    }

    async fn get_policy(&self, skn: &str) -> SasResult<Arc<Policy>> {
        self.state
            .read()
            .await
            .policies
            .get(skn)
            .cloned()
            .ok_or_else(|| SasError::policy_not_found(skn))
    }

    async fn get_policy_claims(&self, skn: &str) -> SasResult<Vec<(String, String)>> {
        Ok(claims_for(&self.state.read().await.claims, skn))
    }

    async fn add_or_update_policy(&self, policy: Policy) -> SasResult<()> {
        let mut state = self.state.write().await;
        let has_claims = state.claims.iter().any(|c| c.skn == policy.skn());
        let policy = policy.with_claims(has_claims);
        debug!(skn = policy.skn(), "Stored SAS policy");
        state
            .policies
            .insert(policy.skn().to_string(), Arc::new(policy));
        Ok(())
    }

    async fn remove_policy(&self, skn: &str) -> SasResult<()> {
        let mut state = self.state.write().await;
        if state.policies.remove(skn).is_none() {
            return Err(SasError::policy_not_found(skn));
        }
        state.claims.retain(|c| c.skn != skn);
        debug!(skn, "Removed SAS policy");
        Ok(())
    }

    async fn add_policy_claim(
        &self,
        skn: &str,
        claim_type: &str,
        claim_value: &str,
    ) -> SasResult<()> {
        let mut state = self.state.write().await;
        let policy = state
            .policies
            .get(skn)
            .cloned()
            .ok_or_else(|| SasError::policy_not_found(skn))?;

        if !policy.has_claims() {
            let updated = Policy::clone(&policy).with_claims(true);
            state.policies.insert(skn.to_string(), Arc::new(updated));
        }
        state.claims.push(PolicyClaim {
            skn: skn.to_string(),
            claim_type: claim_type.to_string(),
            claim_value: claim_value.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"{
        "policies": [
            {
                "skn": "SomeKey",
                "key": "signingKey-with-enough-characters",
                "type_name": "MyPolicy",
                "use_nonce": true,
                "hash_type": "Sha512",
                "token_lifetime": 14400,
                "allowed_permissions": ["read", "write"],
                "additional_keys": ["ExtraKey"]
            },
            { "skn": "Minimal", "key": "signingKey" }
        ],
        "policy_claims": [
            { "skn": "SomeKey", "claim_type": "spn", "claim_value": "ClaimValue" },
            { "skn": "SomeKey", "claim_type": "name", "claim_value": "NameValue" }
        ]
    }"#;

    fn repository() -> SettingsPolicyRepository {
        SettingsPolicyRepository::new(PolicyOptions::from_json_str(SETTINGS).unwrap()).unwrap()
    }

    #[test]
    fn test_options_parse() {
        let options = PolicyOptions::from_json_str(SETTINGS).unwrap();
        assert_eq!(options.policies.len(), 2);
        assert_eq!(options.policy_claims.len(), 2);
        assert!(!format!("{options:?}").contains("signingKey"));
    }

    #[test]
    fn test_options_reject_unknown_algorithm() {
        let json = r#"{ "policies": [ { "skn": "a", "key": "k", "hash_type": "Whirlpool" } ] }"#;
        assert!(matches!(
            PolicyOptions::from_json_str(json),
            Err(SasError::Serialization(_))
        ));
    }

    #[test]
    fn test_duplicate_signing_key_rejected() {
        let json = r#"{ "policies": [ { "skn": "a", "key": "k" }, { "skn": "a", "key": "j" } ] }"#;
        let options = PolicyOptions::from_json_str(json).unwrap();
        assert!(matches!(
            SettingsPolicyRepository::new(options),
            Err(SasError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_lifetime_rejected() {
        let json = r#"{ "policies": [ { "skn": "a", "key": "k", "token_lifetime": 5 } ] }"#;
        let options = PolicyOptions::from_json_str(json).unwrap();
        assert!(matches!(
            SettingsPolicyRepository::new(options),
            Err(SasError::TokenLifetimeTooShort { .. })
        ));
    }

    #[test]
    fn test_settings_lookup_from_sync_code() {
        let repo = repository();
        let policy = tokio_test::block_on(repo.get_policy("Minimal")).unwrap();
        assert_eq!(policy.skn(), "Minimal");
    }

    #[tokio::test]
    async fn test_settings_locate_policies() {
        let repo = repository();
        assert!(repo.signing_key_exists("SomeKey").await.unwrap());
        assert!(!repo.signing_key_exists("NoValidKey").await.unwrap());
    }

    #[tokio::test]
    async fn test_settings_get_policy() {
        let repo = repository();
        let policy = repo.get_policy("SomeKey").await.unwrap();
        assert_eq!(policy.skn(), "SomeKey");
        assert_eq!(policy.type_name(), "MyPolicy");
        assert_eq!(policy.hash_algorithm(), HashAlgorithm::Sha512);
        assert_eq!(policy.token_lifetime(), 14400);
        assert!(policy.use_nonce());
        assert!(policy.has_claims());
        assert_eq!(policy.allowed_permissions(), ["read", "write"]);
        assert_eq!(policy.additional_keys(), ["ExtraKey"]);
    }

    #[tokio::test]
    async fn test_settings_minimal_policy_defaults() {
        let repo = repository();
        let policy = repo.get_policy("Minimal").await.unwrap();
        assert_eq!(policy.type_name(), DEFAULT_TYPE_NAME);
        assert_eq!(policy.hash_algorithm(), HashAlgorithm::Sha256);
        assert_eq!(policy.token_lifetime(), 300);
        assert_eq!(policy.resource_expression(), ".*");
        assert!(!policy.has_claims());
    }

    #[tokio::test]
    async fn test_settings_not_found() {
        let repo = repository();
        let err = repo.get_policy("NoValidKey").await.unwrap_err();
        assert!(matches!(err, SasError::PolicyNotFound(ref skn) if skn == "NoValidKey"));
    }

    #[tokio::test]
    async fn test_settings_claims_in_order() {
        let repo = repository();
        let claims = repo.get_policy_claims("SomeKey").await.unwrap();
        assert_eq!(
            claims,
            vec![
                ("spn".to_string(), "ClaimValue".to_string()),
                ("name".to_string(), "NameValue".to_string()),
            ]
        );
        assert!(repo.get_policy_claims("Minimal").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_mutators_not_supported() {
        let repo = repository();
        let policy = Policy::new("NewKey", "NewSecret", 60, HashAlgorithm::Sha256).unwrap();

        assert!(matches!(
            repo.add_or_update_policy(policy).await,
            Err(SasError::NotSupported(_))
        ));
        assert!(matches!(
            repo.remove_policy("SomeKey").await,
            Err(SasError::NotSupported(_))
        ));
        assert!(matches!(
            repo.add_policy_claim("SomeKey", "spn", "v").await,
            Err(SasError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let repo = InMemoryPolicyRepository::new();
        let policy = Policy::new("a", "This is a valid secret", 60, HashAlgorithm::Sha256).unwrap();

        repo.add_or_update_policy(policy).await.unwrap();
        assert!(repo.signing_key_exists("a").await.unwrap());
        assert!(!repo.get_policy("a").await.unwrap().has_claims());

        repo.add_policy_claim("a", "role", "reader").await.unwrap();
        assert!(repo.get_policy("a").await.unwrap().has_claims());
        assert_eq!(
            repo.get_policy_claims("a").await.unwrap(),
            vec![("role".to_string(), "reader".to_string())]
        );

        repo.remove_policy("a").await.unwrap();
        assert!(!repo.signing_key_exists("a").await.unwrap());
        assert!(repo.get_policy_claims("a").await.unwrap().is_empty());
        assert!(matches!(
            repo.remove_policy("a").await,
            Err(SasError::PolicyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_claim_requires_policy() {
        let repo = InMemoryPolicyRepository::new();
        assert!(matches!(
            repo.add_policy_claim("missing", "role", "reader").await,
            Err(SasError::PolicyNotFound(_))
        ));
    }
}
