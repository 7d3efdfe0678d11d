//! Signing policy model.
//!
//! A [`Policy`] is the rule set attached to one signing key name: the shared
//! secret, how long issued tokens live, which hash algorithm signs them,
//! which permissions may be requested and which resources may be reached.
//! Policies are immutable values; the `with_*` functions consume a policy
//! and return a new one.

use crate::error::{SasError, SasResult};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u32 = 300;

/// Smallest token lifetime a policy accepts.
pub const MIN_TOKEN_LIFETIME_SECS: u32 = 10;

/// Resource expression matching every resource.
pub const DEFAULT_RESOURCE_EXPRESSION: &str = ".*";

/// Type name given to policies that do not set one.
pub const DEFAULT_TYPE_NAME: &str = "SasPolicy";

/// Hash algorithm used to sign the canonical string.
///
/// The numeric identifiers are part of the settings contract and match the
/// values issued by existing deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum HashAlgorithm {
    /// No algorithm. Rejected for signing.
    None,
    /// Plain MD5 over the canonical string and the secret (legacy clients).
    Md5,
    /// HMAC-SHA1
    Sha1,
    /// HMAC-SHA256, the recommended default
    #[default]
    Sha256,
    /// HMAC-SHA384
    Sha384,
    /// HMAC-SHA512
    Sha512,
    /// HMAC-SHA3-256
    Sha3_256,
    /// HMAC-SHA3-384
    Sha3_384,
    /// HMAC-SHA3-512
    Sha3_512,
}

impl HashAlgorithm {
    /// All algorithms, including [`HashAlgorithm::None`].
    pub const ALL: [Self; 9] = [
        Self::None,
        Self::Md5,
        Self::Sha1,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
        Self::Sha3_256,
        Self::Sha3_384,
        Self::Sha3_512,
    ];

    /// Numeric identifier of the algorithm.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Md5 => 1,
            Self::Sha1 => 32772,
            Self::Sha256 => 32780,
            Self::Sha384 => 32781,
            Self::Sha512 => 32782,
            Self::Sha3_256 => 32783,
            Self::Sha3_384 => 32785,
            Self::Sha3_512 => 32786,
        }
    }

    /// Look up an algorithm by numeric identifier.
    #[must_use]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.id() == id)
    }

    /// Algorithm name as used in settings and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Md5 => "MD5",
            Self::Sha1 => "Sha1",
            Self::Sha256 => "Sha256",
            Self::Sha384 => "Sha384",
            Self::Sha512 => "Sha512",
            Self::Sha3_256 => "SHA3_256",
            Self::Sha3_384 => "SHA3_384",
            Self::Sha3_512 => "SHA3_512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "none" => Ok(Self::None),
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "sha3_256" => Ok(Self::Sha3_256),
            "sha3_384" => Ok(Self::Sha3_384),
            "sha3_512" => Ok(Self::Sha3_512),
            _ => match normalized.parse::<u32>().ok().and_then(Self::from_id) {
                Some(alg) => Ok(alg),
                None => Err(SasError::UnsupportedHashAlgorithm(s.to_string())),
            },
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = SasError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Rules governing the tokens issued under one signing key name.
#[derive(Debug, Clone)]
pub struct Policy {
    skn: String,
    key: SecretString,
    type_name: String,
    use_nonce: bool,
    hash_algorithm: HashAlgorithm,
    token_lifetime: u32,
    allowed_permissions: Vec<String>,
    resource_expression: Regex,
    additional_keys: Vec<String>,
    has_claims: bool,
}

impl Policy {
    /// Create a policy that matches every resource and allows every permission.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::TokenLifetimeTooShort`] if `lifetime_secs` is below
    /// [`MIN_TOKEN_LIFETIME_SECS`].
    pub fn new(
        skn: impl Into<String>,
        secret: impl Into<String>,
        lifetime_secs: u32,
        hash_algorithm: HashAlgorithm,
    ) -> SasResult<Self> {
        if lifetime_secs < MIN_TOKEN_LIFETIME_SECS {
            return Err(SasError::TokenLifetimeTooShort {
                min: MIN_TOKEN_LIFETIME_SECS,
                actual: lifetime_secs,
            });
        }

        let resource_expression = Regex::new(DEFAULT_RESOURCE_EXPRESSION)
            .map_err(|e| SasError::InvalidResourceExpression(e.to_string()))?;

        Ok(Self {
            skn: skn.into(),
            key: SecretString::from(secret.into()),
            type_name: DEFAULT_TYPE_NAME.to_string(),
            use_nonce: false,
            hash_algorithm,
            token_lifetime: lifetime_secs,
            allowed_permissions: Vec::new(),
            resource_expression,
            additional_keys: Vec::new(),
            has_claims: false,
        })
    }

    /// Append entries to the allowed permission set.
    #[must_use]
    pub fn with_resource<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for resource in resources {
            let resource = resource.into();
            if !resource.is_empty() && !self.allowed_permissions.contains(&resource) {
                self.allowed_permissions.push(resource);
            }
        }
        self
    }

    /// Replace the allowed permission set. An empty set lifts the restriction.
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_permissions.clear();
        self.with_resource(permissions)
    }

    /// Restrict the policy to resources matching `expression`.
    ///
    /// An empty expression leaves the policy unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::InvalidResourceExpression`] if the expression does
    /// not compile.
    pub fn with_match(mut self, expression: &str) -> SasResult<Self> {
        if expression.is_empty() {
            return Ok(self);
        }
        self.resource_expression = Regex::new(expression)
            .map_err(|e| SasError::InvalidResourceExpression(e.to_string()))?;
        Ok(self)
    }

    /// Require a nonce on every token signed under this policy.
    #[must_use]
    pub const fn with_nonce(mut self, use_nonce: bool) -> Self {
        self.use_nonce = use_nonce;
        self
    }

    /// Set the additional keys folded into the canonical string, in order.
    #[must_use]
    pub fn with_additional_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the policy type name.
    #[must_use]
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Mark whether the repository holds extra claims for this policy.
    #[must_use]
    pub const fn with_claims(mut self, has_claims: bool) -> Self {
        self.has_claims = has_claims;
        self
    }

    /// Signing key name.
    #[must_use]
    pub fn skn(&self) -> &str {
        &self.skn
    }

    /// Shared secret.
    #[must_use]
    pub const fn secret(&self) -> &SecretString {
        &self.key
    }

    /// True if the shared secret is empty.
    #[must_use]
    pub fn has_empty_secret(&self) -> bool {
        self.key.expose_secret().is_empty()
    }

    /// Policy type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether tokens carry a nonce.
    #[must_use]
    pub const fn use_nonce(&self) -> bool {
        self.use_nonce
    }

    /// Signing algorithm.
    #[must_use]
    pub const fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Token lifetime in seconds.
    #[must_use]
    pub const fn token_lifetime(&self) -> u32 {
        self.token_lifetime
    }

    /// Allowed permissions. Empty means unrestricted.
    #[must_use]
    pub fn allowed_permissions(&self) -> &[String] {
        &self.allowed_permissions
    }

    /// True if the policy limits which permissions may be requested.
    #[must_use]
    pub fn restricts_permissions(&self) -> bool {
        !self.allowed_permissions.is_empty()
    }

    /// True if `permission` may be requested under this policy.
    #[must_use]
    pub fn permits(&self, permission: &str) -> bool {
        !self.restricts_permissions() || self.allowed_permissions.iter().any(|p| p == permission)
    }

    /// Resource expression source.
    #[must_use]
    pub fn resource_expression(&self) -> &str {
        self.resource_expression.as_str()
    }

    /// True if `resource` matches the resource expression.
    #[must_use]
    pub fn matches_resource(&self, resource: &str) -> bool {
        self.resource_expression.is_match(resource)
    }

    /// Additional canonical-string keys, in signing order.
    #[must_use]
    pub fn additional_keys(&self) -> &[String] {
        &self.additional_keys
    }

    /// Whether extra claims are attached on successful validation.
    #[must_use]
    pub const fn has_claims(&self) -> bool {
        self.has_claims
    }
}
