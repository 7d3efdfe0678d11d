//! Token validation pipeline.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. policy lookup
//! 2. path containment of absolute-URI resources
//! 3. policy resource expression
//! 4. requested permissions against the policy allow-list
//! 5. secret presence
//! 6. expiry
//! 7. nonce replay (only with a nonce cache)
//! 8. signature

use crate::error::{SasError, SasResult};
use crate::metrics;
use crate::nonce::{self, DEFAULT_NONCE_TTL, NonceCache};
use crate::policy::{Policy, PolicyRepository};
use crate::signature;
use crate::token::{ParsedToken, TokenParameters};
use crate::validator::{TokenResponseCode, ValidationResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Validates SAS tokens against the policies of a repository.
pub struct TokenValidator {
    repository: Arc<dyn PolicyRepository>,
    nonce_cache: Option<Arc<dyn NonceCache>>,
    nonce_ttl: Duration,
}

impl TokenValidator {
    /// Create a validator without replay protection.
    #[must_use]
    pub fn new(repository: Arc<dyn PolicyRepository>) -> Self {
        Self {
            repository,
            nonce_cache: None,
            nonce_ttl: DEFAULT_NONCE_TTL,
        }
    }

    /// Enable replay protection for nonce policies.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::InvalidArgument`] if `ttl` is below
    /// [`nonce::MIN_NONCE_TTL`].
    pub fn with_nonce_cache(mut self, cache: Arc<dyn NonceCache>, ttl: Duration) -> SasResult<Self> {
        self.nonce_ttl = nonce::check_ttl(ttl)?;
        self.nonce_cache = Some(cache);
        Ok(self)
    }

    /// True if a nonce cache is configured.
    #[must_use]
    pub fn has_nonce_cache(&self) -> bool {
        self.nonce_cache.is_some()
    }

    /// Policy repository the validator reads from.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn PolicyRepository> {
        &self.repository
    }

    /// Validate `token` for a request to `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::UnsupportedHashAlgorithm`] if the policy's
    /// algorithm cannot sign. Rejections are reported in the result.
    pub async fn validate(&self, uri: &Url, token: &TokenParameters) -> SasResult<ValidationResult> {
        self.validate_with(uri, token, false).await
    }

    /// Validate `token`, optionally skipping the expiry check.
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate`].
    pub async fn validate_with(
        &self,
        uri: &Url,
        token: &TokenParameters,
        ignore_timeout: bool,
    ) -> SasResult<ValidationResult> {
        let now = chrono::Utc::now().timestamp();
        self.validate_at(uri, token, ignore_timeout, now).await
    }

    /// Validate `token` as of `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate`].
    pub async fn validate_at(
        &self,
        uri: &Url,
        token: &TokenParameters,
        ignore_timeout: bool,
        now: i64,
    ) -> SasResult<ValidationResult> {
        let result = self.check(uri, token, ignore_timeout, now).await?;

        metrics::record_validation(result.code().as_str());
        if result.success() {
            debug!(skn = token.signing_key_name(), resource = result.resource(), "SAS token accepted");
        } else {
            warn!(
                skn = token.signing_key_name(),
                code = %result.code(),
                "SAS token rejected"
            );
        }
        Ok(result)
    }

    /// Parse and validate a token in either wire form.
    ///
    /// Unreadable tokens give [`TokenResponseCode::NotAccepted`].
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::validate`].
    pub async fn validate_wire(
        &self,
        uri: &Url,
        wire: &str,
        ignore_timeout: bool,
    ) -> SasResult<ValidationResult> {
        match TokenParameters::parse(wire) {
            ParsedToken::Token(token) => self.validate_with(uri, &token, ignore_timeout).await,
            ParsedToken::Invalid(invalid) => {
                metrics::record_validation(TokenResponseCode::NotAccepted.as_str());
                warn!(reason = %invalid.reason(), "SAS token not accepted");
                Ok(ValidationResult::not_accepted())
            }
        }
    }

    /// Parse and validate a token, turning rejections into errors.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::Rejected`] carrying the response code when the
    /// token is not accepted, or any error of [`TokenValidator::validate`].
    pub async fn validate_or_err(&self, uri: &Url, wire: &str) -> SasResult<ValidationResult> {
        let result = self.validate_wire(uri, wire, false).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(SasError::rejected(result.code()))
        }
    }

    async fn check(
        &self,
        uri: &Url,
        token: &TokenParameters,
        ignore_timeout: bool,
        now: i64,
    ) -> SasResult<ValidationResult> {
        let resource = token.resource();
        let reject = |code: TokenResponseCode| -> SasResult<ValidationResult> {
            Ok(ValidationResult::failed(resource.clone(), code))
        };

        let policy = match self.repository.get_policy(token.signing_key_name()).await {
            Ok(policy) => policy,
            Err(e) => {
                debug!(skn = token.signing_key_name(), error = %e, "Policy lookup failed");
                return reject(TokenResponseCode::PolicyNotFound);
            }
        };

        let path = request_path(uri);
        if !path_in_scope(token.resources(), &path) {
            return reject(TokenResponseCode::ResourceMismatch);
        }

        if !policy.matches_resource(&path) {
            return reject(TokenResponseCode::SharedResourceExpressionFailed);
        }

        let requested = token.requested_permissions();
        if let Some(requested) = &requested {
            if policy.restricts_permissions() && !requested.iter().all(|p| policy.permits(p)) {
                return reject(TokenResponseCode::PolicyFailed);
            }
        }

        if policy.has_empty_secret() {
            return reject(TokenResponseCode::InvalidSigningKey);
        }

        if !ignore_timeout && token.expiry() <= now {
            return reject(TokenResponseCode::TokenExpired);
        }

        if let Some(code) = self.check_nonce(&policy, token).await {
            return reject(code);
        }

        if let Some(code) = verify_signature(&policy, token)? {
            return reject(code);
        }

        let granted = requested.unwrap_or_else(|| policy.allowed_permissions().to_vec());
        Ok(ValidationResult::accepted(resource, granted))
    }

    async fn check_nonce(&self, policy: &Policy, token: &TokenParameters) -> Option<TokenResponseCode> {
        if !policy.use_nonce() {
            return None;
        }
        let cache = self.nonce_cache.as_ref()?;

        let Some(nonce) = token.nonce() else {
            return Some(TokenResponseCode::NonceIsRequired);
        };

        match cache.check_and_insert(nonce, self.nonce_ttl).await {
            Ok(true) => None,
            Ok(false) => {
                metrics::record_nonce_replay();
                Some(TokenResponseCode::ResendNotAllowed)
            }
            Err(e) => {
                warn!(skn = policy.skn(), error = %e, "Nonce cache unavailable");
                Some(TokenResponseCode::ValidatorNotInitialized)
            }
        }
    }
}

fn verify_signature(policy: &Policy, token: &TokenParameters) -> SasResult<Option<TokenResponseCode>> {
    let expected = match signature::compute_signature(
        token,
        policy.secret(),
        policy.use_nonce(),
        policy.hash_algorithm(),
        policy.additional_keys(),
    ) {
        Ok(expected) => expected,
        Err(SasError::InvalidSigningKey) => return Ok(Some(TokenResponseCode::InvalidSigningKey)),
        Err(SasError::SharedKeyTooShort) => return Ok(Some(TokenResponseCode::SharedKeyTooShort)),
        Err(SasError::MissingAdditionalValue(_)) => return Ok(Some(TokenResponseCode::TokenTampered)),
        Err(SasError::NonceRequired) => return Ok(Some(TokenResponseCode::NonceIsRequired)),
        Err(e) => return Err(e),
    };

    if signature::signatures_match(&expected, token.signature()) {
        Ok(None)
    } else {
        Ok(Some(TokenResponseCode::TokenTampered))
    }
}

/// Request URI without query, fragment or trailing `/`.
fn request_path(uri: &Url) -> String {
    let mut uri = uri.clone();
    uri.set_query(None);
    uri.set_fragment(None);
    uri.as_str().trim_end_matches('/').to_string()
}

/// Absolute-URI resources are path scopes; when any are present the request
/// must fall under one of them. Opaque resource names never restrict.
fn path_in_scope(resources: &[String], path: &str) -> bool {
    let mut scopes = resources
        .iter()
        .filter(|r| r.contains("://"))
        .map(|r| r.trim_end_matches('/'))
        .peekable();

    if scopes.peek().is_none() {
        return true;
    }
    scopes.any(|scope| is_segment_prefix(scope, path))
}

fn is_segment_prefix(scope: &str, path: &str) -> bool {
    path.strip_prefix(scope)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
}
