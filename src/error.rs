//! Error types for SAS token operations.
//!
//! Validation outcomes are not errors: they are reported as a
//! [`TokenResponseCode`](crate::validator::TokenResponseCode) inside a
//! [`ValidationResult`](crate::validator::ValidationResult). This enum covers
//! construction-time argument errors, deployment defects and the
//! infrastructure failures of the collaborators.

use crate::validator::TokenResponseCode;
use thiserror::Error;

/// Minimum number of characters a shared secret must contain.
pub const MIN_SECRET_LENGTH: usize = 20;

/// Errors raised by the SAS token library.
///
/// No variant ever carries a shared secret or a computed signature.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SasError {
    /// The shared secret is empty.
    #[error("Invalid signing key")]
    InvalidSigningKey,

    /// The shared secret is shorter than [`MIN_SECRET_LENGTH`].
    #[error(
        "Shared secret does not comply to policies (too short). Check if the key name and shared secret are not switched"
    )]
    SharedKeyTooShort,

    /// A policy lifetime below the 10 second floor was requested.
    #[error("Token lifetime must be at least {min} seconds, got {actual}")]
    TokenLifetimeTooShort {
        /// Lower bound in seconds
        min: u32,
        /// Requested lifetime in seconds
        actual: u32,
    },

    /// A nonce shorter than the allowed minimum was requested.
    #[error("Nonce length must be at least {min}, got {actual}")]
    NonceTooShort {
        /// Minimum nonce length
        min: usize,
        /// Requested nonce length
        actual: usize,
    },

    /// The policy's resource expression does not compile.
    #[error("Invalid resource expression: {0}")]
    InvalidResourceExpression(String),

    /// A key listed for the canonical string has no value on the token.
    #[error("Value is missing: {0}")]
    MissingAdditionalValue(String),

    /// The policy requires a nonce but the token carries none.
    #[error("Nonce is required")]
    NonceRequired,

    /// The hash algorithm cannot be used for signing.
    #[error("Hashing using {0} is not supported")]
    UnsupportedHashAlgorithm(String),

    /// No policy exists for the signing key name.
    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    /// The collaborator does not support the operation (read-only deployments).
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// A token could not be parsed from its wire form.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A token was rejected by the validator (throwing entry points only).
    #[error("Token rejected: {code}")]
    Rejected {
        /// Response code of the failed validation
        code: TokenResponseCode,
    },

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Nonce cache backend failure.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SasError {
    /// Check if this error is transient.
    ///
    /// Only backend failures are retryable; argument and policy errors
    /// will fail the same way on every attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache(_))
    }

    /// Create a cache error.
    #[must_use]
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not supported error.
    #[must_use]
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported(operation.into())
    }

    /// Create a policy not found error.
    #[must_use]
    pub fn policy_not_found(skn: impl Into<String>) -> Self {
        Self::PolicyNotFound(skn.into())
    }

    /// Create a rejection error from a failed validation code.
    #[must_use]
    pub const fn rejected(code: TokenResponseCode) -> Self {
        Self::Rejected { code }
    }
}

impl From<redis::RedisError> for SasError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

/// Result alias used across the crate.
pub type SasResult<T> = Result<T, SasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SasError::cache("connection refused").is_retryable());
        assert!(!SasError::SharedKeyTooShort.is_retryable());
        assert!(!SasError::policy_not_found("a").is_retryable());
        assert!(!SasError::UnsupportedHashAlgorithm("None".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SasError::MissingAdditionalValue("extrakey".to_string());
        assert_eq!(err.to_string(), "Value is missing: extrakey");

        let err = SasError::rejected(TokenResponseCode::TokenTampered);
        assert_eq!(err.to_string(), "Token rejected: TOKEN_TAMPERED");

        let err = SasError::TokenLifetimeTooShort { min: 10, actual: 5 };
        assert_eq!(err.to_string(), "Token lifetime must be at least 10 seconds, got 5");
    }
}
