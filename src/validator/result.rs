//! Validation outcomes.

use std::fmt;

/// Closed set of validation response codes.
///
/// Numeric values are stable and shared with other SAS implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenResponseCode {
    /// The token could not be read
    NotAccepted = 0,
    /// The token is valid
    TokenAccepted = 1,
    /// A nonce cache was needed but unavailable
    ValidatorNotInitialized = 2,
    /// Reserved; superseded by [`TokenResponseCode::TokenExpired`]
    TokenExpiredMessage = 3,
    /// The policy requires a nonce and the token has none
    NonceIsRequired = 4,
    /// The nonce was already used
    ResendNotAllowed = 5,
    /// The signature does not match the token contents
    TokenTampered = 6,
    /// The policy secret is empty
    InvalidSigningKey = 7,
    /// The token expiry has passed
    TokenExpired = 8,
    /// The request path does not match the policy expression
    SharedResourceExpressionFailed = 9,
    /// A requested permission is not allowed by the policy
    PolicyFailed = 10,
    /// No policy exists for the signing key name
    PolicyNotFound = 11,
    /// The policy secret is too short to verify with
    SharedKeyTooShort = 12,
    /// The request path is outside the token's resource scope
    ResourceMismatch = 13,
}

impl TokenResponseCode {
    /// Every code in numeric order.
    pub const ALL: [Self; 14] = [
        Self::NotAccepted,
        Self::TokenAccepted,
        Self::ValidatorNotInitialized,
        Self::TokenExpiredMessage,
        Self::NonceIsRequired,
        Self::ResendNotAllowed,
        Self::TokenTampered,
        Self::InvalidSigningKey,
        Self::TokenExpired,
        Self::SharedResourceExpressionFailed,
        Self::PolicyFailed,
        Self::PolicyNotFound,
        Self::SharedKeyTooShort,
        Self::ResourceMismatch,
    ];

    /// Numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Code for a numeric value.
    #[must_use]
    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Stable identifier, used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAccepted => "NOT_ACCEPTED",
            Self::TokenAccepted => "TOKEN_ACCEPTED",
            Self::ValidatorNotInitialized => "VALIDATOR_NOT_INITIALIZED",
            Self::TokenExpiredMessage => "TOKEN_EXPIRED_MESSAGE",
            Self::NonceIsRequired => "NONCE_IS_REQUIRED",
            Self::ResendNotAllowed => "RESEND_NOT_ALLOWED",
            Self::TokenTampered => "TOKEN_TAMPERED",
            Self::InvalidSigningKey => "INVALID_SIGNING_KEY",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::SharedResourceExpressionFailed => "SHARED_RESOURCE_EXPRESSION_FAILED",
            Self::PolicyFailed => "POLICY_FAILED",
            Self::PolicyNotFound => "POLICY_NOT_FOUND",
            Self::SharedKeyTooShort => "SHARED_KEY_TOO_SHORT",
            Self::ResourceMismatch => "RESOURCE_MISMATCH",
        }
    }

    /// Human-readable description, safe to return to clients.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotAccepted => "Token not accepted",
            Self::TokenAccepted => "Token accepted",
            Self::ValidatorNotInitialized => {
                "The token validator needs a caching provider to validate this token, but no caching provider is available"
            }
            Self::TokenExpiredMessage => "Token expired",
            Self::NonceIsRequired => "Nonce is required",
            Self::ResendNotAllowed => "Resend not allowed",
            Self::TokenTampered => "Token tampered",
            Self::InvalidSigningKey => "Invalid signing key",
            Self::TokenExpired => "Token is expired",
            Self::SharedResourceExpressionFailed => "Shared resource expression failed to match",
            Self::PolicyFailed => "Policy permission failed",
            Self::PolicyNotFound => "Policy is not available",
            Self::SharedKeyTooShort => {
                "Shared secret does not comply to policies (too short). Check if the KeyName and Shared Secret are not switched"
            }
            Self::ResourceMismatch => "Resource mismatch detected.",
        }
    }

    /// True only for [`TokenResponseCode::TokenAccepted`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::TokenAccepted)
    }
}

impl fmt::Display for TokenResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    success: bool,
    code: TokenResponseCode,
    resource: String,
    permissions: Vec<String>,
}

impl ValidationResult {
    /// Accepted token.
    #[must_use]
    pub fn accepted(resource: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            success: true,
            code: TokenResponseCode::TokenAccepted,
            resource: resource.into(),
            permissions,
        }
    }

    /// Rejected token. `code` must be a rejection code.
    #[must_use]
    pub(crate) fn failed(resource: impl Into<String>, code: TokenResponseCode) -> Self {
        debug_assert!(!code.is_success(), "{code} is not a rejection");
        Self {
            success: false,
            code,
            resource: resource.into(),
            permissions: Vec::new(),
        }
    }

    /// Token that could not be read at all.
    #[must_use]
    pub fn not_accepted() -> Self {
        Self::failed(String::new(), TokenResponseCode::NotAccepted)
    }

    /// True if the token was accepted.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Response code.
    #[must_use]
    pub const fn code(&self) -> TokenResponseCode {
        self.code
    }

    /// Comma-joined requested resources.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Granted permissions; empty unless accepted.
    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}
