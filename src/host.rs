//! Framework-free request authorization.
//!
//! Hosts pass the absolute request URI and the request headers; the
//! authorizer finds the token, validates it and returns either the
//! authorization context for downstream handlers or a rejection to send.

use crate::token::parameters::FIELD_SIGNATURE;
use crate::token::{ParsedToken, TokenParameters};
use crate::validator::{TokenResponseCode, TokenValidator};
use tracing::{error, warn};
use url::Url;

/// Header carrying `scheme base64-token`.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// `Authorization` schemes that may carry a SAS token. Matched ignoring
/// ASCII case; a bare value without a scheme is also read.
pub const SAS_SCHEMES: [&str; 3] = ["SharedAccessSignature", "SAS", "Bearer"];

/// Status returned for rejected tokens.
pub const UNAUTHORIZED: u16 = 401;

/// Status returned when validation cannot run.
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Identity established by an accepted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    /// Signing key name the token was issued under
    pub skn: String,
    /// Token expiry, unix seconds
    pub expiry: i64,
    /// Requested resources
    pub roles: Vec<String>,
    /// Granted permissions
    pub permissions: Vec<String>,
    /// Extra policy claims as `(type, value)` pairs
    pub claims: Vec<(String, String)>,
}

/// Response for a request that failed authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// HTTP status
    pub status: u16,
    /// Validation response code
    pub code: TokenResponseCode,
    /// Client-safe message
    pub message: String,
}

impl Rejection {
    fn unauthorized(code: TokenResponseCode) -> Self {
        Self {
            status: UNAUTHORIZED,
            code,
            message: code.description().to_string(),
        }
    }

    fn internal() -> Self {
        Self {
            status: INTERNAL_SERVER_ERROR,
            code: TokenResponseCode::NotAccepted,
            message: "Token validation unavailable".to_string(),
        }
    }
}

/// Authorizes requests carrying SAS tokens.
pub struct SasAuthorizer {
    validator: TokenValidator,
}

impl SasAuthorizer {
    /// Create an authorizer around `validator`.
    #[must_use]
    pub const fn new(validator: TokenValidator) -> Self {
        Self { validator }
    }

    /// Underlying validator.
    #[must_use]
    pub const fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Authorize a request.
    ///
    /// The token is read from the `Authorization` header, else from token
    /// headers when a `sig` header is present, else from the query string.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] with status 401 for any rejected or missing
    /// token, and 500 when the validator reports a deployment error.
    pub async fn authorize<'a, I>(
        &self,
        request_uri: &Url,
        headers: I,
    ) -> Result<AuthorizationContext, Rejection>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let headers: Vec<(&str, &str)> = headers.into_iter().collect();

        let token = match extract_token(request_uri, &headers) {
            Some(ParsedToken::Token(token)) => token,
            Some(ParsedToken::Invalid(invalid)) => {
                warn!(reason = %invalid.reason(), "Unreadable SAS token");
                return Err(Rejection::unauthorized(TokenResponseCode::NotAccepted));
            }
            None => return Err(Rejection::unauthorized(TokenResponseCode::NotAccepted)),
        };

        let result = self.validator.validate(request_uri, &token).await.map_err(|e| {
            error!(skn = token.signing_key_name(), error = %e, "SAS validation failed");
            Rejection::internal()
        })?;

        if !result.success() {
            return Err(Rejection::unauthorized(result.code()));
        }

        Ok(AuthorizationContext {
            skn: token.signing_key_name().to_string(),
            expiry: token.expiry(),
            roles: token.resources().to_vec(),
            permissions: result.permissions().to_vec(),
            claims: self.claims(token.signing_key_name()).await,
        })
    }

    // Claim lookup failures only narrow the context.
    async fn claims(&self, skn: &str) -> Vec<(String, String)> {
        let repository = self.validator.repository();
        let has_claims = match repository.get_policy(skn).await {
            Ok(policy) => policy.has_claims(),
            Err(_) => false,
        };
        if !has_claims {
            return Vec::new();
        }

        repository.get_policy_claims(skn).await.unwrap_or_else(|e| {
            warn!(skn, error = %e, "Policy claims unavailable");
            Vec::new()
        })
    }
}

/// Find the token: `Authorization`, then token headers, then the query.
///
/// An `Authorization` value with a foreign scheme is skipped, and one that
/// does not decode falls through to the other sources. Its parse failure is
/// reported only when no other source carries a token.
fn extract_token(request_uri: &Url, headers: &[(&str, &str)]) -> Option<ParsedToken> {
    let mut unreadable = None;
    if let Some(value) = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION_HEADER))
        .map(|(_, value)| *value)
        .filter(|value| has_sas_scheme(value))
    {
        match TokenParameters::parse(value) {
            parsed @ ParsedToken::Token(_) => return Some(parsed),
            invalid @ ParsedToken::Invalid(_) => unreadable = Some(invalid),
        }
    }

    if headers
        .iter()
        .any(|(name, _)| name.trim().eq_ignore_ascii_case(FIELD_SIGNATURE))
    {
        return Some(TokenParameters::from_headers(headers.iter().copied()));
    }

    request_uri
        .query()
        .filter(|query| !query.is_empty())
        .map(TokenParameters::parse)
        .or(unreadable)
}

fn has_sas_scheme(value: &str) -> bool {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(_)) => SAS_SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)),
        _ => true,
    }
}
