//! Token parameters and their wire forms.
//!
//! Wire form (query string):
//!
//! ```text
//! skn=<name>&sr=<resources>&se=<expiry>&sig=<signature>&nonce=<nonce>&<extra>=<value>...
//! ```
//!
//! The same query string may travel base64-encoded, optionally preceded by an
//! auth-scheme label (`Bearer <base64>`).

use crate::signature::url_encode;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;

/// Signing key name field.
pub const FIELD_SIGNING_KEY_NAME: &str = "skn";
/// Shared resource field (comma-joined).
pub const FIELD_RESOURCES: &str = "sr";
/// Expiry field (unix seconds).
pub const FIELD_EXPIRY: &str = "se";
/// Signature field.
pub const FIELD_SIGNATURE: &str = "sig";
/// Nonce field.
pub const FIELD_NONCE: &str = "nonce";
/// Additional value carrying the requested permissions (comma-separated).
pub const PERMISSIONS_KEY: &str = "permissions";
/// Prefix marking request headers that carry additional values.
pub const HEADER_PREFIX: &str = "sas-";

const RESERVED_FIELDS: [&str; 5] = [
    FIELD_SIGNING_KEY_NAME,
    FIELD_RESOURCES,
    FIELD_EXPIRY,
    FIELD_SIGNATURE,
    FIELD_NONCE,
];

/// Parameters of a SAS token.
///
/// Fields are private: a token is built once, by the factory or by parsing,
/// and then read. The `with_*` functions return modified copies whose
/// signature no longer matches their content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenParameters {
    signing_key_name: String,
    resources: Vec<String>,
    expiry: i64,
    nonce: Option<String>,
    signature: String,
    additional_values: BTreeMap<String, String>,
}

impl TokenParameters {
    /// Create unsigned token parameters.
    #[must_use]
    pub fn new<I, S>(signing_key_name: impl Into<String>, resources: I, expiry: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            signing_key_name: signing_key_name.into(),
            resources: resources.into_iter().map(Into::into).collect(),
            expiry,
            ..Self::default()
        }
    }

    /// Replace the signing key name.
    #[must_use]
    pub fn with_signing_key_name(mut self, name: impl Into<String>) -> Self {
        self.signing_key_name = name.into();
        self
    }

    /// Replace the requested resources.
    #[must_use]
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the expiry.
    #[must_use]
    pub const fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = expiry;
        self
    }

    /// Replace the nonce. An empty nonce clears it.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        self.nonce = (!nonce.is_empty()).then_some(nonce);
        self
    }

    /// Replace the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Add or replace an additional value. Keys are stored lower-cased.
    #[must_use]
    pub fn with_additional_value(mut self, key: &str, value: impl Into<String>) -> Self {
        self.additional_values
            .insert(key.to_ascii_lowercase(), value.into());
        self
    }

    /// Signing key name.
    #[must_use]
    pub fn signing_key_name(&self) -> &str {
        &self.signing_key_name
    }

    /// Requested resources, in request order.
    #[must_use]
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Requested resources joined with commas, as carried on the wire.
    #[must_use]
    pub fn resource(&self) -> String {
        self.resources.join(",")
    }

    /// Expiry in unix seconds.
    #[must_use]
    pub const fn expiry(&self) -> i64 {
        self.expiry
    }

    /// Nonce, if any.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Signature. Empty while unsigned.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// True if the token carries a signature.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// All additional values, keyed by lower-cased name.
    #[must_use]
    pub const fn additional_values(&self) -> &BTreeMap<String, String> {
        &self.additional_values
    }

    /// Additional value by key, ignoring ASCII case.
    #[must_use]
    pub fn additional_value(&self, key: &str) -> Option<&str> {
        self.additional_values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Permissions requested through the `permissions` additional value.
    ///
    /// `None` when the token does not request specific permissions.
    #[must_use]
    pub fn requested_permissions(&self) -> Option<Vec<String>> {
        self.additional_value(PERMISSIONS_KEY).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect()
        })
    }

    /// Serialize to the query-string wire form.
    ///
    /// Only present fields are emitted, in the order `skn`, `sr`, `se`,
    /// `sig`, `nonce`, then additional values.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut components = Vec::with_capacity(5 + self.additional_values.len());

        if !self.signing_key_name.is_empty() {
            components.push(format!(
                "{FIELD_SIGNING_KEY_NAME}={}",
                url_encode(&self.signing_key_name)
            ));
        }
        if !self.resources.is_empty() {
            components.push(format!("{FIELD_RESOURCES}={}", url_encode(&self.resource())));
        }
        if self.expiry > 0 {
            components.push(format!("{FIELD_EXPIRY}={}", self.expiry));
        }
        if !self.signature.is_empty() {
            components.push(format!("{FIELD_SIGNATURE}={}", url_encode(&self.signature)));
        }
        if let Some(nonce) = &self.nonce {
            components.push(format!("{FIELD_NONCE}={}", url_encode(nonce)));
        }
        for (key, value) in &self.additional_values {
            components.push(format!(
                "{}={}",
                url_encode(&key.to_ascii_lowercase()),
                url_encode(value)
            ));
        }

        components.join("&")
    }

    /// Serialize to the base64 wire form, optionally prefixed with an
    /// auth-scheme label.
    #[must_use]
    pub fn to_base64(&self, scheme: Option<&str>) -> String {
        let encoded = STANDARD.encode(self.to_query_string());
        match scheme {
            Some(scheme) => format!("{scheme} {encoded}"),
            None => encoded,
        }
    }

    /// Parse a token from either wire form.
    ///
    /// Never fails: malformed or incomplete input yields
    /// [`ParsedToken::Invalid`].
    #[must_use]
    pub fn parse(wire: &str) -> ParsedToken {
        let wire = wire.trim();
        let wire = wire.strip_prefix('?').unwrap_or(wire);
        if wire.is_empty() {
            return ParsedToken::invalid(InvalidTokenReason::Empty);
        }

        if looks_like_query_string(wire) {
            return Self::from_query_string(wire);
        }

        match decode_base64_form(wire) {
            Some(decoded) => Self::from_query_string(decoded.trim_start_matches('?')),
            None => ParsedToken::invalid(InvalidTokenReason::Malformed(
                "token is neither a query string nor base64".to_string(),
            )),
        }
    }

    /// Parse the query-string wire form (without leading `?`).
    #[must_use]
    pub fn from_query_string(query: &str) -> ParsedToken {
        let pairs = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()));
        Self::from_pairs(pairs)
    }

    /// Build a token from decoded `(key, value)` pairs.
    #[must_use]
    pub fn from_pairs<I>(pairs: I) -> ParsedToken
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut token = Self::default();
        let mut seen: Vec<String> = Vec::new();

        for (key, value) in pairs {
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            if seen.contains(&key) {
                return ParsedToken::invalid(InvalidTokenReason::DuplicateField(key));
            }
            seen.push(key.clone());
            token.assign(&key, value);
        }

        token.into_parsed()
    }

    /// Build a token from request headers.
    ///
    /// Reads `skn`, `sr`, `se`, `sig` and `nonce`; headers starting with
    /// `sas-` become additional values. Header values are not URL-decoded.
    /// Repeated `sr` headers are concatenated in order.
    #[must_use]
    pub fn from_headers<'a, I>(headers: I) -> ParsedToken
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut token = Self::default();
        let mut seen: Vec<String> = Vec::new();

        for (name, value) in headers {
            let key = name.trim().to_ascii_lowercase();
            let is_field = RESERVED_FIELDS.contains(&key.as_str());
            if !is_field && !key.starts_with(HEADER_PREFIX) {
                continue;
            }
            if key == FIELD_RESOURCES {
                token.resources.extend(split_resources(value));
                continue;
            }
            if seen.contains(&key) {
                return ParsedToken::invalid(InvalidTokenReason::DuplicateField(key));
            }
            seen.push(key.clone());
            token.assign(&key, value.trim().to_string());
        }

        token.into_parsed()
    }

    fn assign(&mut self, key: &str, value: String) {
        match key {
            FIELD_SIGNING_KEY_NAME => self.signing_key_name = value,
            FIELD_RESOURCES => self.resources = split_resources(&value).collect(),
            FIELD_EXPIRY => self.expiry = value.trim().parse().unwrap_or(0),
            FIELD_SIGNATURE => self.signature = value,
            FIELD_NONCE => self.nonce = (!value.is_empty()).then_some(value),
            _ => {
                self.additional_values.insert(key.to_string(), value);
            }
        }
    }

    fn into_parsed(self) -> ParsedToken {
        let reason = if self.signing_key_name.is_empty() {
            Some(InvalidTokenReason::MissingSigningKeyName)
        } else if self.resources.is_empty() {
            Some(InvalidTokenReason::MissingResources)
        } else if self.signature.is_empty() {
            Some(InvalidTokenReason::MissingSignature)
        } else if self.expiry <= 0 {
            Some(InvalidTokenReason::InvalidExpiry)
        } else {
            None
        };

        match reason {
            Some(reason) => ParsedToken::invalid(reason),
            None => ParsedToken::Token(self),
        }
    }
}

fn split_resources(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
}

fn looks_like_query_string(wire: &str) -> bool {
    wire.contains('&')
        || RESERVED_FIELDS
            .iter()
            .any(|field| wire.starts_with(&format!("{field}=")))
}

// One value is raw base64; two are (scheme, base64).
fn decode_base64_form(wire: &str) -> Option<String> {
    let parts: Vec<&str> = wire.split_whitespace().collect();
    let encoded = match parts.as_slice() {
        [encoded] | [_, encoded] => *encoded,
        _ => return None,
    };
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Why a wire form did not yield a usable token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidTokenReason {
    /// No input
    Empty,
    /// Input could not be decoded
    Malformed(String),
    /// A field appeared more than once
    DuplicateField(String),
    /// `skn` absent or empty
    MissingSigningKeyName,
    /// `sr` absent or empty
    MissingResources,
    /// `sig` absent or empty
    MissingSignature,
    /// `se` absent, not a number, or not positive
    InvalidExpiry,
}

impl fmt::Display for InvalidTokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty token"),
            Self::Malformed(reason) => write!(f, "malformed token: {reason}"),
            Self::DuplicateField(field) => write!(f, "duplicate field: {field}"),
            Self::MissingSigningKeyName => write!(f, "missing signing key name"),
            Self::MissingResources => write!(f, "missing shared resource"),
            Self::MissingSignature => write!(f, "missing signature"),
            Self::InvalidExpiry => write!(f, "missing or invalid expiry"),
        }
    }
}

/// A wire form that could not be turned into a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidToken {
    reason: InvalidTokenReason,
}

impl InvalidToken {
    /// Why parsing failed.
    #[must_use]
    pub const fn reason(&self) -> &InvalidTokenReason {
        &self.reason
    }
}

/// Outcome of parsing a token wire form.
///
/// Callers choose fail-fast ([`ParsedToken::into_result`]) or fail-soft
/// (match on the variants) handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedToken {
    /// All mandatory fields are present
    Token(TokenParameters),
    /// A mandatory field is missing or the input is malformed
    Invalid(InvalidToken),
}

impl ParsedToken {
    fn invalid(reason: InvalidTokenReason) -> Self {
        Self::Invalid(InvalidToken { reason })
    }

    /// True for [`ParsedToken::Invalid`].
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    /// The parsed token, if valid.
    #[must_use]
    pub const fn token(&self) -> Option<&TokenParameters> {
        match self {
            Self::Token(token) => Some(token),
            Self::Invalid(_) => None,
        }
    }

    /// Convert into a `Result` for fail-fast callers.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::InvalidToken`](crate::SasError::InvalidToken) for
    /// invalid input.
    pub fn into_result(self) -> crate::SasResult<TokenParameters> {
        match self {
            Self::Token(token) => Ok(token),
            Self::Invalid(invalid) => Err(crate::SasError::InvalidToken(invalid.reason.to_string())),
        }
    }
}
