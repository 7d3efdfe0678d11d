//! Signature engine: canonical string-to-sign and keyed hashing.
//!
//! The canonical string is the wire contract between issuers and
//! validators. Its layout is fixed:
//!
//! ```text
//! urlencode(resources.join(","))\n
//! {key}={urlencode(value)}\n        (once per additional key, in order)
//! permissions={urlencode(value)}\n  (when carried but not a policy key)
//! urlencode(nonce)\n                (only when the policy uses a nonce)
//! {expiry}
//! ```

pub mod hash;

use crate::error::{MIN_SECRET_LENGTH, SasError, SasResult};
use crate::policy::HashAlgorithm;
use crate::token::TokenParameters;
use crate::token::parameters::PERMISSIONS_KEY;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Write as _;
use subtle::ConstantTimeEq;
use url::form_urlencoded;

/// URL-encode a value the way the canonical string and wire form expect
/// (`application/x-www-form-urlencoded`, space as `+`).
#[must_use]
pub fn url_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Build the canonical string-to-sign for `token`.
///
/// A `permissions` value on the token is always signed: after the policy's
/// keys when the policy does not list it itself.
///
/// # Errors
///
/// - [`SasError::MissingAdditionalValue`] if a key in `additional_keys` has no
///   value on the token.
/// - [`SasError::NonceRequired`] if `use_nonce` is set and the token has no
///   nonce.
pub fn build_canonical_string(
    token: &TokenParameters,
    use_nonce: bool,
    additional_keys: &[String],
) -> SasResult<String> {
    let mut canonical = url_encode(&token.resource());
    canonical.push('\n');

    for key in additional_keys {
        let value = token
            .additional_value(key)
            .ok_or_else(|| SasError::MissingAdditionalValue(key.clone()))?;
        let _ = writeln!(canonical, "{key}={}", url_encode(value));
    }

    let permissions_listed = additional_keys
        .iter()
        .any(|key| key.eq_ignore_ascii_case(PERMISSIONS_KEY));
    if !permissions_listed {
        if let Some(value) = token.additional_value(PERMISSIONS_KEY) {
            let _ = writeln!(canonical, "{PERMISSIONS_KEY}={}", url_encode(value));
        }
    }

    if use_nonce {
        let nonce = token.nonce().ok_or(SasError::NonceRequired)?;
        canonical.push_str(&url_encode(nonce));
        canonical.push('\n');
    }

    let _ = write!(canonical, "{}", token.expiry());
    Ok(canonical)
}

/// Enforce the shared-secret policy.
///
/// A short secret usually means the key name and secret were swapped.
///
/// # Errors
///
/// - [`SasError::InvalidSigningKey`] if the secret is empty.
/// - [`SasError::SharedKeyTooShort`] if it has fewer than
///   [`MIN_SECRET_LENGTH`] characters.
pub fn check_secret(secret: &SecretString) -> SasResult<()> {
    let secret = secret.expose_secret();
    if secret.is_empty() {
        return Err(SasError::InvalidSigningKey);
    }
    if secret.chars().count() < MIN_SECRET_LENGTH {
        return Err(SasError::SharedKeyTooShort);
    }
    Ok(())
}

/// Hash a canonical string with `secret` using `algorithm`.
///
/// # Errors
///
/// Returns [`SasError::UnsupportedHashAlgorithm`] for
/// [`HashAlgorithm::None`].
pub fn compute_hash(
    secret: &SecretString,
    algorithm: HashAlgorithm,
    canonical: &str,
) -> SasResult<String> {
    hash::hash_and_encode(
        algorithm,
        secret.expose_secret().as_bytes(),
        canonical.as_bytes(),
    )
}

/// Compute the signature of `token`.
///
/// # Errors
///
/// Any error of [`check_secret`], [`build_canonical_string`] or
/// [`compute_hash`].
pub fn compute_signature(
    token: &TokenParameters,
    secret: &SecretString,
    use_nonce: bool,
    algorithm: HashAlgorithm,
    additional_keys: &[String],
) -> SasResult<String> {
    check_secret(secret)?;
    let canonical = build_canonical_string(token, use_nonce, additional_keys)?;
    compute_hash(secret, algorithm, &canonical)
}

/// Byte-exact signature comparison in constant time.
#[must_use]
pub fn signatures_match(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}
