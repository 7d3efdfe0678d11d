//! Token issuance.

use crate::error::{SasError, SasResult};
use crate::metrics;
use crate::policy::Policy;
use crate::signature;
use crate::token::TokenParameters;
use rand::Rng;
use tracing::debug;

/// Characters nonces are drawn from.
pub const NONCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Default nonce length.
pub const DEFAULT_NONCE_LENGTH: usize = 12;

/// Shortest nonce the factory will generate.
pub const MIN_NONCE_LENGTH: usize = 6;

/// Issues signed tokens from a policy.
pub struct TokenFactory;

impl TokenFactory {
    /// Create a signed token for `resources` under `policy`.
    ///
    /// # Errors
    ///
    /// - [`SasError::InvalidArgument`] if `resources` is empty, or the expiry
    ///   does not fit in an `i64`.
    /// - [`SasError::InvalidSigningKey`] / [`SasError::SharedKeyTooShort`] if
    ///   the policy secret is empty or too short.
    /// - [`SasError::MissingAdditionalValue`] if the policy signs additional
    ///   keys (use [`TokenFactory::create_with_values`] for those).
    /// - [`SasError::UnsupportedHashAlgorithm`] for policies without a usable
    ///   algorithm.
    pub fn create<I, S>(resources: I, policy: &Policy) -> SasResult<TokenParameters>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create_with_values(resources, Vec::<(String, String)>::new(), policy)
    }

    /// Create a signed token carrying additional values.
    ///
    /// Values for every key in [`Policy::additional_keys`] must be supplied;
    /// they are folded into the signature in the policy's order.
    ///
    /// # Errors
    ///
    /// See [`TokenFactory::create`].
    pub fn create_with_values<I, S, V, K, W>(
        resources: I,
        additional_values: V,
        policy: &Policy,
    ) -> SasResult<TokenParameters>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        V: IntoIterator<Item = (K, W)>,
        K: AsRef<str>,
        W: Into<String>,
    {
        let now = chrono::Utc::now().timestamp();
        Self::create_at(resources, additional_values, policy, now)
    }

    /// Create a signed token as of `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// See [`TokenFactory::create`].
    pub fn create_at<I, S, V, K, W>(
        resources: I,
        additional_values: V,
        policy: &Policy,
        now: i64,
    ) -> SasResult<TokenParameters>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        V: IntoIterator<Item = (K, W)>,
        K: AsRef<str>,
        W: Into<String>,
    {
        if policy.has_empty_secret() {
            return Err(SasError::InvalidSigningKey);
        }

        let expiry = now
            .checked_add(i64::from(policy.token_lifetime()))
            .ok_or_else(|| SasError::invalid_argument("token expiry overflows"))?;
        let mut token = TokenParameters::new(policy.skn(), resources, expiry);
        if token.resources().is_empty() {
            return Err(SasError::invalid_argument("at least one resource is required"));
        }

        for (key, value) in additional_values {
            token = token.with_additional_value(key.as_ref(), value);
        }

        if policy.use_nonce() {
            token = token.with_nonce(generate_nonce(DEFAULT_NONCE_LENGTH)?);
        }

        let signature = signature::compute_signature(
            &token,
            policy.secret(),
            policy.use_nonce(),
            policy.hash_algorithm(),
            policy.additional_keys(),
        )?;

        metrics::record_token_issued(policy.hash_algorithm().as_str());
        debug!(
            skn = policy.skn(),
            expiry,
            algorithm = %policy.hash_algorithm(),
            "Issued SAS token"
        );

        Ok(token.with_signature(signature))
    }
}

/// Generate a random nonce of `len` characters from [`NONCE_ALPHABET`].
///
/// # Errors
///
/// Returns [`SasError::NonceTooShort`] if `len` is below [`MIN_NONCE_LENGTH`].
pub fn generate_nonce(len: usize) -> SasResult<String> {
    if len < MIN_NONCE_LENGTH {
        return Err(SasError::NonceTooShort {
            min: MIN_NONCE_LENGTH,
            actual: len,
        });
    }

    let mut rng = rand::thread_rng();
    Ok((0..len)
        .map(|_| char::from(NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::HashAlgorithm;

    const SECRET: &str = "This is a valid secret";

    fn policy() -> Policy {
        Policy::new("a", SECRET, 60, HashAlgorithm::Sha256).unwrap()
    }

    #[test]
    fn test_create_sets_expiry_and_signature() {
        let token = TokenFactory::create_at(["CalculateThis"], Vec::<(&str, &str)>::new(), &policy(), 1_000)
            .unwrap();

        assert_eq!(token.signing_key_name(), "a");
        assert_eq!(token.resources(), ["CalculateThis"]);
        assert_eq!(token.expiry(), 1_060);
        assert!(token.is_signed());
        assert_eq!(token.nonce(), None);
    }

    #[test]
    fn test_create_uses_current_time() {
        let before = chrono::Utc::now().timestamp();
        let token = TokenFactory::create(["read"], &policy()).unwrap();
        let after = chrono::Utc::now().timestamp();

        assert!(token.expiry() >= before + 60);
        assert!(token.expiry() <= after + 60);
    }

    #[test]
    fn test_create_generates_nonce_only_when_required() {
        let token = TokenFactory::create(["read"], &policy().with_nonce(true)).unwrap();
        let nonce = token.nonce().unwrap();
        assert_eq!(nonce.len(), DEFAULT_NONCE_LENGTH);

        let token = TokenFactory::create(["read"], &policy()).unwrap();
        assert!(token.nonce().is_none());
    }

    #[test]
    fn test_create_empty_secret() {
        let policy = Policy::new("a", "", 60, HashAlgorithm::Sha256).unwrap();
        let err = TokenFactory::create(["read"], &policy).unwrap_err();
        assert!(matches!(err, SasError::InvalidSigningKey));
    }

    #[test]
    fn test_create_short_secret() {
        let policy = Policy::new("a", "12345", 60, HashAlgorithm::Sha256).unwrap();
        let err = TokenFactory::create(["read"], &policy).unwrap_err();
        assert!(matches!(err, SasError::SharedKeyTooShort));
    }

    #[test]
    fn test_create_requires_resources() {
        let err = TokenFactory::create(Vec::<String>::new(), &policy()).unwrap_err();
        assert!(matches!(err, SasError::InvalidArgument(_)));
    }

    #[test]
    fn test_create_with_values_signs_policy_keys() {
        let policy = policy().with_additional_keys(["ExtraKey"]);

        let err = TokenFactory::create(["read"], &policy).unwrap_err();
        assert!(matches!(err, SasError::MissingAdditionalValue(_)));

        let token =
            TokenFactory::create_with_values(["read"], [("ExtraKey", "value")], &policy).unwrap();
        assert_eq!(token.additional_value("extrakey"), Some("value"));
    }

    #[test]
    fn test_create_at_rejects_overflowing_expiry() {
        let err = TokenFactory::create_at(["read"], Vec::<(&str, &str)>::new(), &policy(), i64::MAX - 10)
            .unwrap_err();
        assert!(matches!(err, SasError::InvalidArgument(_)));

        let token =
            TokenFactory::create_at(["read"], Vec::<(&str, &str)>::new(), &policy(), i64::MAX - 60)
                .unwrap();
        assert_eq!(token.expiry(), i64::MAX);
    }

    #[test]
    fn test_create_with_none_algorithm() {
        let policy = Policy::new("a", SECRET, 60, HashAlgorithm::None).unwrap();
        let err = TokenFactory::create(["read"], &policy).unwrap_err();
        assert!(matches!(err, SasError::UnsupportedHashAlgorithm(_)));
    }

    #[test]
    fn test_generate_nonce() {
        let a = generate_nonce(12).unwrap();
        let b = generate_nonce(12).unwrap();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
        assert!(a.bytes().all(|c| NONCE_ALPHABET.contains(&c)));

        assert_eq!(generate_nonce(MIN_NONCE_LENGTH).unwrap().len(), MIN_NONCE_LENGTH);
        assert!(matches!(
            generate_nonce(5),
            Err(SasError::NonceTooShort { min: 6, actual: 5 })
        ));
    }
}
