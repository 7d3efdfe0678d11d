//! End-to-end validation scenarios across repositories, caches and the
//! request authorizer.

use sas_token::{
    HashAlgorithm, InMemoryPolicyRepository, MemoryNonceCache, NonceCache, Policy, PolicyOptions,
    PolicyRepository, SasAuthorizer, SasError, SettingsPolicyRepository, TokenFactory,
    TokenResponseCode, TokenValidator,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const SECRET: &str = "This is a valid secret";

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn policy() -> Policy {
    Policy::new("a", SECRET, 60, HashAlgorithm::Sha256).unwrap()
}

fn validator(policy: Policy) -> TokenValidator {
    TokenValidator::new(Arc::new(InMemoryPolicyRepository::from_policies([policy])))
}

#[tokio::test]
async fn test_accept_read_write() {
    let policy = policy();
    let token = TokenFactory::create(["read", "write"], &policy).unwrap();

    let result = validator(policy).validate(&url("http://localhost"), &token).await.unwrap();

    assert!(result.success());
    assert_eq!(result.code(), TokenResponseCode::TokenAccepted);
    assert_eq!(result.resource(), "read,write");
}

#[tokio::test]
async fn test_path_not_allowed() {
    let policy = policy().with_match("https://localhost").unwrap();
    let token = TokenFactory::create(["read", "write"], &policy).unwrap();

    let result = validator(policy).validate(&url("http://localhost"), &token).await.unwrap();

    assert!(!result.success());
    assert_eq!(result.code(), TokenResponseCode::SharedResourceExpressionFailed);
}

#[tokio::test]
async fn test_path_expression() {
    let policy = policy().with_match("https://host/a.*").unwrap();
    let token = TokenFactory::create(["read"], &policy).unwrap();
    let validator = validator(policy);

    let result = validator.validate(&url("https://host/a/b"), &token).await.unwrap();
    assert_eq!(result.code(), TokenResponseCode::TokenAccepted);

    let result = validator.validate(&url("https://host/other"), &token).await.unwrap();
    assert_eq!(result.code(), TokenResponseCode::SharedResourceExpressionFailed);
}

#[tokio::test]
async fn test_permission_scope() {
    let policy = policy().with_permissions(["read"]);
    let validator = validator(policy.clone());
    let target = url("http://localhost");

    let token =
        TokenFactory::create_with_values(["doc"], [("permissions", "read,write")], &policy).unwrap();
    let result = validator.validate(&target, &token).await.unwrap();
    assert_eq!(result.code(), TokenResponseCode::PolicyFailed);

    let token = TokenFactory::create_with_values(["doc"], [("permissions", "read")], &policy).unwrap();
    let result = validator.validate(&target, &token).await.unwrap();
    assert_eq!(result.code(), TokenResponseCode::TokenAccepted);
    assert_eq!(result.permissions(), ["read"]);
}

#[tokio::test]
async fn test_unrestricted_policy_allows_any_permission() {
    let policy = policy();
    let token =
        TokenFactory::create_with_values(["doc"], [("permissions", "delete")], &policy).unwrap();

    let result = validator(policy).validate(&url("http://localhost"), &token).await.unwrap();
    assert!(result.success());
    assert_eq!(result.permissions(), ["delete"]);
}

#[tokio::test]
async fn test_replay_with_and_without_cache() {
    let policy = policy().with_nonce(true);
    let token = TokenFactory::create(["read"], &policy).unwrap();
    let target = url("http://localhost");

    let cached = validator(policy.clone())
        .with_nonce_cache(Arc::new(MemoryNonceCache::default()), Duration::from_secs(300))
        .unwrap();
    assert_eq!(
        cached.validate(&target, &token).await.unwrap().code(),
        TokenResponseCode::TokenAccepted
    );
    assert_eq!(
        cached.validate(&target, &token).await.unwrap().code(),
        TokenResponseCode::ResendNotAllowed
    );

    let stateless = validator(policy);
    for _ in 0..2 {
        assert!(stateless.validate(&target, &token).await.unwrap().success());
    }
}

#[tokio::test]
async fn test_concurrent_nonce_accepted_once() {
    let policy = policy().with_nonce(true);
    let token = TokenFactory::create(["read"], &policy).unwrap();
    let validator = Arc::new(
        validator(policy)
            .with_nonce_cache(Arc::new(MemoryNonceCache::default()), Duration::from_secs(300))
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..32 {
        let validator = Arc::clone(&validator);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            validator.validate(&url("http://localhost"), &token).await.unwrap().code()
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            TokenResponseCode::TokenAccepted => accepted += 1,
            code => assert_eq!(code, TokenResponseCode::ResendNotAllowed),
        }
    }
    assert_eq!(accepted, 1);
}

struct FailingCache;

#[async_trait::async_trait]
impl NonceCache for FailingCache {
    async fn exists(&self, _nonce: &str) -> sas_token::SasResult<bool> {
        Err(SasError::cache("connection refused"))
    }

    async fn insert(&self, _nonce: &str, _ttl: Duration) -> sas_token::SasResult<()> {
        Err(SasError::cache("connection refused"))
    }

    async fn check_and_insert(&self, _nonce: &str, _ttl: Duration) -> sas_token::SasResult<bool> {
        Err(SasError::cache("connection refused"))
    }
}

#[tokio::test]
async fn test_cache_failure_is_never_accepted() {
    let policy = policy().with_nonce(true);
    let token = TokenFactory::create(["read"], &policy).unwrap();
    let validator =
        validator(policy).with_nonce_cache(Arc::new(FailingCache), Duration::from_secs(300)).unwrap();

    let result = validator.validate(&url("http://localhost"), &token).await.unwrap();
    assert_eq!(result.code(), TokenResponseCode::ValidatorNotInitialized);
}

#[test]
fn test_short_secret_never_signs() {
    let policy = Policy::new("a", "12345", 60, HashAlgorithm::Sha256).unwrap();
    assert!(matches!(
        TokenFactory::create(["read"], &policy),
        Err(SasError::SharedKeyTooShort)
    ));
}

const SETTINGS: &str = r#"{
    "policies": [
        {
            "skn": "partner",
            "key": "partner-shared-secret-value",
            "hash_type": "sha3-256",
            "token_lifetime": 600,
            "allowed_permissions": ["read"],
            "resource_expression": "https://api\\.example\\.com/.*",
            "additional_keys": ["Tenant"]
        }
    ],
    "policy_claims": [
        { "skn": "partner", "claim_type": "tenant", "claim_value": "acme" }
    ]
}"#;

#[tokio::test]
async fn test_settings_repository_end_to_end() {
    let repository = Arc::new(
        SettingsPolicyRepository::new(PolicyOptions::from_json_str(SETTINGS).unwrap()).unwrap(),
    );
    let policy = repository.get_policy("partner").await.unwrap();
    assert_eq!(policy.hash_algorithm(), HashAlgorithm::Sha3_256);

    let token =
        TokenFactory::create_with_values(["https://api.example.com/orders"], [("Tenant", "acme")], &policy)
            .unwrap();
    let authorizer = SasAuthorizer::new(TokenValidator::new(repository.clone()));
    let header = token.to_base64(Some("SharedAccessSignature"));

    let context = authorizer
        .authorize(
            &url("https://api.example.com/orders/42"),
            [("Authorization", header.as_str())],
        )
        .await
        .unwrap();
    assert_eq!(context.skn, "partner");
    assert_eq!(context.permissions, ["read"]);
    assert_eq!(context.claims, vec![("tenant".to_string(), "acme".to_string())]);

    let forged = token.clone().with_additional_value("tenant", "other").to_base64(None);
    let rejection = authorizer
        .authorize(
            &url("https://api.example.com/orders/42"),
            [("Authorization", forged.as_str())],
        )
        .await
        .unwrap_err();
    assert_eq!(rejection.status, 401);
    assert_eq!(rejection.code, TokenResponseCode::TokenTampered);

    assert!(matches!(
        repository.remove_policy("partner").await,
        Err(SasError::NotSupported(_))
    ));
}
