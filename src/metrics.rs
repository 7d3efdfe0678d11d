//! Prometheus metrics for SAS token issuing and validation.

use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, register_counter, register_counter_vec};

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sas_tokens_issued_total",
        "Total number of SAS tokens issued",
        &["algorithm"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Token validations counter, labelled by response code.
pub static TOKEN_VALIDATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sas_token_validations_total",
        "Total number of SAS token validations",
        &["code"]
    )
    .expect("Failed to register token_validations metric")
});

/// Replayed nonces counter.
pub static NONCE_REPLAYS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "sas_nonce_replays_total",
        "Total number of rejected nonce replays"
    )
    .expect("Failed to register nonce_replays metric")
});

/// Record a token issuance.
pub fn record_token_issued(algorithm: &str) {
    TOKENS_ISSUED.with_label_values(&[algorithm]).inc();
}

/// Record a validation outcome.
pub fn record_validation(code: &str) {
    TOKEN_VALIDATIONS.with_label_values(&[code]).inc();
}

/// Record a rejected nonce replay.
pub fn record_nonce_replay() {
    NONCE_REPLAYS.inc();
}
