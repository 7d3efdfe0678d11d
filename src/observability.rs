//! Log output for hosts embedding the validator.
//!
//! The crate only emits `tracing` events. Rejections go out at `warn` with
//! the signing key name and response code; issued tokens and acceptances at
//! `debug`. Secrets and signatures are never recorded. Hosts without their
//! own subscriber can install one here.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Subscriber settings for SAS validation logs.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Name logged once the subscriber is installed
    pub service_name: String,
    /// Filter directive applied when `RUST_LOG` is unset; `warn` keeps
    /// rejections and drops per-token acceptance events
    pub log_level: String,
    /// Emit one JSON object per event instead of text lines
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "sas-token".to_string(),
            log_level: "info".to_string(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    /// Name the host in the startup event.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Filter directive, e.g. `warn` or `info,sas_token=debug`.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Switch between JSON and text events.
    #[must_use]
    pub const fn with_json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Install a global subscriber for the crate's events.
///
/// Returns false and leaves the existing subscriber in place when the host
/// already installed one.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let installed = if config.json_output {
        tracing_subscriber::registry()
            .with(config.filter())
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(config.filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(service = %config.service_name, json = config.json_output, "SAS token logging enabled");
    }
    installed
}
