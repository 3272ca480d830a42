//! Bootstrap an embedded facilitator instance.
//!
//! Used by the gateway server binary to initialize an in-process
//! settlement oracle without running a separate HTTP service.

use std::sync::Arc;

use crate::embedded_oracle::EmbeddedRegistryOracle;
use crate::state::AppState;
use crate::webhook;

/// Configuration for bootstrapping an embedded facilitator.
pub struct BootstrapConfig {
    /// HMAC shared secret (required).
    pub hmac_secret: Vec<u8>,
    /// Webhook URLs for settlement notifications.
    pub webhook_urls: Vec<String>,
    /// Metrics bearer token (as raw bytes).
    pub metrics_token: Option<Vec<u8>>,
}

/// Bootstrap an embedded facilitator instance.
///
/// Validates webhook URLs, derives the webhook HMAC key, and constructs the
/// shared [`AppState`] around a fresh [`EmbeddedRegistryOracle`].
///
/// # Panics
///
/// Calls `std::process::exit(1)` if any webhook URL fails validation.
pub fn bootstrap_embedded_facilitator(config: BootstrapConfig) -> Arc<AppState> {
    tracing::info!("Embedded facilitator: bootstrapping in-process settlement registry");

    if !config.webhook_urls.is_empty() {
        tracing::info!("Webhook URLs configured: {}", config.webhook_urls.len());
        if let Err(e) = webhook::validate_webhook_urls(&config.webhook_urls) {
            tracing::error!("Invalid webhook configuration: {e}");
            std::process::exit(1);
        }
    }

    let webhook_hmac_key = Some(gateway_core::hmac::compute_hmac(&config.hmac_secret, b"gateway-webhook-hmac").into_bytes());
    let registry = Arc::new(EmbeddedRegistryOracle::new());

    Arc::new(AppState {
        oracle: registry.clone(),
        embedded_registry: Some(registry),
        hmac_secret: config.hmac_secret,
        webhook_urls: config.webhook_urls,
        http_client: webhook::webhook_client(),
        metrics_token: config.metrics_token,
        webhook_hmac_key,
    })
}

/// Bootstrap a client-mode facilitator that consults an upstream HTTP
/// settlement oracle instead of an embedded registry.
pub fn bootstrap_http_facilitator(
    base_url: String,
    hmac_secret: Vec<u8>,
    webhook_urls: Vec<String>,
    metrics_token: Option<Vec<u8>>,
) -> Arc<AppState> {
    tracing::info!(base_url = %base_url, "Facilitator client: consulting upstream settlement oracle over HTTP");

    if !webhook_urls.is_empty() {
        if let Err(e) = webhook::validate_webhook_urls(&webhook_urls) {
            tracing::error!("Invalid webhook configuration: {e}");
            std::process::exit(1);
        }
    }

    let http_client = webhook::webhook_client();
    let oracle = Arc::new(crate::http_oracle::FacilitatorHttpOracle::new(http_client.clone(), base_url, hmac_secret.clone()));
    let webhook_hmac_key = Some(gateway_core::hmac::compute_hmac(&hmac_secret, b"gateway-webhook-hmac").into_bytes());

    Arc::new(AppState {
        oracle,
        embedded_registry: None,
        hmac_secret,
        webhook_urls,
        http_client,
        metrics_token,
        webhook_hmac_key,
    })
}
