use std::sync::Arc;

use gateway_payments::SettlementOracle;

use crate::embedded_oracle::EmbeddedRegistryOracle;

/// Shared application state for the facilitator service.
pub struct AppState {
    pub oracle: Arc<dyn SettlementOracle>,
    /// Present only when `oracle` is the embedded registry — lets
    /// `/settlements` register new observed settlements at runtime.
    pub embedded_registry: Option<Arc<EmbeddedRegistryOracle>>,
    /// HMAC shared secret authenticating inbound requests to this service.
    /// Mandatory — the service refuses to start without it.
    pub hmac_secret: Vec<u8>,
    pub webhook_urls: Vec<String>,
    pub http_client: reqwest::Client,
    /// Separate bearer token for `/metrics` (not the HMAC secret).
    pub metrics_token: Option<Vec<u8>>,
    /// Derived key for webhook HMAC signing (domain-separated from auth secret).
    pub webhook_hmac_key: Option<Vec<u8>>,
}
