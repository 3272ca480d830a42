//! Upstream inference provider abstraction gated by the circuit breaker.
//!
//! Content generation itself is out of scope for this workspace; the trait
//! exists so `/agent/chat` has something concrete to call through the
//! circuit breaker (C5) and the payment decision (C11) it gates.

use async_trait::async_trait;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, model: &str, message: &str) -> Result<String, String>;
}

/// Default provider used when no upstream is configured. Never fails —
/// suitable for local development and the test harness.
pub struct EchoChatProvider;

#[async_trait]
impl ChatProvider for EchoChatProvider {
    async fn complete(&self, model: &str, message: &str) -> Result<String, String> {
        Ok(format!("[{model}] {message}"))
    }
}

/// Forwards to an upstream HTTP inference endpoint. 5xx and transport
/// errors are surfaced as `Err` so the caller can record a circuit-breaker
/// failure.
pub struct HttpChatProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatProvider {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().expect("client config is valid"), base_url }
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn complete(&self, model: &str, message: &str) -> Result<String, String> {
        let resp = self
            .client
            .post(format!("{}/v1/complete", self.base_url))
            .json(&serde_json::json!({"model": model, "message": message}))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("upstream returned {}", resp.status()));
        }
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| e.to_string())?
            .get("completion")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "upstream response missing completion field".to_string())
    }
}
