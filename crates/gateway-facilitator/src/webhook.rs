//! Settlement webhook notifications (§2.2 "Settlement-oracle webhooks").

use std::time::Duration;

use gateway_core::hmac::compute_hmac;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementWebhook {
    pub event: String,
    pub payer: String,
    pub amount_micro: String,
    pub transaction: Option<String>,
    pub network: String,
    pub token: String,
    pub chain_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookUrlError {
    #[error("webhook URL '{0}' does not use HTTPS")]
    NotHttps(String),
    #[error("webhook URL '{0}' targets a private, loopback, or local-domain host")]
    PrivateOrLocalTarget(String),
    #[error("webhook URL '{0}' could not be parsed")]
    Unparseable(String),
}

/// Validate every webhook URL uses HTTPS and does not target a private or
/// loopback address. Unlike a warn-only check, any violation is a hard
/// failure — callers must refuse to start rather than register the URL.
pub fn validate_webhook_urls(urls: &[String]) -> Result<(), WebhookUrlError> {
    for url_str in urls {
        if !url_str.starts_with("https://") {
            return Err(WebhookUrlError::NotHttps(url_str.clone()));
        }

        let parsed = url::Url::parse(url_str).map_err(|_| WebhookUrlError::Unparseable(url_str.clone()))?;
        match parsed.host() {
            Some(url::Host::Ipv4(ip)) => {
                if ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified() {
                    return Err(WebhookUrlError::PrivateOrLocalTarget(url_str.clone()));
                }
            }
            Some(url::Host::Ipv6(ip)) => {
                if ip.is_loopback() || ip.is_unspecified() {
                    return Err(WebhookUrlError::PrivateOrLocalTarget(url_str.clone()));
                }
            }
            Some(url::Host::Domain(domain)) => {
                let d = domain.to_lowercase();
                if d == "localhost" || d.ends_with(".local") || d.ends_with(".internal") {
                    return Err(WebhookUrlError::PrivateOrLocalTarget(url_str.clone()));
                }
            }
            None => return Err(WebhookUrlError::Unparseable(url_str.clone())),
        }
    }
    Ok(())
}

/// An HTTP client configured for webhook delivery: redirects disabled
/// (SSRF hardening — a redirect could retarget a validated HTTPS URL to an
/// internal host) and a bounded per-request timeout.
pub fn webhook_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(5))
        .build()
        .expect("webhook client config is static and always valid")
}

/// Fire-and-forget POST to each webhook URL. Best-effort per §5
/// "Non-blocking best-effort paths" — delivery failures are logged, never
/// propagated.
pub fn fire_webhooks(client: &reqwest::Client, urls: &[String], webhook: SettlementWebhook, hmac_secret: Option<&[u8]>) {
    let body_bytes = match serde_json::to_vec(&webhook) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize webhook payload");
            return;
        }
    };

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let body = body_bytes.clone();
        let hmac_sig = hmac_secret.map(|secret| compute_hmac(secret, &body));

        tokio::spawn(async move {
            let mut req = client.post(&url).header("content-type", "application/json");
            if let Some(ref sig) = hmac_sig {
                req = req.header("X-Webhook-Signature", sig.as_str());
            }
            match req.body(body).send().await {
                Ok(resp) => tracing::debug!(url = %url, status = %resp.status(), "webhook delivered"),
                Err(e) => tracing::warn!(url = %url, error = %e, "webhook delivery failed"),
            }
        });
    }
}
