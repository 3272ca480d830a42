use actix_web::{get, post, web, HttpRequest, HttpResponse};
use gateway_core::hmac::verify_hmac;
use gateway_core::security::constant_time_eq;
use gateway_payments::{SettlementOutcome, SettlementQuery, SettlementRecord};
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::state::AppState;
use crate::webhook::{self, SettlementWebhook};

fn validate_hmac(req: &HttpRequest, body_bytes: &[u8], state: &AppState) -> Result<(), HttpResponse> {
    let header_value = req.headers().get("X-Facilitator-Auth").and_then(|v| v.to_str().ok());
    match header_value {
        Some(sig) if verify_hmac(&state.hmac_secret, body_bytes, sig) => Ok(()),
        Some(_) => {
            tracing::warn!("HMAC verification failed — signature mismatch");
            metrics::HMAC_FAILURES.with_label_values(&["invalid"]).inc();
            Err(HttpResponse::Unauthorized().json(serde_json::json!({"error": "authentication failed"})))
        }
        None => {
            tracing::warn!("HMAC header missing on authenticated endpoint");
            metrics::HMAC_FAILURES.with_label_values(&["missing"]).inc();
            Err(HttpResponse::Unauthorized().json(serde_json::json!({"error": "authentication required"})))
        }
    }
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok", "service": "gateway-facilitator"}))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);
            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            let public_metrics = std::env::var("X402_PUBLIC_METRICS").map(|v| v == "true" || v == "1").unwrap_or(false);
            if !public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }
    HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(metrics::metrics_output())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub tx_hash: String,
    pub expected_token: String,
    pub expected_chain: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_amount_micro: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

/// Answers a settlement-oracle query for a resource server. Backed by
/// whichever `SettlementOracle` the service was bootstrapped with
/// (embedded registry or a further upstream HTTP oracle).
#[post("/verify")]
pub async fn verify(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    if let Err(resp) = validate_hmac(&req, &body, &state) {
        return resp;
    }
    let parsed: VerifyRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid request body"})),
    };

    let outcome = state
        .oracle
        .check(&SettlementQuery {
            tx_hash: parsed.tx_hash,
            expected_token: parsed.expected_token,
            expected_chain: parsed.expected_chain,
        })
        .await;

    match outcome {
        SettlementOutcome::Settled(SettlementRecord { settled_amount_micro, token, chain }) => {
            HttpResponse::Ok().json(VerifyResponse { settled: true, settled_amount_micro: Some(settled_amount_micro), token: Some(token), chain: Some(chain) })
        }
        SettlementOutcome::NotFound | SettlementOutcome::Mismatch => {
            HttpResponse::Ok().json(VerifyResponse { settled: false, settled_amount_micro: None, token: None, chain: None })
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSettlementRequest {
    pub tx_hash: String,
    pub settled_amount_micro: u64,
    pub token: String,
    pub chain: String,
    pub payer: String,
}

/// Feeds the embedded registry oracle. Only meaningful when this service
/// was bootstrapped in embedded mode; returns 409 otherwise. A successful
/// registration fires the configured settlement-oracle webhooks (§2.2).
#[post("/settlements")]
pub async fn register_settlement(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    if let Err(resp) = validate_hmac(&req, &body, &state) {
        return resp;
    }
    let Some(registry) = &state.embedded_registry else {
        return HttpResponse::Conflict().json(serde_json::json!({"error": "service is not running in embedded oracle mode"}));
    };
    let parsed: RegisterSettlementRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid request body"})),
    };
    registry.register(
        &parsed.tx_hash,
        SettlementRecord { settled_amount_micro: parsed.settled_amount_micro, token: parsed.token.clone(), chain: parsed.chain.clone() },
    );

    if !state.webhook_urls.is_empty() {
        webhook::fire_webhooks(
            &state.http_client,
            &state.webhook_urls,
            SettlementWebhook {
                event: "settlement.registered".to_string(),
                payer: parsed.payer,
                amount_micro: parsed.settled_amount_micro.to_string(),
                transaction: Some(parsed.tx_hash),
                network: parsed.chain.clone(),
                token: parsed.token,
                chain_id: parsed.chain,
                timestamp: gateway_core::clock::unix_now(),
            },
            state.webhook_hmac_key.as_deref(),
        );
    }

    HttpResponse::Ok().json(serde_json::json!({"status": "registered"}))
}
