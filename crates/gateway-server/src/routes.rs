use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use gateway_core::clock::unix_now_millis;
use gateway_limiter::{Identity, ProbeOutcome, ReservationOutcome};
use gateway_payments::{compute_cost_micro, ChallengeEnvelope, IncomingRequest, PaymentDecision, PricingTable};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::state::AppState;
use crate::{auth, metrics};

fn client_identity(req: &HttpRequest, authorization: &Option<String>) -> Identity {
    if let Some(auth) = authorization {
        if let Some(key) = auth.strip_prefix("Bearer ").filter(|k| k.starts_with("dk_")) {
            return Identity::ApiKey(key[..key.len().min(32)].to_string());
        }
    }
    let ip = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    Identity::Anonymous(ip)
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "gateway-server",
        "boot_source": state.boot_report.source,
        "boot_state": format!("{:?}", state.boot_report.state),
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.config.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| gateway_core::security::constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);
            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({"error": "unauthorized"}));
            }
        }
        None => return HttpResponse::Forbidden().json(serde_json::json!({"error": "set METRICS_TOKEN to access /metrics"})),
    }
    HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(metrics::metrics_output())
}

#[get("/.well-known/jwks.json")]
pub async fn jwks() -> HttpResponse {
    HttpResponse::Ok().json(auth::jwks_document())
}

/// On-demand reconciliation (§4.7), gated behind the same operator bearer
/// token as `/metrics` — the daily 02:00 UTC run in `main.rs` is the
/// primary path, this is for triggering one out of band.
#[post("/admin/reconcile")]
pub async fn admin_reconcile(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, GatewayError> {
    match &state.config.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| gateway_core::security::constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);
            if !authorized {
                return Err(GatewayError::Authentication);
            }
        }
        None => return Err(GatewayError::Authentication),
    }

    let summary = gateway_ledger::reconcile(&state.ledger, &state.reconciliation_cache, state.config.reconciliation_rounding_threshold_micro);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ran_at": summary.ran_at,
        "divergences": summary.divergences.len(),
        "rounding_drift_micro": summary.rounding_drift_micro,
        "rounding_threshold_exceeded": summary.rounding_threshold_exceeded,
    })))
}

#[derive(Deserialize)]
pub struct NonceRequest {
    pub wallet_address: String,
}

#[post("/auth/nonce")]
pub async fn auth_nonce(state: web::Data<AppState>, body: web::Json<NonceRequest>) -> HttpResponse {
    let nonce = state.auth_sessions.issue_nonce(&body.wallet_address);
    HttpResponse::Ok().json(serde_json::json!({ "nonce": nonce }))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub wallet_address: String,
    pub nonce: String,
    pub signature: String,
}

#[post("/auth/verify")]
pub async fn auth_verify(state: web::Data<AppState>, body: web::Json<VerifyRequest>) -> Result<HttpResponse, GatewayError> {
    let session = state.auth_sessions.verify(&body.wallet_address, &body.nonce, &body.signature).ok_or(GatewayError::Authentication)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": session.token,
        "expires_in": session.expires_in,
        "wallet_address": session.wallet_address,
    })))
}

#[derive(Deserialize)]
pub struct IssueKeyRequest {
    pub account_key: String,
    pub daily_limit_micro: Option<u64>,
}

#[post("/keys")]
pub async fn issue_key(state: web::Data<AppState>, body: web::Json<IssueKeyRequest>) -> HttpResponse {
    let (key_id, secret) = state.api_keys.issue(&body.account_key, body.daily_limit_micro);
    HttpResponse::Ok().json(serde_json::json!({ "key_id": key_id, "key": secret }))
}

#[delete("/keys/{id}")]
pub async fn revoke_key(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    if state.api_keys.revoke(&path) {
        HttpResponse::Ok().json(serde_json::json!({ "status": "revoked" }))
    } else {
        HttpResponse::NotFound().json(serde_json::json!({ "error": "key not found" }))
    }
}

#[get("/keys/{id}/balance")]
pub async fn key_balance(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let Some(account_key) = state.api_keys.account_for(&path) else {
        return HttpResponse::NotFound().json(serde_json::json!({ "error": "key not found" }));
    };
    let account = state.ledger.account(&account_key);
    HttpResponse::Ok().json(serde_json::json!({
        "unlocked_micro": account.unlocked,
        "reserved_micro": account.reserved,
        "consumed_micro": account.consumed,
    }))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub token_id: String,
    pub message: String,
    pub model: Option<String>,
    pub max_tokens: Option<u64>,
}

#[derive(Serialize)]
pub struct Billing {
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_micro: Option<u64>,
    pub request_id: String,
}

#[post("/agent/chat")]
pub async fn agent_chat(req: HttpRequest, state: web::Data<AppState>, body: web::Json<ChatRequest>) -> Result<HttpResponse, GatewayError> {
    let model = body.model.clone().unwrap_or_else(|| "default".to_string());
    let max_tokens = body.max_tokens.unwrap_or(256);
    let now_ms = unix_now_millis();

    // Circuit breaker gates the upstream call before any ledger write (S5).
    if state.circuit_breaker.check("inference", &model, now_ms) == ProbeOutcome::Denied {
        metrics::REQUESTS.with_label_values(&["/agent/chat", "503"]).inc();
        return Err(GatewayError::CircuitOpen);
    }

    let authorization = req.headers().get("authorization").and_then(|v| v.to_str().ok()).map(String::from);
    let payment_receipt = req.headers().get("x-payment-receipt").and_then(|v| v.to_str().ok()).map(String::from);
    let payment_nonce = req.headers().get("x-payment-nonce").and_then(|v| v.to_str().ok()).map(String::from);
    let identity = client_identity(&req, &authorization);
    let request_id = req.headers().get("x-request-id").and_then(|v| v.to_str().ok()).map(String::from).unwrap_or_else(|| gateway_core::clock::new_nonce().to_string());

    // Cost-ceiling tier (§4.1 C4) gates on an estimate before any ledger
    // reservation is attempted; the reservation is reconciled to the real
    // cost once the payment decision is known.
    let estimated_micro = state.pricing.price_for(&body.token_id, &model).map(|p| compute_cost_micro(&p, max_tokens)).unwrap_or(0);
    let cost_date = (now_ms / 86_400_000).to_string();
    let cost_reservation = match state.cost_ceiling.reserve(&cost_date, (estimated_micro / 10_000) as i64) {
        Ok((ReservationOutcome::Allowed, reservation)) => reservation,
        Ok((ReservationOutcome::Denied, _)) | Err(()) => {
            metrics::REQUESTS.with_label_values(&["/agent/chat", "503"]).inc();
            return Err(GatewayError::GlobalLimit { retry_after_secs: 60 });
        }
    };

    state.audit.append(
        &request_id,
        &body.token_id,
        "agent_chat",
        gateway_audit::Phase::Intent,
        serde_json::json!({ "model": model, "max_tokens": max_tokens }),
        gateway_core::clock::unix_now(),
    );

    let incoming = IncomingRequest {
        method: "POST".to_string(),
        path: "/agent/chat".to_string(),
        authorization,
        payment_receipt,
        payment_nonce,
        request_id: request_id.clone(),
        identity,
        token_id: body.token_id.clone(),
        model: model.clone(),
        max_tokens,
    };

    let decision = match state.decision_engine.decide(&incoming, now_ms).await {
        Ok(decision) => decision,
        Err(e) => {
            metrics::PAYMENT_DECISIONS.with_label_values(&["rejected"]).inc();
            cost_reservation.release(0);
            state.audit.append(
                &request_id,
                &body.token_id,
                "agent_chat",
                gateway_audit::Phase::Denied,
                serde_json::json!({ "reason": format!("{e:?}") }),
                gateway_core::clock::unix_now(),
            );
            return Err(e.into());
        }
    };

    let (method_label, amount_micro) = match &decision {
        PaymentDecision::Free { .. } => ("free", None),
        PaymentDecision::KeyPath { cost_micro, .. } => ("api_key", Some(*cost_micro)),
        PaymentDecision::ReceiptPath { receipt, .. } => ("x402", Some(receipt.settled_amount_micro)),
        PaymentDecision::ChallengeIssued { challenge, .. } => {
            metrics::PAYMENT_DECISIONS.with_label_values(&["challenge_issued"]).inc();
            cost_reservation.release(0);
            return Ok(HttpResponse::PaymentRequired().json(serde_json::json!({
                "error": "Payment required",
                "code": "PAYMENT_REQUIRED",
                "challenge": ChallengeEnvelope::from(challenge),
            })));
        }
    };

    cost_reservation.release((amount_micro.unwrap_or(0) / 10_000) as i64);
    metrics::PAYMENT_DECISIONS.with_label_values(&[method_label]).inc();
    state.billing.record(&request_id, method_label, amount_micro);
    state.audit.append(
        &request_id,
        &body.token_id,
        "agent_chat",
        gateway_audit::Phase::Ok,
        serde_json::json!({ "method": method_label, "amount_micro": amount_micro }),
        gateway_core::clock::unix_now(),
    );

    match state.chat_provider.complete(&model, &body.message).await {
        Ok(completion) => {
            state.circuit_breaker.record_success("inference", &model);
            metrics::REQUESTS.with_label_values(&["/agent/chat", "200"]).inc();
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "completion": completion,
                "billing": Billing { method: method_label, amount_micro, request_id },
            })))
        }
        Err(e) => {
            state.circuit_breaker.record_failure("inference", &model, now_ms);
            tracing::warn!(error = %e, model, "upstream provider call failed");
            metrics::REQUESTS.with_label_values(&["/agent/chat", "502"]).inc();
            state.audit.append(
                &request_id,
                &body.token_id,
                "agent_chat",
                gateway_audit::Phase::Err,
                serde_json::json!({ "error": e }),
                gateway_core::clock::unix_now(),
            );
            Err(GatewayError::ProviderUnavailable)
        }
    }
}
