//! Payment decision — the admission state machine (C11, §4.10).

use std::sync::Arc;

use dashmap::DashMap;
use gateway_ledger::{FinalizeOutcome, Ledger, ReserveOutcome};
use gateway_limiter::{AdmissionDecision, AdmissionLimiter, Identity};

use crate::api_key::{compute_cost_micro, ApiKeyStore, PricingTable};
use crate::challenge::{BindingInput, Challenge, ChallengeIssuer};
use crate::verifier::{PresentedReceipt, ReceiptVerifier, VerificationFailure, VerifiedReceipt};

#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub payment_receipt: Option<String>,
    pub payment_nonce: Option<String>,
    pub request_id: String,
    pub identity: Identity,
    pub token_id: String,
    pub model: String,
    pub max_tokens: u64,
}

#[derive(Debug, Clone)]
pub enum PaymentDecision {
    Free { request_id: String },
    KeyPath { request_id: String, account_key: String, cost_micro: u64 },
    ReceiptPath { request_id: String, receipt: VerifiedReceipt },
    ChallengeIssued { request_id: String, challenge: Challenge },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    /// B2: both an Authorization header and receipt headers present.
    AmbiguousPayment,
    /// 401 — missing/bad/revoked key. Never returned for cost reasons.
    AuthenticationFailed,
    /// 402 — insufficient balance; client should retry via x402.
    InsufficientBalance,
    /// 402 — lost the idempotent-debit race; treat as a fresh attempt.
    DebitRaceLost,
    /// 429 — per-identity/key tier exceeded.
    RateLimited { retry_after_secs: u64 },
    /// 503 — limiter unhealthy or global cap hit.
    ServiceUnavailable { retry_after_secs: u64 },
    /// Receipt path failed verification; carries the classified reason.
    ReceiptInvalid(VerificationFailure),
}

pub struct PaymentDecisionEngine {
    free_routes: Vec<(String, String)>,
    admission: Arc<AdmissionLimiter>,
    ledger: Arc<Ledger>,
    api_keys: Arc<dyn ApiKeyStore>,
    pricing: Arc<dyn PricingTable>,
    issuer: Arc<ChallengeIssuer>,
    verifier: Arc<ReceiptVerifier>,
    processed_debits: DashMap<String, ()>,
}

impl PaymentDecisionEngine {
    pub fn new(
        free_routes: Vec<(String, String)>,
        admission: Arc<AdmissionLimiter>,
        ledger: Arc<Ledger>,
        api_keys: Arc<dyn ApiKeyStore>,
        pricing: Arc<dyn PricingTable>,
        issuer: Arc<ChallengeIssuer>,
        verifier: Arc<ReceiptVerifier>,
    ) -> Self {
        Self { free_routes, admission, ledger, api_keys, pricing, issuer, verifier, processed_debits: DashMap::new() }
    }

    pub async fn decide(&self, req: &IncomingRequest, now_ms: u64) -> Result<PaymentDecision, DecisionError> {
        // B1: free endpoint set.
        if self.free_routes.iter().any(|(m, p)| m == &req.method && p == &req.path) {
            return Ok(PaymentDecision::Free { request_id: req.request_id.clone() });
        }

        let has_auth = req.authorization.is_some();
        let has_receipt = req.payment_receipt.is_some() && req.payment_nonce.is_some();

        // B2: ambiguous.
        if has_auth && has_receipt {
            return Err(DecisionError::AmbiguousPayment);
        }

        // B3: dk_-prefixed bearer key.
        if let Some(auth) = &req.authorization {
            if let Some(key) = auth.strip_prefix("Bearer ").filter(|k| k.starts_with("dk_")) {
                return self.run_key_path(req, key, now_ms).await;
            }
        }

        // B4: receipt headers.
        if let (Some(receipt), Some(nonce)) = (&req.payment_receipt, &req.payment_nonce) {
            return self.run_receipt_path(req, receipt, nonce, now_ms).await;
        }

        // B5: otherwise, issue a challenge.
        self.run_challenge_path(req, now_ms)
    }

    async fn run_key_path(&self, req: &IncomingRequest, key: &str, now_ms: u64) -> Result<PaymentDecision, DecisionError> {
        // Rate-limit on the key's first 32 chars only, never the full secret.
        let prefix = &key[..key.len().min(32)];
        let identity = Identity::ApiKey(prefix.to_string());
        self.admit(&identity, now_ms)?;

        let validated = self.api_keys.validate(key).ok_or(DecisionError::AuthenticationFailed)?;

        let price = self
            .pricing
            .price_for(&req.token_id, &req.model)
            .ok_or(DecisionError::InsufficientBalance)?;
        let cost_micro = compute_cost_micro(&price, req.max_tokens);

        // Idempotent on request_id: first caller to see this id performs the debit.
        use dashmap::mapref::entry::Entry;
        match self.processed_debits.entry(req.request_id.clone()) {
            Entry::Occupied(_) => return Err(DecisionError::DebitRaceLost),
            Entry::Vacant(e) => {
                e.insert(());
            }
        }

        match self.ledger.reserve(&validated.account_key, cost_micro, &req.request_id) {
            ReserveOutcome::Reserved { receipt } => {
                match self.ledger.finalize(&receipt.reservation_id, &req.request_id) {
                    FinalizeOutcome::Finalized => Ok(PaymentDecision::KeyPath {
                        request_id: req.request_id.clone(),
                        account_key: validated.account_key,
                        cost_micro,
                    }),
                    FinalizeOutcome::ReservationNotFound => Err(DecisionError::DebitRaceLost),
                }
            }
            ReserveOutcome::CreditsLocked | ReserveOutcome::FallbackUsdc => Err(DecisionError::InsufficientBalance),
        }
    }

    async fn run_receipt_path(&self, req: &IncomingRequest, receipt_tx: &str, nonce: &str, now_ms: u64) -> Result<PaymentDecision, DecisionError> {
        // Rate-limit per wallet proxy: the nonce prefix, until the actual wallet is known.
        let identity = Identity::Anonymous(format!("nonce:{}", &nonce[..nonce.len().min(16)]));
        self.admit(&identity, now_ms)?;

        let binding = BindingInput {
            path: req.path.clone(),
            method: req.method.clone(),
            token_id: req.token_id.clone(),
            model: req.model.clone(),
            max_tokens: req.max_tokens,
        };
        let presented = PresentedReceipt { tx_hash: receipt_tx.to_string(), nonce: nonce.to_string(), binding };

        let verified = self
            .verifier
            .verify(&presented, nonce)
            .await
            .map_err(DecisionError::ReceiptInvalid)?;

        Ok(PaymentDecision::ReceiptPath { request_id: req.request_id.clone(), receipt: verified })
    }

    fn run_challenge_path(&self, req: &IncomingRequest, now_ms: u64) -> Result<PaymentDecision, DecisionError> {
        // Rate-limit challenge issuance per IP (conservative: the body is parsed).
        self.admit(&req.identity, now_ms)?;

        let binding = BindingInput {
            path: req.path.clone(),
            method: req.method.clone(),
            token_id: req.token_id.clone(),
            model: req.model.clone(),
            max_tokens: req.max_tokens,
        };
        let price = self.pricing.price_for(&req.token_id, &req.model);
        let amount_micro = price.map(|p| compute_cost_micro(&p, req.max_tokens)).unwrap_or(0);
        let challenge = self.issuer.issue(&binding, amount_micro);
        Ok(PaymentDecision::ChallengeIssued { request_id: req.request_id.clone(), challenge })
    }

    fn admit(&self, identity: &Identity, now_ms: u64) -> Result<(), DecisionError> {
        match self.admission.check(identity, now_ms) {
            AdmissionDecision::Allowed => Ok(()),
            AdmissionDecision::DeniedIdentity { retry_after_secs } => Err(DecisionError::RateLimited { retry_after_secs }),
            AdmissionDecision::DeniedGlobal { retry_after_secs } => Err(DecisionError::ServiceUnavailable { retry_after_secs }),
        }
    }
}
