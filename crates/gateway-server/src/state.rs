//! Shared application state for the gateway server binary.

use std::sync::Arc;

use gateway_audit::AuditTrail;
use gateway_core::kv::{AtomicKv, InMemoryKv, SqliteKv};
use gateway_ledger::{BalanceCache, BillingLog, Ledger, WalWriterLock};
use gateway_limiter::{AdmissionLimiter, CircuitBreaker, CostCeilingLimiter};
use gateway_payments::{ChallengeIssuer, PaymentDecisionEngine, ReceiptVerifier, SettlementOracle};
use gateway_recovery::BootReport;

use crate::auth::AuthSessions;
use crate::config::GatewayConfig;
use crate::keys::ApiKeyRegistry;
use crate::pricing::StaticPricingTable;
use crate::provider::ChatProvider;

pub struct AppState {
    pub config: GatewayConfig,
    pub ledger: Arc<Ledger>,
    pub admission: Arc<AdmissionLimiter>,
    pub cost_ceiling: Arc<CostCeilingLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub api_keys: Arc<ApiKeyRegistry>,
    pub pricing: Arc<StaticPricingTable>,
    pub issuer: Arc<ChallengeIssuer>,
    pub decision_engine: Arc<PaymentDecisionEngine>,
    pub billing: Arc<BillingLog>,
    pub audit: Arc<AuditTrail>,
    pub reconciliation_cache: Arc<BalanceCache>,
    pub auth_sessions: Arc<AuthSessions>,
    pub chat_provider: Arc<dyn ChatProvider>,
    pub wal_lock: Arc<WalWriterLock>,
    pub boot_report: BootReport,
}

pub fn build_kv(config: &GatewayConfig) -> Arc<dyn AtomicKv> {
    match &config.kv_database_url {
        Some(path) => match SqliteKv::open(path) {
            Ok(kv) => {
                tracing::info!(path, "KV store: SQLite-backed (durable across restarts)");
                Arc::new(kv)
            }
            Err(e) => {
                tracing::error!(error = %e, path, "failed to open SQLite KV store");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("KV_DATABASE_URL not set — using in-memory KV store; nonce/fence state does not survive a restart");
            Arc::new(InMemoryKv::new())
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_state(
    config: GatewayConfig,
    ledger: Arc<Ledger>,
    oracle: Arc<dyn SettlementOracle>,
    chat_provider: Arc<dyn ChatProvider>,
    boot_report: BootReport,
) -> Arc<AppState> {
    let kv = build_kv(&config);

    let admission = Arc::new(AdmissionLimiter::new(kv.clone(), config.public_daily_limit, config.authenticated_daily_limit, config.daily_cap));
    let cost_ceiling = Arc::new(CostCeilingLimiter::new(kv.clone(), config.cost_ceiling_cents));
    let circuit_breaker = Arc::new(CircuitBreaker::new(config.failure_threshold, config.failure_window_ms, config.cooldown_ms));
    let api_keys = Arc::new(ApiKeyRegistry::new());
    let pricing = Arc::new(StaticPricingTable::new(0));
    let issuer = ChallengeIssuer::new(config.hmac_secret.clone(), config.recipient_address.clone(), config.expected_chain.clone(), config.expected_token.clone());
    let credit_notes = Arc::new(gateway_payments::CreditNoteBook::new(config.credit_note_cap_micro));
    let wal_lock = Arc::new(WalWriterLock::new(kv.clone(), gateway_core::clock::new_nonce().to_string(), config.wal_lock_ttl_seconds));
    let verifier = Arc::new(ReceiptVerifier::new(
        issuer.clone(),
        oracle,
        kv,
        credit_notes,
        config.hmac_secret.clone(),
        config.hmac_secret_prev.clone(),
        config.expected_token.clone(),
        config.expected_chain.clone(),
    ));

    let decision_engine = Arc::new(PaymentDecisionEngine::new(
        config.free_endpoints.clone(),
        admission.clone(),
        ledger.clone(),
        api_keys.clone(),
        pricing.clone(),
        issuer.clone(),
        verifier,
    ));

    let auth_sessions = AuthSessions::new(config.hmac_secret.clone());

    Arc::new(AppState {
        config,
        ledger,
        admission,
        cost_ceiling,
        circuit_breaker,
        api_keys,
        pricing,
        issuer,
        decision_engine,
        billing: Arc::new(BillingLog::new()),
        audit: Arc::new(AuditTrail::new()),
        reconciliation_cache: Arc::new(BalanceCache::new()),
        auth_sessions,
        chat_provider,
        wal_lock,
        boot_report,
    })
}
