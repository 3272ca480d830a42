//! Single configuration object loaded once at boot (§6 Config, §2.1).

use std::fmt;

/// All tunables named in §6 plus process wiring. Construction fails loudly
/// for missing security-critical values in production.
pub struct GatewayConfig {
    pub bind_port: u16,
    pub kv_database_url: Option<String>,
    pub hmac_secret: Vec<u8>,
    pub hmac_secret_prev: Option<Vec<u8>>,
    pub webhook_hmac_secret: Vec<u8>,
    pub allowed_origins: Vec<String>,
    pub metrics_token: Option<Vec<u8>>,
    pub rate_limit_rpm: u64,

    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub cooldown_ms: u64,
    pub max_pending_reconciliation: usize,
    pub public_daily_limit: i64,
    pub authenticated_daily_limit: i64,
    pub cost_ceiling_cents: i64,
    pub daily_cap: i64,
    pub challenge_ttl_seconds: u64,
    pub reservation_ttl_seconds: u64,
    pub max_runtime_minutes: u64,
    pub free_endpoints: Vec<(String, String)>,
    pub exclude_patterns: Vec<String>,
    pub max_files_per_pr: u32,
    pub max_diff_bytes: u64,

    pub expected_token: String,
    pub expected_chain: String,
    pub recipient_address: String,
    pub credit_note_cap_micro: i64,
    pub wal_lock_ttl_seconds: u64,
    pub reconciliation_rounding_threshold_micro: i64,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let hmac_secret = std::env::var("GATEWAY_HMAC_SECRET").ok().filter(|s| !s.is_empty()).map(|s| s.into_bytes());
        let insecure = std::env::var("GATEWAY_INSECURE_NO_HMAC").map(|v| v == "true" || v == "1").unwrap_or(false);

        let hmac_secret = match hmac_secret {
            Some(secret) => secret,
            None if insecure => {
                tracing::warn!("GATEWAY_HMAC_SECRET not set — running with an empty HMAC secret (GATEWAY_INSECURE_NO_HMAC=true)");
                Vec::new()
            }
            None => {
                tracing::error!(
                    "GATEWAY_HMAC_SECRET is required. Set it to a secure random value \
                     (e.g. `openssl rand -hex 32`), or GATEWAY_INSECURE_NO_HMAC=true for local dev only."
                );
                std::process::exit(1);
            }
        };

        let hmac_secret_prev = std::env::var("GATEWAY_HMAC_SECRET_PREV").ok().filter(|s| !s.is_empty()).map(|s| s.into_bytes());

        let webhook_hmac_secret = std::env::var("GATEWAY_WEBHOOK_HMAC_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.into_bytes())
            .unwrap_or_else(|| hmac_secret.clone());

        let allowed_origins = split_env_list("ALLOWED_ORIGINS");
        let metrics_token = std::env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty()).map(|s| s.into_bytes());
        let rate_limit_rpm = env_u64("RATE_LIMIT_RPM", 120);

        let free_endpoints = split_env_list("FREE_ENDPOINTS")
            .into_iter()
            .filter_map(|entry| entry.split_once(' ').map(|(m, p)| (m.to_string(), p.to_string())))
            .collect::<Vec<_>>();
        let free_endpoints = if free_endpoints.is_empty() {
            vec![
                ("POST".into(), "/auth/nonce".into()),
                ("POST".into(), "/auth/verify".into()),
                ("GET".into(), "/health".into()),
                ("GET".into(), "/metrics".into()),
                ("GET".into(), "/.well-known/jwks.json".into()),
            ]
        } else {
            free_endpoints
        };

        Self {
            bind_port: env_u16("PORT", 4020),
            kv_database_url: std::env::var("KV_DATABASE_URL").ok().filter(|s| !s.is_empty()),
            hmac_secret,
            hmac_secret_prev,
            webhook_hmac_secret,
            allowed_origins,
            metrics_token,
            rate_limit_rpm,
            failure_threshold: env_u32("FAILURE_THRESHOLD", 5),
            failure_window_ms: env_u64("FAILURE_WINDOW_MS", 60_000),
            cooldown_ms: env_u64("COOLDOWN_MS", 30_000),
            max_pending_reconciliation: env_u64("MAX_PENDING_RECONCILIATION", 1_000) as usize,
            public_daily_limit: env_i64("PUBLIC_DAILY_LIMIT", 100),
            authenticated_daily_limit: env_i64("AUTHENTICATED_DAILY_LIMIT", 10_000),
            cost_ceiling_cents: env_i64("COST_CEILING_CENTS", 500_000),
            daily_cap: env_i64("DAILY_CAP", 1_000_000),
            challenge_ttl_seconds: env_u64("CHALLENGE_TTL_SECONDS", 300),
            reservation_ttl_seconds: env_u64("RESERVATION_TTL_SECONDS", 60),
            max_runtime_minutes: env_u64("MAX_RUNTIME_MINUTES", 30),
            free_endpoints,
            exclude_patterns: split_env_list("EXCLUDE_PATTERNS"),
            max_files_per_pr: env_u32("MAX_FILES_PER_PR", 50),
            max_diff_bytes: env_u64("MAX_DIFF_BYTES", 2_000_000),
            expected_token: std::env::var("EXPECTED_SETTLEMENT_TOKEN").unwrap_or_else(|_| "USDC".to_string()),
            expected_chain: std::env::var("EXPECTED_SETTLEMENT_CHAIN").unwrap_or_else(|_| "tempo-mainnet".to_string()),
            recipient_address: std::env::var("SETTLEMENT_RECIPIENT_ADDRESS").unwrap_or_else(|_| "0x0000000000000000000000000000000000000000".to_string()),
            credit_note_cap_micro: env_i64("CREDIT_NOTE_CAP_MICRO", 1_000_000_000),
            wal_lock_ttl_seconds: env_u64("WAL_LOCK_TTL_SECONDS", 30),
            reconciliation_rounding_threshold_micro: env_i64("RECONCILIATION_ROUNDING_THRESHOLD_MICRO", 1000),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_port", &self.bind_port)
            .field("kv_database_url", &self.kv_database_url)
            .field("hmac_secret", &"[REDACTED]")
            .field("hmac_secret_prev", &self.hmac_secret_prev.as_ref().map(|_| "[REDACTED]"))
            .field("webhook_hmac_secret", &"[REDACTED]")
            .field("allowed_origins", &self.allowed_origins)
            .field("metrics_token", &self.metrics_token.as_ref().map(|_| "[REDACTED]"))
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("failure_threshold", &self.failure_threshold)
            .field("failure_window_ms", &self.failure_window_ms)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("max_pending_reconciliation", &self.max_pending_reconciliation)
            .field("public_daily_limit", &self.public_daily_limit)
            .field("authenticated_daily_limit", &self.authenticated_daily_limit)
            .field("cost_ceiling_cents", &self.cost_ceiling_cents)
            .field("daily_cap", &self.daily_cap)
            .field("challenge_ttl_seconds", &self.challenge_ttl_seconds)
            .field("reservation_ttl_seconds", &self.reservation_ttl_seconds)
            .field("max_runtime_minutes", &self.max_runtime_minutes)
            .field("free_endpoints", &self.free_endpoints)
            .field("expected_token", &self.expected_token)
            .field("expected_chain", &self.expected_chain)
            .field("recipient_address", &self.recipient_address)
            .field("wal_lock_ttl_seconds", &self.wal_lock_ttl_seconds)
            .field("reconciliation_rounding_threshold_micro", &self.reconciliation_rounding_threshold_micro)
            .finish_non_exhaustive()
    }
}

fn split_env_list(var: &str) -> Vec<String> {
    std::env::var(var).ok().map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()).unwrap_or_default()
}

fn env_u16(var: &str, default: u16) -> u16 {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u32(var: &str, default: u32) -> u32 {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_i64(var: &str, default: i64) -> i64 {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_impl_redacts_secrets() {
        let config = GatewayConfig {
            bind_port: 4020,
            kv_database_url: None,
            hmac_secret: b"super-secret".to_vec(),
            hmac_secret_prev: Some(b"old-secret".to_vec()),
            webhook_hmac_secret: b"webhook-secret".to_vec(),
            allowed_origins: vec![],
            metrics_token: Some(b"token".to_vec()),
            rate_limit_rpm: 60,
            failure_threshold: 5,
            failure_window_ms: 60_000,
            cooldown_ms: 30_000,
            max_pending_reconciliation: 1000,
            public_daily_limit: 100,
            authenticated_daily_limit: 10_000,
            cost_ceiling_cents: 500_000,
            daily_cap: 1_000_000,
            challenge_ttl_seconds: 300,
            reservation_ttl_seconds: 60,
            max_runtime_minutes: 30,
            free_endpoints: vec![],
            exclude_patterns: vec![],
            max_files_per_pr: 50,
            max_diff_bytes: 2_000_000,
            expected_token: "USDC".into(),
            expected_chain: "tempo-mainnet".into(),
            recipient_address: "0xrecipient".into(),
            credit_note_cap_micro: 1_000_000_000,
            wal_lock_ttl_seconds: 30,
            reconciliation_rounding_threshold_micro: 1000,
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("old-secret"));
        assert!(!rendered.contains("webhook-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
