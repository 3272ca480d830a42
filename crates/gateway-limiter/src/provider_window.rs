//! Per-provider RPM/TPM sliding-window limiter (§4.3 c).

use std::sync::Arc;

use gateway_core::kv::AtomicKv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Allowed,
    RpmExceeded,
    TpmExceeded,
}

/// Two independent 60-second sliding windows per `(provider, model)` pair.
/// On KV unreachability this fails open — do not block inference because
/// the limiter is unhealthy; the circuit breaker bounds upstream damage.
pub struct ProviderWindowLimiter {
    kv: Arc<dyn AtomicKv>,
    rpm_cap: u64,
    tpm_cap: u64,
    window_ms: u64,
}

impl ProviderWindowLimiter {
    pub fn new(kv: Arc<dyn AtomicKv>, rpm_cap: u64, tpm_cap: u64) -> Self {
        Self {
            kv,
            rpm_cap,
            tpm_cap,
            window_ms: 60_000,
        }
    }

    pub fn check(&self, provider: &str, model: &str, tokens: u64, now_ms: u64) -> WindowDecision {
        let rpm_key = format!("provider_rpm:{provider}:{model}");
        let tpm_key = format!("provider_tpm:{provider}:{model}");

        match self.kv.sliding_window_insert(&rpm_key, now_ms, self.window_ms) {
            Ok(count) if count > self.rpm_cap => return WindowDecision::RpmExceeded,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, provider, "provider RPM window unreachable, failing open");
            }
        }

        for _ in 0..tokens.max(1) {
            match self.kv.sliding_window_insert(&tpm_key, now_ms, self.window_ms) {
                Ok(count) if count > self.tpm_cap => return WindowDecision::TpmExceeded,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, provider, "provider TPM window unreachable, failing open");
                    break;
                }
            }
        }

        WindowDecision::Allowed
    }
}
