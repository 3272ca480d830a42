//! Validated API key lookup (B3 key-path, §4.10).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedApiKey {
    pub key_id: String,
    pub account_key: String,
    pub daily_limit_micro: Option<u64>,
}

/// Looks up and password-hash-verifies a presented API key. Implemented
/// outside this crate (backed by whatever key store the deployment uses);
/// `gateway-payments` only depends on the trait.
pub trait ApiKeyStore: Send + Sync {
    /// `lookup_hash` first, falling back to a password-hash compare of the
    /// full secret only for entries whose lookup hash matches — callers
    /// must rate-limit on the first 32 chars of the key before calling
    /// this (§4.10) so a single slow compare can't be used to burn CPU.
    fn validate(&self, presented_key: &str) -> Option<ValidatedApiKey>;
}

/// Pricing table entry keyed by `(token_id, model)`.
#[derive(Debug, Clone, Copy)]
pub struct PriceEntry {
    pub micro_per_max_token: u64,
}

pub trait PricingTable: Send + Sync {
    fn price_for(&self, token_id: &str, model: &str) -> Option<PriceEntry>;
}

pub fn compute_cost_micro(entry: &PriceEntry, max_tokens: u64) -> u64 {
    entry.micro_per_max_token.saturating_mul(max_tokens)
}
