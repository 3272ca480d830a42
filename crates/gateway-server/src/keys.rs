//! API key issuance and lookup backing the `/keys` CRUD surface and the
//! B3 key-path of the payment decision engine.
//!
//! Keys are shaped `dk_{key_id}.{secret_base64url}`. Only a SHA-256 digest
//! of the secret is ever stored; `validate` recomputes the digest and
//! compares it constant-time, the same primitive the challenge HMAC uses.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use dashmap::DashMap;
use gateway_core::security::constant_time_eq;
use gateway_payments::{ApiKeyStore, ValidatedApiKey};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
struct KeyRecord {
    account_key: String,
    secret_hash: [u8; 32],
    daily_limit_micro: Option<u64>,
    revoked: bool,
}

fn hash_secret(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// In-process API key registry. Survives only for process lifetime;
/// production deployments back this with the same KV/database the ledger
/// WAL uses, following the same trait-boundary pattern as [`gateway_core::kv::AtomicKv`].
pub struct ApiKeyRegistry {
    keys: DashMap<String, KeyRecord>,
    counter: AtomicU64,
}

impl ApiKeyRegistry {
    pub fn new() -> Self {
        Self { keys: DashMap::new(), counter: AtomicU64::new(0) }
    }

    /// Mints a new key for `account_key`. Returns the full bearer secret —
    /// the only time it is ever available in plaintext.
    pub fn issue(&self, account_key: &str, daily_limit_micro: Option<u64>) -> (String, String) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let key_id = format!("key{n:08x}");
        let mut raw_secret = [0u8; 24];
        for (i, byte) in raw_secret.iter_mut().enumerate() {
            *byte = ((gateway_core::clock::unix_now_millis() >> (i % 8)) ^ (n.wrapping_add(i as u64))) as u8;
        }
        let secret = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw_secret);
        let full_key = format!("dk_{key_id}.{secret}");

        self.keys.insert(
            key_id.clone(),
            KeyRecord { account_key: account_key.to_string(), secret_hash: hash_secret(&secret), daily_limit_micro, revoked: false },
        );
        (key_id, full_key)
    }

    pub fn revoke(&self, key_id: &str) -> bool {
        match self.keys.get_mut(key_id) {
            Some(mut record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    pub fn account_for(&self, key_id: &str) -> Option<String> {
        self.keys.get(key_id).filter(|r| !r.revoked).map(|r| r.account_key.clone())
    }
}

impl Default for ApiKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyStore for ApiKeyRegistry {
    fn validate(&self, presented_key: &str) -> Option<ValidatedApiKey> {
        let rest = presented_key.strip_prefix("dk_")?;
        let (key_id, secret) = rest.split_once('.')?;
        let record = self.keys.get(key_id)?;
        if record.revoked {
            return None;
        }
        let candidate_hash = hash_secret(secret);
        if !constant_time_eq(&candidate_hash, &record.secret_hash) {
            return None;
        }
        Some(ValidatedApiKey { key_id: key_id.to_string(), account_key: record.account_key.clone(), daily_limit_micro: record.daily_limit_micro })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_key_validates_and_reports_its_account() {
        let registry = ApiKeyRegistry::new();
        let (key_id, full_key) = registry.issue("acct-1", None);
        let validated = registry.validate(&full_key).unwrap();
        assert_eq!(validated.key_id, key_id);
        assert_eq!(validated.account_key, "acct-1");
    }

    #[test]
    fn tampered_secret_does_not_validate() {
        let registry = ApiKeyRegistry::new();
        let (_key_id, full_key) = registry.issue("acct-1", None);
        let tampered = format!("{full_key}x");
        assert!(registry.validate(&tampered).is_none());
    }

    #[test]
    fn revoked_key_stops_validating() {
        let registry = ApiKeyRegistry::new();
        let (key_id, full_key) = registry.issue("acct-1", None);
        assert!(registry.revoke(&key_id));
        assert!(registry.validate(&full_key).is_none());
    }

    #[test]
    fn unknown_key_id_does_not_validate() {
        let registry = ApiKeyRegistry::new();
        assert!(registry.validate("dk_nonexistent.c2VjcmV0").is_none());
    }
}
