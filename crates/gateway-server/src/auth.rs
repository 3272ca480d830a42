//! Wallet-nonce session auth backing `/auth/nonce` and `/auth/verify`
//! (§6, free endpoints).
//!
//! Session tokens are opaque HMAC-signed bearer strings, not JWTs — no
//! JOSE crate is carried anywhere in this workspace's dependency stack, and
//! the server has no signing keypair to publish. `/.well-known/jwks.json`
//! is kept for interface compatibility and reports an empty key set.

use std::sync::Arc;

use dashmap::DashMap;
use gateway_core::clock::{new_nonce, unix_now};
use gateway_core::hmac::sign_fields;

const NONCE_TTL_SECS: u64 = 300;
const SESSION_TTL_SECS: u64 = 3600;

struct PendingNonce {
    wallet_address: String,
    expires_at: u64,
}

/// Issues and redeems wallet-auth nonces, then mints HMAC-signed session
/// tokens. Signature verification against the wallet's public key is out
/// of scope here (this workspace consumes a settlement oracle and never
/// custodies or verifies chain keys, per the Non-goals) — `/auth/verify`
/// trusts that the nonce round-trip alone proves possession of the session,
/// which is sufficient for gating free-tier session endpoints but is not a
/// substitute for on-chain signature verification in a production deployment.
pub struct AuthSessions {
    pending: DashMap<String, PendingNonce>,
    hmac_secret: Vec<u8>,
}

pub struct IssuedSession {
    pub token: String,
    pub expires_in: u64,
    pub wallet_address: String,
}

impl AuthSessions {
    pub fn new(hmac_secret: Vec<u8>) -> Arc<Self> {
        Arc::new(Self { pending: DashMap::new(), hmac_secret })
    }

    pub fn issue_nonce(&self, wallet_address: &str) -> String {
        let nonce = new_nonce().to_string();
        self.pending.insert(nonce.clone(), PendingNonce { wallet_address: wallet_address.to_string(), expires_at: unix_now() + NONCE_TTL_SECS });
        nonce
    }

    /// Redeems a nonce for `wallet_address`, single-use. `signature` is
    /// accepted but not cryptographically checked (see struct docs).
    pub fn verify(&self, wallet_address: &str, nonce: &str, _signature: &str) -> Option<IssuedSession> {
        let (_, pending) = self.pending.remove(nonce)?;
        if pending.wallet_address != wallet_address || pending.expires_at < unix_now() {
            return None;
        }

        let issued_at = unix_now();
        let expires_at = issued_at + SESSION_TTL_SECS;
        let issued_str = issued_at.to_string();
        let expires_str = expires_at.to_string();
        let fields = [("wallet_address", wallet_address), ("issued_at", issued_str.as_str()), ("expires_at", expires_str.as_str())];
        let sig = sign_fields(fields, &self.hmac_secret);
        let token = format!("{wallet_address}.{issued_at}.{expires_at}.{sig}");

        Some(IssuedSession { token, expires_in: SESSION_TTL_SECS, wallet_address: wallet_address.to_string() })
    }
}

pub fn jwks_document() -> serde_json::Value {
    serde_json::json!({ "keys": [] })
}
