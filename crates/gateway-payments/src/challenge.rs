//! Challenge issuer (C9, first half of §4.8).

use std::sync::Arc;

use dashmap::DashMap;
use gateway_core::clock::{new_nonce, unix_now};
use gateway_core::hmac::sign_fields;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CHALLENGE_TTL_SECS: u64 = 300;

/// The request-bound fields a challenge commits to. Recomputed by the
/// verifier from the caller-supplied fields and compared byte-equal
/// against the stored binding.
#[derive(Debug, Clone)]
pub struct BindingInput {
    pub path: String,
    pub method: String,
    pub token_id: String,
    pub model: String,
    pub max_tokens: u64,
}

impl BindingInput {
    /// `SHA-256(lowercased, pipe-joined tuple)`.
    pub fn request_binding(&self) -> String {
        let joined = format!(
            "{}|{}|{}|{}|{}",
            self.path.to_lowercase(),
            self.method.to_lowercase(),
            self.token_id.to_lowercase(),
            self.model.to_lowercase(),
            self.max_tokens
        );
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub nonce: String,
    pub request_binding: String,
    pub amount_micro: u64,
    pub recipient: String,
    pub chain_id: String,
    pub token: String,
    pub request_path: String,
    pub request_method: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub hmac: String,
}

/// Envelope returned inside a 402 response body (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeEnvelope {
    pub nonce: String,
    pub amount_micro: u64,
    pub recipient: String,
    pub chain_id: String,
    pub token: String,
    pub request_path: String,
    pub request_method: String,
    pub expires_at: u64,
    pub hmac: String,
}

impl From<&Challenge> for ChallengeEnvelope {
    fn from(c: &Challenge) -> Self {
        Self {
            nonce: c.nonce.clone(),
            amount_micro: c.amount_micro,
            recipient: c.recipient.clone(),
            chain_id: c.chain_id.clone(),
            token: c.token.clone(),
            request_path: c.request_path.clone(),
            request_method: c.request_method.clone(),
            expires_at: c.expires_at,
            hmac: c.hmac.clone(),
        }
    }
}

/// Issues and stores challenges by nonce. Challenges are signed with the
/// HMAC secret active at issuance time; rotation is handled by the
/// verifier trying current-then-previous. `recipient`/`chain_id`/`token`
/// are fixed at construction — one gateway settles to one address on one
/// chain in one token.
pub struct ChallengeIssuer {
    secret: Vec<u8>,
    recipient: String,
    chain_id: String,
    token: String,
    store: DashMap<String, Challenge>,
}

impl ChallengeIssuer {
    pub fn new(secret: Vec<u8>, recipient: String, chain_id: String, token: String) -> Arc<Self> {
        Arc::new(Self { secret, recipient, chain_id, token, store: DashMap::new() })
    }

    pub fn issue(&self, binding: &BindingInput, amount_micro: u64) -> Challenge {
        let nonce = new_nonce();
        let request_binding = binding.request_binding();
        let created_at = unix_now();
        let expires_at = created_at + CHALLENGE_TTL_SECS;

        let amount_str = amount_micro.to_string();
        let expires_str = expires_at.to_string();
        let fields = [
            ("amount", amount_str.as_str()),
            ("chain_id", self.chain_id.as_str()),
            ("expiry", expires_str.as_str()),
            ("nonce", nonce.as_str()),
            ("recipient", self.recipient.as_str()),
            ("request_binding", request_binding.as_str()),
            ("request_method", binding.method.as_str()),
            ("request_path", binding.path.as_str()),
            ("token", self.token.as_str()),
        ];
        let hmac = sign_fields(fields, &self.secret);

        let challenge = Challenge {
            nonce: nonce.clone(),
            request_binding,
            amount_micro,
            recipient: self.recipient.clone(),
            chain_id: self.chain_id.clone(),
            token: self.token.clone(),
            request_path: binding.path.clone(),
            request_method: binding.method.clone(),
            created_at,
            expires_at,
            hmac,
        };
        self.store.insert(nonce, challenge.clone());
        challenge
    }

    pub fn load(&self, nonce: &str) -> Option<Challenge> {
        self.store.get(nonce).map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> BindingInput {
        BindingInput {
            path: "/agent/chat".into(),
            method: "POST".into(),
            token_id: "tok-1".into(),
            model: "gpt-5".into(),
            max_tokens: 512,
        }
    }

    #[test]
    fn issued_challenge_is_retrievable_by_nonce() {
        let issuer = ChallengeIssuer::new(b"secret".to_vec(), "0xrecipient".into(), "tempo-mainnet".into(), "USDC".into());
        let challenge = issuer.issue(&binding(), 1000);
        let loaded = issuer.load(&challenge.nonce).unwrap();
        assert_eq!(loaded.nonce, challenge.nonce);
        assert_eq!(loaded.amount_micro, 1000);
    }

    #[test]
    fn request_binding_is_case_insensitive_and_deterministic() {
        let mut b = binding();
        let lower = b.request_binding();
        b.method = "post".into();
        b.path = "/AGENT/chat".into();
        assert_eq!(b.request_binding(), lower);
    }

    #[test]
    fn different_binding_fields_produce_different_bindings() {
        let b1 = binding();
        let mut b2 = binding();
        b2.max_tokens = 1024;
        assert_ne!(b1.request_binding(), b2.request_binding());
    }
}
