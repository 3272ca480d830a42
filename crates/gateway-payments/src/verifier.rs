//! Receipt verifier (C10, second half of §4.8).

use std::sync::Arc;

use gateway_core::clock::unix_now;
use gateway_core::hmac::verify_fields;
use gateway_core::kv::{AtomicKv, KvStatus};
use serde::{Deserialize, Serialize};

use crate::challenge::{BindingInput, Challenge, ChallengeIssuer};
use crate::credit_note::CreditNoteBook;
use crate::oracle::{SettlementOracle, SettlementOutcome, SettlementQuery};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedReceipt {
    pub nonce: String,
    pub tx_hash: String,
    pub settled_amount_micro: u64,
    pub credit_note_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    ChallengeUnknown,
    ChallengeTampered,
    ChallengeExpired,
    BindingInvalid,
    NonceReplayed,
    SettlementInsufficient,
}

impl VerificationFailure {
    /// HTTP status this failure surfaces as (§4.10 semantic invariants).
    pub fn status_code(&self) -> u16 {
        match self {
            VerificationFailure::BindingInvalid => 400,
            VerificationFailure::NonceReplayed => 409,
            _ => 402,
        }
    }

    /// Only these two classes are escalated as fraud signals (§4.8 tail).
    pub fn is_fraud_signal(&self) -> bool {
        matches!(self, VerificationFailure::NonceReplayed | VerificationFailure::BindingInvalid)
    }
}

pub struct PresentedReceipt {
    pub tx_hash: String,
    pub nonce: String,
    pub binding: BindingInput,
}

pub struct ReceiptVerifier {
    issuer: Arc<ChallengeIssuer>,
    oracle: Arc<dyn SettlementOracle>,
    kv: Arc<dyn AtomicKv>,
    credit_notes: Arc<CreditNoteBook>,
    hmac_secret: Vec<u8>,
    hmac_secret_prev: Option<Vec<u8>>,
    expected_token: String,
    expected_chain: String,
}

impl ReceiptVerifier {
    pub fn new(
        issuer: Arc<ChallengeIssuer>,
        oracle: Arc<dyn SettlementOracle>,
        kv: Arc<dyn AtomicKv>,
        credit_notes: Arc<CreditNoteBook>,
        hmac_secret: Vec<u8>,
        hmac_secret_prev: Option<Vec<u8>>,
        expected_token: String,
        expected_chain: String,
    ) -> Self {
        Self { issuer, oracle, kv, credit_notes, hmac_secret, hmac_secret_prev, expected_token, expected_chain }
    }

    pub async fn verify(&self, presented: &PresentedReceipt, payer_wallet: &str) -> Result<VerifiedReceipt, VerificationFailure> {
        // 1. Load challenge by nonce.
        let challenge = self.issuer.load(&presented.nonce).ok_or(VerificationFailure::ChallengeUnknown)?;

        // 2. verify_hmac, current then previous secret.
        if !self.challenge_signature_valid(&challenge) {
            return Err(VerificationFailure::ChallengeTampered);
        }

        // 3. Expiry.
        if challenge.expires_at < unix_now() {
            return Err(VerificationFailure::ChallengeExpired);
        }

        // 4. Recompute request binding and compare byte-equal.
        if presented.binding.request_binding() != challenge.request_binding {
            return Err(VerificationFailure::BindingInvalid);
        }

        // 5. Atomic SETNX on nonce_consumed with the challenge's TTL.
        let consumed_key = format!("nonce_consumed:{}", presented.nonce);
        match self.kv.conditional_set(&consumed_key, None, "1") {
            Ok(KvStatus::Ok) => {}
            Ok(KvStatus::Stale) => return Err(VerificationFailure::NonceReplayed),
            _ => return Err(VerificationFailure::NonceReplayed),
        }

        // 6. Apply any standing credit balance against the required amount
        // (S2) before asking the oracle to cover the rest.
        let (credit_used, required_after_credit) = self.credit_notes.apply_credit(payer_wallet, challenge.amount_micro as i64);
        let required_after_credit = required_after_credit.max(0) as u64;

        // 7. Consult settlement oracle.
        let query = SettlementQuery {
            tx_hash: presented.tx_hash.clone(),
            expected_token: self.expected_token.clone(),
            expected_chain: self.expected_chain.clone(),
        };
        let settled = match self.oracle.check(&query).await {
            SettlementOutcome::Settled(record)
                if record.settled_amount_micro >= required_after_credit
                    && record.token == self.expected_token
                    && record.chain == self.expected_chain =>
            {
                record
            }
            _ => {
                // Roll back the credit applied above; it bought nothing.
                if credit_used > 0 {
                    let _ = self.credit_notes.issue(payer_wallet, credit_used);
                }
                return Err(VerificationFailure::SettlementInsufficient);
            }
        };

        // 8. Credit note on overpayment against what was actually required on-chain.
        let credit_note_id = if settled.settled_amount_micro > required_after_credit {
            let delta = (settled.settled_amount_micro - required_after_credit) as i64;
            match self.credit_notes.issue(payer_wallet, delta) {
                crate::credit_note::IssueOutcome::Issued { note_id, .. } => Some(note_id),
                _ => None,
            }
        } else {
            None
        };

        // 9. Return verified receipt.
        Ok(VerifiedReceipt {
            nonce: presented.nonce.clone(),
            tx_hash: presented.tx_hash.clone(),
            settled_amount_micro: settled.settled_amount_micro,
            credit_note_id,
        })
    }

    fn challenge_signature_valid(&self, challenge: &Challenge) -> bool {
        let amount_str = challenge.amount_micro.to_string();
        let expires_str = challenge.expires_at.to_string();
        let fields = [
            ("amount", amount_str.as_str()),
            ("chain_id", challenge.chain_id.as_str()),
            ("expiry", expires_str.as_str()),
            ("nonce", challenge.nonce.as_str()),
            ("recipient", challenge.recipient.as_str()),
            ("request_binding", challenge.request_binding.as_str()),
            ("request_method", challenge.request_method.as_str()),
            ("request_path", challenge.request_path.as_str()),
            ("token", challenge.token.as_str()),
        ];
        verify_fields(fields, &self.hmac_secret, self.hmac_secret_prev.as_deref(), &challenge.hmac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SettlementRecord;
    use async_trait::async_trait;
    use gateway_core::kv::InMemoryKv;

    struct FakeOracle {
        outcome: SettlementOutcome,
    }

    #[async_trait]
    impl SettlementOracle for FakeOracle {
        async fn check(&self, _query: &SettlementQuery) -> SettlementOutcome {
            self.outcome.clone()
        }
    }

    fn binding() -> BindingInput {
        BindingInput {
            path: "/agent/chat".into(),
            method: "POST".into(),
            token_id: "tok-1".into(),
            model: "gpt-5".into(),
            max_tokens: 512,
        }
    }

    fn make_verifier(oracle: Arc<dyn SettlementOracle>) -> (Arc<ChallengeIssuer>, ReceiptVerifier) {
        let issuer = ChallengeIssuer::new(b"secret".to_vec(), "0xrecipient".into(), "tempo-mainnet".into(), "USDC".into());
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let credit_notes = Arc::new(CreditNoteBook::new(1_000_000));
        let verifier = ReceiptVerifier::new(
            issuer.clone(),
            oracle,
            kv,
            credit_notes,
            b"secret".to_vec(),
            None,
            "USDC".into(),
            "tempo-mainnet".into(),
        );
        (issuer, verifier)
    }

    #[tokio::test]
    async fn exact_settlement_verifies_without_credit_note() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 1000, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        let challenge = issuer.issue(&binding(), 1000);

        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: binding() };
        let receipt = verifier.verify(&presented, "wallet-1").await.unwrap();
        assert_eq!(receipt.settled_amount_micro, 1000);
        assert!(receipt.credit_note_id.is_none());
    }

    #[tokio::test]
    async fn overpayment_issues_a_credit_note_for_the_delta() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 1500, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        let challenge = issuer.issue(&binding(), 1000);

        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: binding() };
        let receipt = verifier.verify(&presented, "wallet-2").await.unwrap();
        assert!(receipt.credit_note_id.is_some());
    }

    #[tokio::test]
    async fn replaying_the_same_nonce_is_rejected_with_409() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 1000, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        let challenge = issuer.issue(&binding(), 1000);
        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: binding() };

        verifier.verify(&presented, "wallet-3").await.unwrap();
        let second = verifier.verify(&presented, "wallet-3").await.unwrap_err();
        assert_eq!(second, VerificationFailure::NonceReplayed);
        assert_eq!(second.status_code(), 409);
    }

    #[tokio::test]
    async fn mismatched_binding_fields_return_400() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 1000, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        let challenge = issuer.issue(&binding(), 1000);
        let mut tampered_binding = binding();
        tampered_binding.model = "different-model".into();

        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: tampered_binding };
        let failure = verifier.verify(&presented, "wallet-4").await.unwrap_err();
        assert_eq!(failure, VerificationFailure::BindingInvalid);
        assert_eq!(failure.status_code(), 400);
        assert!(failure.is_fraud_signal());
    }

    #[tokio::test]
    async fn insufficient_settlement_amount_is_rejected() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 500, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        let challenge = issuer.issue(&binding(), 1000);
        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: binding() };
        assert_eq!(
            verifier.verify(&presented, "wallet-5").await.unwrap_err(),
            VerificationFailure::SettlementInsufficient
        );
    }

    #[tokio::test]
    async fn standing_credit_reduces_the_required_settlement_amount() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 300, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        verifier.credit_notes.issue("wallet-7", 500);
        let challenge = issuer.issue(&binding(), 800);

        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: binding() };
        let receipt = verifier.verify(&presented, "wallet-7").await.unwrap();
        assert_eq!(receipt.settled_amount_micro, 300);
        assert_eq!(verifier.credit_notes.balance("wallet-7"), 0);
    }

    #[tokio::test]
    async fn credit_is_refunded_when_settlement_still_falls_short() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle {
            outcome: SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 100, token: "USDC".into(), chain: "tempo-mainnet".into() }),
        });
        let (issuer, verifier) = make_verifier(oracle);
        verifier.credit_notes.issue("wallet-8", 500);
        let challenge = issuer.issue(&binding(), 800);

        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: challenge.nonce.clone(), binding: binding() };
        let failure = verifier.verify(&presented, "wallet-8").await.unwrap_err();
        assert_eq!(failure, VerificationFailure::SettlementInsufficient);
        assert_eq!(verifier.credit_notes.balance("wallet-8"), 500);
    }

    #[tokio::test]
    async fn unknown_nonce_is_rejected() {
        let oracle: Arc<dyn SettlementOracle> = Arc::new(FakeOracle { outcome: SettlementOutcome::NotFound });
        let (_issuer, verifier) = make_verifier(oracle);
        let presented = PresentedReceipt { tx_hash: "0xabc".into(), nonce: "nonexistent".into(), binding: binding() };
        assert_eq!(verifier.verify(&presented, "wallet-6").await.unwrap_err(), VerificationFailure::ChallengeUnknown);
    }
}
