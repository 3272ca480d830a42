//! Settlement oracle client contract consulted by the receipt verifier.
//!
//! The concrete implementation (an HTTP client against the facilitator
//! service, or an embedded in-process facilitator) lives outside this
//! crate; [`gateway-payments`] only depends on this trait.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct SettlementQuery {
    pub tx_hash: String,
    pub expected_token: String,
    pub expected_chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub settled_amount_micro: u64,
    pub token: String,
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled(SettlementRecord),
    NotFound,
    Mismatch,
}

#[async_trait]
pub trait SettlementOracle: Send + Sync {
    async fn check(&self, query: &SettlementQuery) -> SettlementOutcome;
}
