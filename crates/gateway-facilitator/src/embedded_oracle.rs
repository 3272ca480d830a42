//! In-process settlement registry (§2.2 "Embedded-vs-HTTP oracle mode").
//!
//! Used when `gateway-server` runs with the facilitator compiled in rather
//! than calling out over HTTP. Settlements are registered by whatever
//! upstream process observes them landing on-chain (outside this crate's
//! scope — this workspace consumes a signed-transaction oracle, it does
//! not implement a chain client) and looked up here by `tx_hash`.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_payments::{SettlementOracle, SettlementOutcome, SettlementQuery, SettlementRecord};

#[derive(Default)]
pub struct EmbeddedRegistryOracle {
    settlements: DashMap<String, SettlementRecord>,
}

impl EmbeddedRegistryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observed settlement. Called by whatever process feeds
    /// this registry (a chain-watcher, a relay, or a test harness).
    pub fn register(&self, tx_hash: &str, record: SettlementRecord) {
        self.settlements.insert(tx_hash.to_string(), record);
    }
}

#[async_trait]
impl SettlementOracle for EmbeddedRegistryOracle {
    async fn check(&self, query: &SettlementQuery) -> SettlementOutcome {
        match self.settlements.get(&query.tx_hash) {
            Some(record) if record.token == query.expected_token && record.chain == query.expected_chain => {
                SettlementOutcome::Settled(record.clone())
            }
            Some(_) => SettlementOutcome::Mismatch,
            None => SettlementOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_settlement_is_found_by_tx_hash() {
        let oracle = EmbeddedRegistryOracle::new();
        oracle.register("0xabc", SettlementRecord { settled_amount_micro: 1000, token: "USDC".into(), chain: "tempo-mainnet".into() });

        let outcome = oracle
            .check(&SettlementQuery { tx_hash: "0xabc".into(), expected_token: "USDC".into(), expected_chain: "tempo-mainnet".into() })
            .await;
        assert_eq!(outcome, SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: 1000, token: "USDC".into(), chain: "tempo-mainnet".into() }));
    }

    #[tokio::test]
    async fn unregistered_tx_hash_is_not_found() {
        let oracle = EmbeddedRegistryOracle::new();
        let outcome = oracle
            .check(&SettlementQuery { tx_hash: "0xmissing".into(), expected_token: "USDC".into(), expected_chain: "tempo-mainnet".into() })
            .await;
        assert_eq!(outcome, SettlementOutcome::NotFound);
    }

    #[tokio::test]
    async fn wrong_token_on_a_known_tx_hash_is_a_mismatch() {
        let oracle = EmbeddedRegistryOracle::new();
        oracle.register("0xabc", SettlementRecord { settled_amount_micro: 1000, token: "USDC".into(), chain: "tempo-mainnet".into() });
        let outcome = oracle
            .check(&SettlementQuery { tx_hash: "0xabc".into(), expected_token: "DIFFERENT".into(), expected_chain: "tempo-mainnet".into() })
            .await;
        assert_eq!(outcome, SettlementOutcome::Mismatch);
    }
}
