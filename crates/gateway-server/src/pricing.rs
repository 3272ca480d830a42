//! Static pricing table keyed by `(token_id, model)` (§4.10 B3/B5 cost lookup).

use dashmap::DashMap;
use gateway_payments::{PriceEntry, PricingTable};

pub struct StaticPricingTable {
    entries: DashMap<(String, String), PriceEntry>,
    default_micro_per_max_token: u64,
}

impl StaticPricingTable {
    pub fn new(default_micro_per_max_token: u64) -> Self {
        Self { entries: DashMap::new(), default_micro_per_max_token }
    }

    pub fn set_price(&self, token_id: &str, model: &str, micro_per_max_token: u64) {
        self.entries.insert((token_id.to_string(), model.to_string()), PriceEntry { micro_per_max_token });
    }
}

impl PricingTable for StaticPricingTable {
    fn price_for(&self, token_id: &str, model: &str) -> Option<PriceEntry> {
        if let Some(entry) = self.entries.get(&(token_id.to_string(), model.to_string())) {
            return Some(*entry);
        }
        if self.default_micro_per_max_token == 0 {
            return None;
        }
        Some(PriceEntry { micro_per_max_token: self.default_micro_per_max_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_price_overrides_default() {
        let table = StaticPricingTable::new(1);
        table.set_price("tok-1", "gpt-5", 50);
        assert_eq!(table.price_for("tok-1", "gpt-5").unwrap().micro_per_max_token, 50);
        assert_eq!(table.price_for("tok-1", "other").unwrap().micro_per_max_token, 1);
    }

    #[test]
    fn zero_default_means_unpriced_model_is_rejected() {
        let table = StaticPricingTable::new(0);
        assert!(table.price_for("tok-1", "unknown").is_none());
    }
}
