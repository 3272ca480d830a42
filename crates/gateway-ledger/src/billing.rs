//! Append-only billing events recorder (C12 / §2).

use dashmap::DashMap;
use gateway_core::clock::unix_now;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub request_id: String,
    pub method: String,
    pub amount_micro: Option<u64>,
    pub timestamp: u64,
}

/// Append-only log, unique on `request_id` — a retried billing emission for
/// the same request never double-counts.
#[derive(Default)]
pub struct BillingLog {
    events: DashMap<String, BillingEvent>,
}

impl BillingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. Returns `false` (and does not overwrite) if an
    /// event for this `request_id` already exists — this path is
    /// best-effort and must never block or re-raise (§5).
    pub fn record(&self, request_id: &str, method: &str, amount_micro: Option<u64>) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.events.entry(request_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(BillingEvent {
                    request_id: request_id.to_string(),
                    method: method.to_string(),
                    amount_micro,
                    timestamp: unix_now(),
                });
                true
            }
        }
    }

    pub fn get(&self, request_id: &str) -> Option<BillingEvent> {
        self.events.get(request_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_request_id_does_not_double_record() {
        let log = BillingLog::new();
        assert!(log.record("req-1", "key", Some(1000)));
        assert!(!log.record("req-1", "key", Some(9999)));
        assert_eq!(log.get("req-1").unwrap().amount_micro, Some(1000));
        assert_eq!(log.len(), 1);
    }
}
