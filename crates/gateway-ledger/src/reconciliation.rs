//! Periodic reconciliation against a cache (C8 / §4.7).

use std::collections::HashMap;

use dashmap::DashMap;
use gateway_core::clock::unix_now;

use crate::ledger::{Ledger, Posting};

/// Advisory balance cache kept in sync by reconciliation; the journal
/// remains authoritative.
#[derive(Default)]
pub struct BalanceCache {
    values: DashMap<String, i64>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, account_posting_key: &str, value: i64) {
        self.values.insert(account_posting_key.to_string(), value);
    }

    pub fn get(&self, account_posting_key: &str) -> i64 {
        self.values.get(account_posting_key).map(|v| *v).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Divergence {
    pub key: String,
    pub cached: i64,
    pub derived: i64,
}

#[derive(Debug, Clone)]
pub struct ReconciliationSummary {
    pub ran_at: u64,
    pub divergences: Vec<Divergence>,
    pub rounding_drift_micro: i64,
    pub rounding_threshold_exceeded: bool,
}

/// Rederives per-posting-key balances from the journal by summing deltas,
/// compares against `cache`, corrects divergence, and reports rounding
/// drift against `rounding_threshold_micro` (default 1000 per §4.6).
pub fn reconcile(ledger: &Ledger, cache: &BalanceCache, rounding_threshold_micro: i64) -> ReconciliationSummary {
    let mut derived: HashMap<String, i64> = HashMap::new();
    let mut rounding_drift: i64 = 0;

    for entry in ledger.journal_snapshot() {
        for Posting { account, delta } in &entry.postings {
            *derived.entry(account.clone()).or_insert(0) += delta;
        }
        if entry.event_type == "rounding" {
            rounding_drift += entry.postings.iter().map(|p| p.delta).sum::<i64>();
        }
    }

    let mut divergences = Vec::new();
    for (key, derived_value) in &derived {
        let cached_value = cache.get(key);
        if cached_value != *derived_value {
            divergences.push(Divergence {
                key: key.clone(),
                cached: cached_value,
                derived: *derived_value,
            });
            cache.set(key, *derived_value);
            tracing::warn!(key, cached = cached_value, derived = *derived_value, "reconciliation divergence corrected");
        }
    }

    let rounding_threshold_exceeded = rounding_drift.unsigned_abs() as i64 > rounding_threshold_micro;
    if rounding_threshold_exceeded {
        tracing::error!(drift = rounding_drift, threshold = rounding_threshold_micro, "rounding drift exceeds alert threshold");
    }

    let ran_at = unix_now();

    // Record the run in the journal itself, even when nothing diverged —
    // each correction is paired with its own negation against a synthetic
    // offset account so the entry stays zero-sum.
    let mut summary_postings = Vec::with_capacity(divergences.len() * 2);
    for divergence in &divergences {
        let delta = divergence.derived - divergence.cached;
        summary_postings.push(Posting { account: format!("reconciliation:{}", divergence.key), delta });
        summary_postings.push(Posting { account: "reconciliation:offset".to_string(), delta: -delta });
    }
    ledger.append_journal("reconciliation_summary", &format!("reconcile-{ran_at}"), summary_postings);

    ReconciliationSummary {
        ran_at,
        divergences,
        rounding_drift_micro: rounding_drift,
        rounding_threshold_exceeded,
    }
}
