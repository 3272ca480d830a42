//! Credit notes for overpayment (C10 tail, §4.9).
//!
//! Both scripts below are single atomic critical sections (mirroring the
//! donor's Lua-script-shaped KV recipes): issuing checks the cap before
//! writing, and no orphaned note is stored if the cap is exceeded.

use std::sync::Mutex;

use dashmap::DashMap;
use gateway_core::clock::{new_entry_id, unix_now};

pub const MAX_SAFE_INTEGER: i64 = (1i64 << 53) - 1;
pub const CREDIT_NOTE_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued { note_id: String, new_balance: i64 },
    CapExceeded,
    InvalidDelta,
}

#[derive(Debug, Clone)]
struct NoteRecord {
    payer: String,
    amount_micro: i64,
    issued_at: u64,
    expires_at: u64,
}

/// Per-payer credit balance with an issuance cap, guarded by a single
/// mutex so the check-then-write is atomic within one process.
pub struct CreditNoteBook {
    balances: Mutex<DashMap<String, i64>>,
    notes: DashMap<String, NoteRecord>,
    cap_micro: i64,
}

impl CreditNoteBook {
    pub fn new(cap_micro: i64) -> Self {
        Self { balances: Mutex::new(DashMap::new()), notes: DashMap::new(), cap_micro }
    }

    /// Issue `delta` micro-USD of credit to `payer`. Rejects non-positive or
    /// out-of-safe-integer-range deltas before touching the balance.
    pub fn issue(&self, payer: &str, delta_micro: i64) -> IssueOutcome {
        if delta_micro <= 0 || delta_micro > MAX_SAFE_INTEGER {
            return IssueOutcome::InvalidDelta;
        }

        let balances = self.balances.lock().unwrap();
        let current = balances.get(payer).map(|v| *v).unwrap_or(0);
        if current + delta_micro > self.cap_micro {
            return IssueOutcome::CapExceeded;
        }
        let new_balance = current + delta_micro;
        balances.insert(payer.to_string(), new_balance);
        drop(balances);

        let note_id = new_entry_id();
        let now = unix_now();
        self.notes.insert(
            note_id.clone(),
            NoteRecord { payer: payer.to_string(), amount_micro: delta_micro, issued_at: now, expires_at: now + CREDIT_NOTE_TTL_SECS },
        );
        IssueOutcome::Issued { note_id, new_balance }
    }

    pub fn balance(&self, payer: &str) -> i64 {
        self.balances.lock().unwrap().get(payer).map(|v| *v).unwrap_or(0)
    }

    /// `apply_credit(payer, required)`. Atomic: computes
    /// `credit_used = min(balance, required)`, deducts it, returns
    /// `(credit_used, remaining_required)`.
    pub fn apply_credit(&self, payer: &str, required_micro: i64) -> (i64, i64) {
        let balances = self.balances.lock().unwrap();
        let current = balances.get(payer).map(|v| *v).unwrap_or(0);
        let credit_used = current.min(required_micro);
        let new_balance = current - credit_used;
        balances.insert(payer.to_string(), new_balance);
        (credit_used, required_micro - credit_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuing_within_cap_stores_a_note_and_updates_balance() {
        let book = CreditNoteBook::new(1000);
        let outcome = book.issue("wallet-a", 400);
        assert!(matches!(outcome, IssueOutcome::Issued { new_balance: 400, .. }));
        assert_eq!(book.balance("wallet-a"), 400);
    }

    #[test]
    fn exceeding_cap_leaves_no_orphaned_note() {
        let book = CreditNoteBook::new(500);
        assert!(matches!(book.issue("wallet-b", 400), IssueOutcome::Issued { .. }));
        let outcome = book.issue("wallet-b", 200);
        assert_eq!(outcome, IssueOutcome::CapExceeded);
        assert_eq!(book.balance("wallet-b"), 400);
        assert_eq!(book.notes.len(), 1);
    }

    #[test]
    fn non_positive_or_unsafe_delta_is_rejected_before_any_write() {
        let book = CreditNoteBook::new(1000);
        assert_eq!(book.issue("wallet-c", 0), IssueOutcome::InvalidDelta);
        assert_eq!(book.issue("wallet-c", -5), IssueOutcome::InvalidDelta);
        assert_eq!(book.issue("wallet-c", MAX_SAFE_INTEGER + 1), IssueOutcome::InvalidDelta);
        assert_eq!(book.balance("wallet-c"), 0);
    }

    #[test]
    fn apply_credit_caps_usage_at_available_balance() {
        let book = CreditNoteBook::new(1000);
        book.issue("wallet-d", 300);
        let (used, remaining) = book.apply_credit("wallet-d", 500);
        assert_eq!(used, 300);
        assert_eq!(remaining, 200);
        assert_eq!(book.balance("wallet-d"), 0);
    }
}
