//! Double-entry ledger, WAL writer lock, reconciliation and billing-event
//! log for the paid-inference gateway.
//!
//! # Modules
//!
//! - [`wal_lock`] — single-writer election with fencing tokens (C6)
//! - [`ledger`] — the [`ledger::Ledger`] itself: reserve/finalize/rollback,
//!   conservation checkpoint (C7)
//! - [`micro_usd`] — integer MicroUSD arithmetic with banker's rounding
//! - [`reconciliation`] — periodic rederivation against a cache (C8)
//! - [`billing`] — append-only billing events, idempotent on request id (C12)

pub mod billing;
pub mod ledger;
pub mod micro_usd;
pub mod reconciliation;
pub mod wal_lock;

pub use billing::{BillingEvent, BillingLog};
pub use ledger::{
    Account, FinalizeOutcome, JournalEntry, Ledger, LedgerError, Posting, ReservationReceipt,
    ReserveOutcome, DEFAULT_RESERVATION_TTL_SECS,
};
pub use micro_usd::{micro_to_usd, usd_to_micro, MicroUsdError};
pub use reconciliation::{reconcile, BalanceCache, Divergence, ReconciliationSummary};
pub use wal_lock::{FenceCheck, WalWriterLock};
