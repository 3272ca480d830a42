//! Metrics and hash-chained audit trail (C14 / §4.12).

pub mod chain;
pub mod metrics;

pub use chain::{verify_chain, AuditRecord, AuditTrail, Phase, VerifyResult, GENESIS_HASH};
pub use metrics::metrics_output;
