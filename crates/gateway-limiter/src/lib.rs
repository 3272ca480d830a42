//! Rate limiting (C4) and circuit breaking (C5) for the paid-inference
//! gateway's failure envelope.
//!
//! # Modules
//!
//! - [`admission`] — per-identity daily admission check and cost-ceiling
//!   reservation ([`admission::AdmissionLimiter`])
//! - [`provider_window`] — per-provider RPM/TPM sliding-window limiter
//! - [`circuit_breaker`] — the 3-state [`circuit_breaker::CircuitBreaker`]

pub mod admission;
pub mod circuit_breaker;
pub mod provider_window;

pub use admission::{
    AdmissionDecision, AdmissionLimiter, CostCeilingLimiter, CostReservation, Identity,
    ReservationOutcome,
};
pub use circuit_breaker::{CircuitBreaker, CircuitState, ProbeOutcome};
pub use provider_window::ProviderWindowLimiter;
