//! Settlement-oracle client, webhook notifier, and embedded settlement
//! registry — the external collaborator named in §1.
//!
//! # Modules
//!
//! - [`http_oracle`] — [`http_oracle::FacilitatorHttpOracle`], a
//!   [`gateway_payments::SettlementOracle`] backed by an upstream HTTP
//!   facilitator service
//! - [`embedded_oracle`] — an in-process settlement registry for the
//!   embedded bootstrap mode
//! - [`webhook`] — SSRF-hardened webhook notifications on settlement
//! - [`state`] — shared [`state::AppState`]
//! - [`routes`] — HTTP endpoints (health, metrics, verify, settlements)
//! - [`bootstrap`] — wiring helpers shared by `main.rs` and embedding callers

pub mod bootstrap;
pub mod embedded_oracle;
pub mod http_oracle;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod webhook;

pub use embedded_oracle::EmbeddedRegistryOracle;
pub use http_oracle::FacilitatorHttpOracle;
