//! HTTP surface (§6) and process wiring for the paid-inference gateway.
//!
//! Wires together `gateway-core`, `gateway-limiter`, `gateway-ledger`,
//! `gateway-payments`, `gateway-facilitator`, `gateway-audit` and
//! `gateway-recovery` behind an `actix-web` server.
//!
//! # Modules
//!
//! - [`config`] — [`config::GatewayConfig`], loaded once at boot
//! - [`state`] — shared [`state::AppState`] and its builder
//! - [`auth`] — wallet-nonce session auth (`/auth/nonce`, `/auth/verify`)
//! - [`keys`] — API key registry backing `/keys` CRUD and the B3 key path
//! - [`pricing`] — static `(token_id, model)` pricing table
//! - [`provider`] — the upstream chat-completion abstraction gated by the
//!   circuit breaker
//! - [`error`] — §7 error taxonomy as a `ResponseError` impl
//! - [`routes`] — HTTP handlers
//! - [`metrics`] — Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod pricing;
pub mod provider;
pub mod routes;
pub mod state;

pub use error::GatewayError;
pub use state::{build_state, AppState};
