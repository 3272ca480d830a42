//! Clock/ID minting, HMAC signing and atomic KV primitives for the
//! paid-inference gateway.
//!
//! # Modules
//!
//! - [`clock`] — monotonic time, ULID/UUID minting, fencing-token bounds (C1)
//! - [`hmac`] — raw-body and canonical-field HMAC signing/verification (C2)
//! - [`security`] — constant-time comparison helpers
//! - [`kv`] — the [`kv::AtomicKv`] trait and its in-memory/SQLite backends (C3)
//! - [`error`] — shared error types

pub mod clock;
pub mod error;
pub mod hmac;
pub mod kv;
pub mod security;

pub use clock::{new_entry_id, new_nonce, unix_now, unix_now_millis, validate_fence_token, MAX_FENCE_TOKEN};
pub use error::{FencingError, KvError};
pub use kv::{AtomicKv, InMemoryKv, KvStatus, SqliteKv};
pub use security::constant_time_eq;
