//! Error types shared by the clock, HMAC and atomic-KV primitives.

use thiserror::Error;

/// Errors returned by [`crate::kv`] atomic recipes.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend unreachable: {0}")]
    Unreachable(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Errors returned while minting or validating fencing tokens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FencingError {
    #[error("fencing token must be a non-negative safe integer")]
    InvalidInput,
    #[error("fencing token {0} exceeds the maximum safe bound")]
    OutOfBound(u64),
}
