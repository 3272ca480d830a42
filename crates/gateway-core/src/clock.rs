//! Monotonic time, ULID/UUID minting, and fencing-token bookkeeping (C1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ulid::Ulid;
use uuid::Uuid;

use crate::error::FencingError;

/// Fencing tokens are bounded to 2^53 - 1 (JS-safe-integer parity with the
/// donor system's KV scripts, which compare tokens as numbers).
pub const MAX_FENCE_TOKEN: u64 = (1u64 << 53) - 1;

/// Current wall-clock time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Current wall-clock time as Unix milliseconds, used for ULID generation
/// and sliding-window scoring.
pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Mint a fresh, monotonic-within-process 26-char lexicographically sortable
/// ULID for a JournalEntry id.
///
/// `Ulid::new()` seeds its random component per call; strict cross-call
/// monotonicity for entries minted in the same millisecond is the journal
/// writer's job (it holds the WAL single-writer lock, so entries it mints
/// are serialized and it can fall back to [`Ulid::from_parts`] with an
/// incrementing random component if two entries land in the same tick).
pub fn new_entry_id() -> String {
    Ulid::new().to_string()
}

/// Mint a fresh v4 UUID, used for challenge/payment nonces.
pub fn new_nonce() -> Uuid {
    Uuid::new_v4()
}

/// Validate a candidate fencing token before it is sent to the CAS recipe.
/// Input validation happens *before* the token reaches the KV store, per
/// §4.5: non-negative and within the safe-integer bound.
pub fn validate_fence_token(candidate: u64) -> Result<u64, FencingError> {
    if candidate > MAX_FENCE_TOKEN {
        return Err(FencingError::OutOfBound(candidate));
    }
    Ok(candidate)
}

/// A process-local monotonic counter used only as the in-memory fallback
/// when no KV-backed fence store is configured (tests, single-process dev).
#[derive(Debug, Default)]
pub struct LocalFenceCounter(AtomicU64);

impl LocalFenceCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Atomically mint the next token, failing if the bound would be exceeded.
    pub fn next(&self) -> Result<u64, FencingError> {
        let token = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        validate_fence_token(token)
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_are_lexicographically_sortable_and_unique() {
        let a = new_entry_id();
        let b = new_entry_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn fence_token_bound_is_enforced() {
        assert!(validate_fence_token(MAX_FENCE_TOKEN).is_ok());
        assert_eq!(
            validate_fence_token(MAX_FENCE_TOKEN + 1),
            Err(FencingError::OutOfBound(MAX_FENCE_TOKEN + 1))
        );
    }

    #[test]
    fn local_fence_counter_is_strictly_monotonic() {
        let counter = LocalFenceCounter::new();
        let a = counter.next().unwrap();
        let b = counter.next().unwrap();
        assert!(b > a);
    }
}
