//! Single-writer WAL election lock with fencing tokens (C6 / §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gateway_core::clock::{unix_now, validate_fence_token};
use gateway_core::kv::{AtomicKv, KvStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceCheck {
    Ok,
    /// Abort the write; a newer token has already been issued.
    Stale,
    /// Fail closed; the stored token was corrupt.
    Corrupt,
}

pub struct WalWriterLock {
    kv: Arc<dyn AtomicKv>,
    lock_key: String,
    fence_key: String,
    instance_id: String,
    ttl_secs: u64,
    lost_reported: AtomicBool,
}

impl WalWriterLock {
    pub fn new(kv: Arc<dyn AtomicKv>, instance_id: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            kv,
            lock_key: "wal:writer_lock".to_string(),
            fence_key: "wal:fence_token".to_string(),
            instance_id: instance_id.into(),
            ttl_secs,
            lost_reported: AtomicBool::new(false),
        }
    }

    /// Acquire the writer lock. On success, the fencing token is minted by
    /// incrementing the shared fence counter, which is itself validated
    /// through the fence-token CAS recipe so two instances racing to
    /// acquire can never mint the same token.
    pub fn acquire(&self) -> Option<u64> {
        match self.kv.conditional_set(&self.lock_key, None, &self.instance_id) {
            Ok(KvStatus::Ok) => {}
            _ => return None,
        }
        let current = self
            .kv
            .get(&self.fence_key)
            .ok()
            .flatten()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        if validate_fence_token(next).is_err() {
            tracing::error!(token = next, "fencing token at issuance exceeds safe bound, refusing to acquire");
            let _ = self.kv.delete(&self.lock_key);
            return None;
        }
        match self.kv.fence_cas(&self.fence_key, next) {
            Ok(KvStatus::Ok) => {
                self.lost_reported.store(false, Ordering::SeqCst);
                Some(next)
            }
            _ => {
                let _ = self.kv.delete(&self.lock_key);
                None
            }
        }
    }

    /// Keepalive, called every `ttl/3`. Only renews if this instance still
    /// owns the lock; returns `false` on loss. `on_lost` is invoked exactly
    /// once per loss event — a `compare_exchange` on `lost_reported` gates
    /// it, so repeated keepalive calls after the lock is gone don't refire
    /// the callback.
    pub fn keepalive(&self, on_lost: impl FnOnce()) -> bool {
        match self.kv.get(&self.lock_key) {
            Ok(Some(owner)) if owner == self.instance_id => {
                let _ = self
                    .kv
                    .conditional_set(&self.lock_key, Some(&self.instance_id), &self.instance_id);
                true
            }
            _ => {
                if self.lost_reported.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    on_lost();
                }
                false
            }
        }
    }

    pub fn release(&self) {
        let _ = self
            .kv
            .conditional_set(&self.lock_key, Some(&self.instance_id), "");
        let _ = self.kv.delete(&self.lock_key);
    }

    /// Every WAL append must call this before proceeding. Input validation
    /// (non-negative, safe integer) happens in [`validate_fence_token`]
    /// *before* the token reaches the CAS, per §4.5.
    pub fn validate_and_advance(&self, token: u64) -> FenceCheck {
        if validate_fence_token(token).is_err() {
            return FenceCheck::Corrupt;
        }
        match self.kv.fence_cas(&self.fence_key, token) {
            Ok(KvStatus::Ok) => FenceCheck::Ok,
            Ok(KvStatus::Stale) => FenceCheck::Stale,
            Ok(KvStatus::Corrupt) => FenceCheck::Corrupt,
            _ => FenceCheck::Corrupt,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }
}

pub fn now() -> u64 {
    unix_now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::kv::InMemoryKv;

    #[test]
    fn two_takeovers_enforce_fence_monotonicity() {
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let lock_a = WalWriterLock::new(kv.clone(), "node-a", 30);
        let token_a = lock_a.acquire().unwrap();
        lock_a.release();

        let lock_b = WalWriterLock::new(kv.clone(), "node-b", 30);
        let token_b = lock_b.acquire().unwrap();
        assert!(token_b > token_a);

        assert_eq!(lock_b.validate_and_advance(token_b), FenceCheck::Ok);
        assert_eq!(lock_a.validate_and_advance(token_a), FenceCheck::Stale);
    }

    #[test]
    fn second_acquire_without_release_fails() {
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let lock_a = WalWriterLock::new(kv.clone(), "node-a", 30);
        assert!(lock_a.acquire().is_some());
        let lock_b = WalWriterLock::new(kv.clone(), "node-b", 30);
        assert!(lock_b.acquire().is_none());
    }

    #[test]
    fn keepalive_invokes_lost_callback_exactly_once() {
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let lock = WalWriterLock::new(kv.clone(), "node-a", 30);
        lock.acquire().unwrap();
        // A rival instance steals the lock key directly, simulating a
        // takeover this instance didn't initiate.
        let _ = kv.conditional_set("wal:writer_lock", Some("node-a"), "node-b");

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c1 = calls.clone();
        assert!(!lock.keepalive(|| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = calls.clone();
        assert!(!lock.keepalive(|| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn corrupt_fence_value_fails_closed() {
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let lock = WalWriterLock::new(kv.clone(), "node-a", 30);
        assert_eq!(
            lock.validate_and_advance(gateway_core::clock::MAX_FENCE_TOKEN + 1),
            FenceCheck::Corrupt
        );
    }
}
