//! Atomic KV primitives (C3).
//!
//! The core relies on one external capability: a KV store that runs a small
//! deterministic script against a set of keys transactionally. This module
//! defines that capability as the [`AtomicKv`] trait and ships two
//! implementations: [`InMemoryKv`] (DashMap, single-process, used in tests
//! and as the rate-limiter's fail-open fallback) and [`SqliteKv`]
//! (durable, the production default — following the donor's
//! `InMemoryNonceStore`/`SqliteNonceStore` split).

use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::KvError;

/// Outcome of an atomic recipe. Not every variant is relevant to every
/// recipe; callers match on the ones their recipe can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvStatus {
    Ok,
    Stale,
    Corrupt,
    CapExceeded,
    Allowed,
    CostCeilingExceeded,
    IdentityLimitExceeded,
    GlobalCapExceeded,
}

pub trait AtomicKv: Send + Sync {
    /// Recipe 1: conditional SET. Sets `key` to `new` only if the current
    /// value equals `expected` (or is absent when `expected` is `None`).
    fn conditional_set(&self, key: &str, expected: Option<&str>, new: &str) -> Result<KvStatus, KvError>;

    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Recipe 2: fence-token CAS. `incoming` is accepted (and stored) only
    /// if no token is stored yet, or `incoming` is strictly greater than the
    /// stored token. A non-numeric stored value is `Corrupt` (fail-closed).
    fn fence_cas(&self, key: &str, incoming: u64) -> Result<KvStatus, KvError>;

    /// Recipe 3: sliding-window limiter. Drops entries older than
    /// `now_ms - window_ms`, inserts `now_ms`, and returns the resulting
    /// cardinality — atomically with respect to other callers of this key.
    fn sliding_window_insert(&self, key: &str, now_ms: u64, window_ms: u64) -> Result<u64, KvError>;

    /// Recipe 4: three-tier atomic limiter. Reads the cost-ceiling, identity
    /// and global counters; only increments identity+global (with `ttl_secs`
    /// expiry) if `cost` added to the cost-ceiling counter would not exceed
    /// `cost_cap`, and neither identity nor global counters would exceed
    /// their caps.
    #[allow(clippy::too_many_arguments)]
    fn three_tier_check_and_incr(
        &self,
        cost_key: &str,
        identity_key: &str,
        global_key: &str,
        cost: i64,
        cost_cap: i64,
        identity_cap: i64,
        global_cap: i64,
        ttl_secs: u64,
    ) -> Result<KvStatus, KvError>;

    /// Recipe 5: atomic reserve against a single numeric counter keyed by
    /// `account_key`. Returns `Some(new_value)` on success, `None` when the
    /// current value is less than `amount` (insufficient funds — zero rows
    /// affected in the SQL analogue).
    fn atomic_reserve(&self, account_key: &str, amount: u64) -> Result<Option<u64>, KvError>;

    /// Inverse of `atomic_reserve`, used by rollback/finalize paths that
    /// need to credit a counter back (e.g. unlocked += amount).
    fn atomic_increment(&self, account_key: &str, delta: i64) -> Result<u64, KvError>;
}

/// In-memory, single-process reference implementation backed by `DashMap`.
/// Used for tests and as the admission limiter's fail-open fallback; never
/// as the production nonce/reservation store (state does not survive
/// restart, reopening replay windows).
#[derive(Default)]
pub struct InMemoryKv {
    strings: DashMap<String, String>,
    fences: DashMap<String, u64>,
    windows: DashMap<String, Vec<u64>>,
    counters: DashMap<String, i64>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AtomicKv for InMemoryKv {
    fn conditional_set(&self, key: &str, expected: Option<&str>, new: &str) -> Result<KvStatus, KvError> {
        use dashmap::mapref::entry::Entry;
        match self.strings.entry(key.to_string()) {
            Entry::Vacant(e) => {
                if expected.is_none() {
                    e.insert(new.to_string());
                    Ok(KvStatus::Ok)
                } else {
                    Ok(KvStatus::Stale)
                }
            }
            Entry::Occupied(mut e) => {
                if Some(e.get().as_str()) == expected {
                    e.insert(new.to_string());
                    Ok(KvStatus::Ok)
                } else {
                    Ok(KvStatus::Stale)
                }
            }
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.strings.remove(key);
        self.fences.remove(key);
        self.windows.remove(key);
        self.counters.remove(key);
        Ok(())
    }

    fn fence_cas(&self, key: &str, incoming: u64) -> Result<KvStatus, KvError> {
        use dashmap::mapref::entry::Entry;
        match self.fences.entry(key.to_string()) {
            Entry::Vacant(e) => {
                e.insert(incoming);
                Ok(KvStatus::Ok)
            }
            Entry::Occupied(mut e) => {
                if incoming > *e.get() {
                    e.insert(incoming);
                    Ok(KvStatus::Ok)
                } else {
                    Ok(KvStatus::Stale)
                }
            }
        }
    }

    fn sliding_window_insert(&self, key: &str, now_ms: u64, window_ms: u64) -> Result<u64, KvError> {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        let cutoff = now_ms.saturating_sub(window_ms);
        entry.retain(|&ts| ts > cutoff);
        entry.push(now_ms);
        Ok(entry.len() as u64)
    }

    fn three_tier_check_and_incr(
        &self,
        cost_key: &str,
        identity_key: &str,
        global_key: &str,
        cost: i64,
        cost_cap: i64,
        identity_cap: i64,
        global_cap: i64,
        _ttl_secs: u64,
    ) -> Result<KvStatus, KvError> {
        let current_cost = self.counters.get(cost_key).map(|v| *v).unwrap_or(0);
        if current_cost + cost > cost_cap {
            return Ok(KvStatus::CostCeilingExceeded);
        }
        let current_identity = self.counters.get(identity_key).map(|v| *v).unwrap_or(0);
        if current_identity + 1 > identity_cap {
            return Ok(KvStatus::IdentityLimitExceeded);
        }
        let current_global = self.counters.get(global_key).map(|v| *v).unwrap_or(0);
        if current_global + 1 > global_cap {
            return Ok(KvStatus::GlobalCapExceeded);
        }
        *self.counters.entry(cost_key.to_string()).or_insert(0) += cost;
        *self.counters.entry(identity_key.to_string()).or_insert(0) += 1;
        *self.counters.entry(global_key.to_string()).or_insert(0) += 1;
        Ok(KvStatus::Allowed)
    }

    fn atomic_reserve(&self, account_key: &str, amount: u64) -> Result<Option<u64>, KvError> {
        let mut entry = self.counters.entry(account_key.to_string()).or_insert(0);
        if *entry < amount as i64 {
            return Ok(None);
        }
        *entry -= amount as i64;
        Ok(Some(*entry as u64))
    }

    fn atomic_increment(&self, account_key: &str, delta: i64) -> Result<u64, KvError> {
        let mut entry = self.counters.entry(account_key.to_string()).or_insert(0);
        *entry = (*entry + delta).max(0);
        Ok(*entry as u64)
    }
}

/// SQLite-backed durable implementation, the production default — survives
/// restarts so fencing tokens and reservation counters cannot silently
/// reset to a state an attacker can replay against.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    pub fn open(path: &str) -> Result<Self, KvError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_strings (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS kv_fences (key TEXT PRIMARY KEY, token INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS kv_windows (key TEXT NOT NULL, ts INTEGER NOT NULL);
             CREATE INDEX IF NOT EXISTS idx_kv_windows_key ON kv_windows(key);
             CREATE TABLE IF NOT EXISTS kv_counters (key TEXT PRIMARY KEY, value INTEGER NOT NULL);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        Self::open(":memory:")
    }
}

impl AtomicKv for SqliteKv {
    fn conditional_set(&self, key: &str, expected: Option<&str>, new: &str) -> Result<KvStatus, KvError> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row("SELECT value FROM kv_strings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        if current.as_deref() != expected {
            return Ok(KvStatus::Stale);
        }
        conn.execute(
            "INSERT INTO kv_strings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, new],
        )?;
        Ok(KvStatus::Ok)
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row("SELECT value FROM kv_strings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv_strings WHERE key = ?1", params![key])?;
        conn.execute("DELETE FROM kv_fences WHERE key = ?1", params![key])?;
        conn.execute("DELETE FROM kv_windows WHERE key = ?1", params![key])?;
        conn.execute("DELETE FROM kv_counters WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn fence_cas(&self, key: &str, incoming: u64) -> Result<KvStatus, KvError> {
        let conn = self.conn.lock().unwrap();
        let current: Option<i64> = conn
            .query_row("SELECT token FROM kv_fences WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        match current {
            None => {
                conn.execute(
                    "INSERT INTO kv_fences (key, token) VALUES (?1, ?2)",
                    params![key, incoming as i64],
                )?;
                Ok(KvStatus::Ok)
            }
            Some(stored) if stored < 0 => Ok(KvStatus::Corrupt),
            Some(stored) => {
                if incoming as i64 > stored {
                    conn.execute(
                        "UPDATE kv_fences SET token = ?2 WHERE key = ?1",
                        params![key, incoming as i64],
                    )?;
                    Ok(KvStatus::Ok)
                } else {
                    Ok(KvStatus::Stale)
                }
            }
        }
    }

    fn sliding_window_insert(&self, key: &str, now_ms: u64, window_ms: u64) -> Result<u64, KvError> {
        let conn = self.conn.lock().unwrap();
        let cutoff = now_ms.saturating_sub(window_ms) as i64;
        conn.execute(
            "DELETE FROM kv_windows WHERE key = ?1 AND ts <= ?2",
            params![key, cutoff],
        )?;
        conn.execute(
            "INSERT INTO kv_windows (key, ts) VALUES (?1, ?2)",
            params![key, now_ms as i64],
        )?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_windows WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    fn three_tier_check_and_incr(
        &self,
        cost_key: &str,
        identity_key: &str,
        global_key: &str,
        cost: i64,
        cost_cap: i64,
        identity_cap: i64,
        global_cap: i64,
        _ttl_secs: u64,
    ) -> Result<KvStatus, KvError> {
        let conn = self.conn.lock().unwrap();
        let read = |k: &str| -> Result<i64, KvError> {
            Ok(conn
                .query_row("SELECT value FROM kv_counters WHERE key = ?1", params![k], |r| r.get(0))
                .optional()?
                .unwrap_or(0))
        };
        let current_cost = read(cost_key)?;
        if current_cost + cost > cost_cap {
            return Ok(KvStatus::CostCeilingExceeded);
        }
        let current_identity = read(identity_key)?;
        if current_identity + 1 > identity_cap {
            return Ok(KvStatus::IdentityLimitExceeded);
        }
        let current_global = read(global_key)?;
        if current_global + 1 > global_cap {
            return Ok(KvStatus::GlobalCapExceeded);
        }
        let bump = |k: &str, delta: i64| -> Result<(), KvError> {
            conn.execute(
                "INSERT INTO kv_counters (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = value + ?2",
                params![k, delta],
            )?;
            Ok(())
        };
        bump(cost_key, cost)?;
        bump(identity_key, 1)?;
        bump(global_key, 1)?;
        Ok(KvStatus::Allowed)
    }

    fn atomic_reserve(&self, account_key: &str, amount: u64) -> Result<Option<u64>, KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO kv_counters (key, value) VALUES (?1, 0)",
            params![account_key],
        )?;
        let updated = conn.execute(
            "UPDATE kv_counters SET value = value - ?2 WHERE key = ?1 AND value >= ?2",
            params![account_key, amount as i64],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let new_value: i64 = conn.query_row(
            "SELECT value FROM kv_counters WHERE key = ?1",
            params![account_key],
            |r| r.get(0),
        )?;
        Ok(Some(new_value as u64))
    }

    fn atomic_increment(&self, account_key: &str, delta: i64) -> Result<u64, KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv_counters (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = MAX(0, value + ?2)",
            params![account_key, delta],
        )?;
        let new_value: i64 = conn.query_row(
            "SELECT value FROM kv_counters WHERE key = ?1",
            params![account_key],
            |r| r.get(0),
        )?;
        Ok(new_value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<Box<dyn AtomicKv>> {
        vec![
            Box::new(InMemoryKv::new()),
            Box::new(SqliteKv::open_in_memory().unwrap()),
        ]
    }

    #[test]
    fn conditional_set_respects_expected_value() {
        for kv in backends() {
            assert_eq!(kv.conditional_set("lock", None, "node-a").unwrap(), KvStatus::Ok);
            assert_eq!(
                kv.conditional_set("lock", None, "node-b").unwrap(),
                KvStatus::Stale
            );
            assert_eq!(
                kv.conditional_set("lock", Some("node-a"), "node-b").unwrap(),
                KvStatus::Ok
            );
        }
    }

    #[test]
    fn fence_cas_is_strictly_monotonic() {
        for kv in backends() {
            assert_eq!(kv.fence_cas("fence", 1).unwrap(), KvStatus::Ok);
            assert_eq!(kv.fence_cas("fence", 2).unwrap(), KvStatus::Ok);
            assert_eq!(kv.fence_cas("fence", 2).unwrap(), KvStatus::Stale);
            assert_eq!(kv.fence_cas("fence", 1).unwrap(), KvStatus::Stale);
        }
    }

    #[test]
    fn sliding_window_prunes_old_entries() {
        for kv in backends() {
            assert_eq!(kv.sliding_window_insert("ip:1.2.3.4", 1_000, 60_000).unwrap(), 1);
            assert_eq!(kv.sliding_window_insert("ip:1.2.3.4", 2_000, 60_000).unwrap(), 2);
            // far in the future: the window of 60s has elapsed, both old entries drop
            assert_eq!(kv.sliding_window_insert("ip:1.2.3.4", 100_000, 60_000).unwrap(), 1);
        }
    }

    #[test]
    fn three_tier_limiter_enforces_each_tier() {
        for kv in backends() {
            let status = kv
                .three_tier_check_and_incr("cost", "identity", "global", 10, 5, 100, 100, 86_400)
                .unwrap();
            assert_eq!(status, KvStatus::CostCeilingExceeded);

            let status = kv
                .three_tier_check_and_incr("cost2", "identity2", "global2", 1, 100, 1, 100, 86_400)
                .unwrap();
            assert_eq!(status, KvStatus::Allowed);
            let status = kv
                .three_tier_check_and_incr("cost2", "identity2", "global2", 1, 100, 1, 100, 86_400)
                .unwrap();
            assert_eq!(status, KvStatus::IdentityLimitExceeded);
        }
    }

    #[test]
    fn atomic_reserve_rejects_insufficient_balance() {
        for kv in backends() {
            kv.atomic_increment("acct:1", 1000).unwrap();
            assert_eq!(kv.atomic_reserve("acct:1", 400).unwrap(), Some(600));
            assert_eq!(kv.atomic_reserve("acct:1", 1000).unwrap(), None);
        }
    }
}
