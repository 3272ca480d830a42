//! Admission rate limiting and cost-ceiling reservation (§4.3 a, b).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gateway_core::kv::{AtomicKv, KvStatus};

/// Caller identity used to shape the admission limiter's KV key.
#[derive(Debug, Clone)]
pub enum Identity {
    /// Unauthenticated caller, keyed by remote IP.
    Anonymous(String),
    /// Authenticated caller, keyed by a hash of the API key (never the
    /// secret itself).
    ApiKey(String),
}

impl Identity {
    fn key_fragment(&self) -> String {
        match self {
            Identity::Anonymous(ip) => format!("ip:{ip}"),
            Identity::ApiKey(hash) => format!("key:{hash}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    /// Per-identity or per-key tier exceeded — surfaces as 429.
    DeniedIdentity { retry_after_secs: u64 },
    /// Global cap hit, or the limiter itself is unhealthy — surfaces as 503.
    DeniedGlobal { retry_after_secs: u64 },
}

/// One UTC-day window, per-identity and global caps enforced via
/// [`AtomicKv::three_tier_check_and_incr`] with the cost tier disabled
/// (cost = 0, cap = i64::MAX) — the same recipe the cost-ceiling reservation
/// uses, just with a different tier doing the gating.
pub struct AdmissionLimiter {
    kv: Arc<dyn AtomicKv>,
    public_daily_limit: i64,
    authenticated_daily_limit: i64,
    global_daily_cap: i64,
    fallback: BoundedLastSeen,
}

impl AdmissionLimiter {
    pub fn new(
        kv: Arc<dyn AtomicKv>,
        public_daily_limit: i64,
        authenticated_daily_limit: i64,
        global_daily_cap: i64,
    ) -> Self {
        Self {
            kv,
            public_daily_limit,
            authenticated_daily_limit,
            global_daily_cap,
            fallback: BoundedLastSeen::new(10_000),
        }
    }

    pub fn check(&self, identity: &Identity, now_ms: u64) -> AdmissionDecision {
        let date = utc_date_string(now_ms);
        let identity_key = format!("admission:{}:{}", identity.key_fragment(), date);
        let global_key = format!("admission:global:{date}");
        let identity_cap = match identity {
            Identity::Anonymous(_) => self.public_daily_limit,
            Identity::ApiKey(_) => self.authenticated_daily_limit,
        };
        let retry_after = seconds_until_next_utc_midnight(now_ms);

        match self.kv.three_tier_check_and_incr(
            &identity_key,
            &identity_key,
            &global_key,
            0,
            i64::MAX,
            identity_cap,
            self.global_daily_cap,
            86_400,
        ) {
            Ok(KvStatus::Allowed) => AdmissionDecision::Allowed,
            Ok(KvStatus::IdentityLimitExceeded) => {
                AdmissionDecision::DeniedIdentity { retry_after_secs: retry_after }
            }
            Ok(KvStatus::GlobalCapExceeded) => {
                AdmissionDecision::DeniedGlobal { retry_after_secs: retry_after }
            }
            Ok(_) => AdmissionDecision::Allowed,
            Err(e) => {
                tracing::warn!(error = %e, "admission limiter KV unreachable, falling back to in-process 1rps gate");
                if self.fallback.allow(&identity.key_fragment(), now_ms) {
                    AdmissionDecision::Allowed
                } else {
                    AdmissionDecision::DeniedGlobal { retry_after_secs: 1 }
                }
            }
        }
    }
}

/// Cost-ceiling reservation (§4.3 b). `reserve` uses recipe 1 (conditional
/// SET) via a dedicated counter key; `release` reconciles the estimate
/// against the actual cost and is idempotent (first call wins).
pub struct CostReservation {
    kv: Arc<dyn AtomicKv>,
    key: String,
    estimated_cents: i64,
    released: AtomicBool,
    actual_cents: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Allowed,
    /// Fails closed: cost must never silently exceed the ceiling.
    Denied,
}

pub struct CostCeilingLimiter {
    kv: Arc<dyn AtomicKv>,
    ceiling_cents: i64,
}

impl CostCeilingLimiter {
    pub fn new(kv: Arc<dyn AtomicKv>, ceiling_cents: i64) -> Self {
        Self { kv, ceiling_cents }
    }

    /// `reserve(estimated_cents)`. On KV unreachability this fails closed —
    /// the opposite policy from admission — because cost must never
    /// silently exceed the configured ceiling.
    pub fn reserve(&self, date: &str, estimated_cents: i64) -> Result<(ReservationOutcome, CostReservation), ()> {
        let key = format!("cost_ceiling:{date}");
        loop {
            let current: i64 = self
                .kv
                .get(&key)
                .map_err(|_| ())?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if current + estimated_cents > self.ceiling_cents {
                return Ok((
                    ReservationOutcome::Denied,
                    CostReservation {
                        kv: self.kv.clone(),
                        key,
                        estimated_cents,
                        released: AtomicBool::new(true),
                        actual_cents: AtomicI64::new(0),
                    },
                ));
            }
            let new_value = (current + estimated_cents).to_string();
            let prev = if current == 0 { None } else { Some(current.to_string()) };
            match self.kv.conditional_set(&key, prev.as_deref(), &new_value) {
                Ok(KvStatus::Ok) => {
                    return Ok((
                        ReservationOutcome::Allowed,
                        CostReservation {
                            kv: self.kv.clone(),
                            key,
                            estimated_cents,
                            released: AtomicBool::new(false),
                            actual_cents: AtomicI64::new(0),
                        },
                    ));
                }
                Ok(KvStatus::Stale) => continue,
                _ => return Err(()),
            }
        }
    }
}

impl CostReservation {
    /// Idempotent: only the first call reconciles the counter. A positive
    /// delta (actual > estimate) is added; a negative delta subtracts at
    /// most the current value, so the counter never goes negative.
    pub fn release(&self, actual_cents: i64) {
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.actual_cents.store(actual_cents, Ordering::SeqCst);
        let delta = actual_cents - self.estimated_cents;
        if delta == 0 {
            return;
        }
        if delta > 0 {
            let _ = self.kv.atomic_increment(&self.key, delta);
        } else {
            if let Ok(Some(current)) = self.kv.get(&self.key) {
                let current: i64 = current.parse().unwrap_or(0);
                let shrink = delta.abs().min(current);
                let _ = self.kv.atomic_increment(&self.key, -shrink);
            }
        }
    }
}

/// Bounded last-seen-time map used only as the admission limiter's
/// fail-open fallback. Never more restrictive in aggregate than the
/// configured per-identity limit because 1 request/sec is stricter than
/// any realistic daily cap divided across a day.
struct BoundedLastSeen {
    entries: DashMap<String, u64>,
    capacity: usize,
}

impl BoundedLastSeen {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    fn allow(&self, key: &str, now_ms: u64) -> bool {
        if let Some(mut last) = self.entries.get_mut(key) {
            if now_ms.saturating_sub(*last) < 1_000 {
                return false;
            }
            *last = now_ms;
            return true;
        }
        if self.entries.len() >= self.capacity {
            if let Some(evict_key) = self.entries.iter().next().map(|e| e.key().clone()) {
                self.entries.remove(&evict_key);
            }
        }
        self.entries.insert(key.to_string(), now_ms);
        true
    }
}

fn utc_date_string(now_ms: u64) -> String {
    let days = now_ms / 86_400_000;
    days.to_string()
}

fn seconds_until_next_utc_midnight(now_ms: u64) -> u64 {
    let ms_into_day = now_ms % 86_400_000;
    (86_400_000 - ms_into_day) / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::kv::InMemoryKv;

    #[test]
    fn admission_allows_until_identity_cap_then_denies() {
        let limiter = AdmissionLimiter::new(Arc::new(InMemoryKv::new()), 2, 100, 1000);
        let id = Identity::Anonymous("1.2.3.4".into());
        assert_eq!(limiter.check(&id, 0), AdmissionDecision::Allowed);
        assert_eq!(limiter.check(&id, 0), AdmissionDecision::Allowed);
        assert!(matches!(
            limiter.check(&id, 0),
            AdmissionDecision::DeniedIdentity { .. }
        ));
    }

    #[test]
    fn admission_global_cap_denies_across_identities() {
        let limiter = AdmissionLimiter::new(Arc::new(InMemoryKv::new()), 100, 100, 1);
        assert_eq!(
            limiter.check(&Identity::Anonymous("1.1.1.1".into()), 0),
            AdmissionDecision::Allowed
        );
        assert!(matches!(
            limiter.check(&Identity::Anonymous("2.2.2.2".into()), 0),
            AdmissionDecision::DeniedGlobal { .. }
        ));
    }

    #[test]
    fn cost_reservation_release_is_idempotent() {
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let limiter = CostCeilingLimiter::new(kv.clone(), 1000);
        let (outcome, reservation) = limiter.reserve("2026-07-28", 100).unwrap();
        assert_eq!(outcome, ReservationOutcome::Allowed);
        reservation.release(60);
        reservation.release(999); // second call is a no-op
        let remaining: i64 = kv.get("cost_ceiling:2026-07-28").unwrap().unwrap().parse().unwrap();
        assert_eq!(remaining, 60);
    }

    #[test]
    fn cost_reservation_denies_over_ceiling() {
        let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());
        let limiter = CostCeilingLimiter::new(kv, 100);
        let (outcome, _) = limiter.reserve("d", 50).unwrap();
        assert_eq!(outcome, ReservationOutcome::Allowed);
        let (outcome, _) = limiter.reserve("d", 60).unwrap();
        assert_eq!(outcome, ReservationOutcome::Denied);
    }
}
