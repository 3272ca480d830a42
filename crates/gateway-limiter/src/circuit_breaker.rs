//! Per-provider circuit breaker (C5 / §4.4).

use dashmap::DashMap;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Request may proceed. In `HalfOpen`, this is the single admitted probe.
    Admitted,
    Denied,
}

/// Wire-shaped snapshot broadcast to peers on every real state transition.
/// `version` is monotonic; peers only apply an incoming update when its
/// version is strictly greater than their local copy.
#[derive(Debug, Clone)]
pub struct CircuitEntry {
    pub provider: String,
    pub model: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_count: u32,
    pub recovery_at: Option<u64>,
    pub version: u64,
}

struct Entry {
    state: CircuitState,
    consecutive_failures: u32,
    failure_timestamps: Vec<u64>,
    opened_at: Option<u64>,
    half_open_probe_in_flight: bool,
    version: u64,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_timestamps: Vec::new(),
            opened_at: None,
            half_open_probe_in_flight: false,
            version: 0,
        }
    }

    fn snapshot(&self, provider: &str, model: &str) -> CircuitEntry {
        CircuitEntry {
            provider: provider.to_string(),
            model: model.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            failure_count: self.failure_timestamps.len() as u32,
            recovery_at: self.opened_at,
            version: self.version,
        }
    }
}

pub struct CircuitBreaker {
    entries: DashMap<(String, String), Entry>,
    failure_threshold: u32,
    failure_window_ms: u64,
    recovery_delay_ms: u64,
    broadcast: broadcast::Sender<CircuitEntry>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, failure_window_ms: u64, recovery_delay_ms: u64) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            entries: DashMap::new(),
            failure_threshold,
            failure_window_ms,
            recovery_delay_ms,
            broadcast: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEntry> {
        self.broadcast.subscribe()
    }

    /// Ask whether a call to `(provider, model)` may proceed right now.
    /// `HalfOpen` admits exactly one probe; concurrent calls while a probe
    /// is already in flight are denied.
    pub fn check(&self, provider: &str, model: &str, now_ms: u64) -> ProbeOutcome {
        let mut entry = self
            .entries
            .entry((provider.to_string(), model.to_string()))
            .or_insert_with(Entry::new);

        match entry.state {
            CircuitState::Closed => ProbeOutcome::Admitted,
            CircuitState::Open => {
                let opened_at = entry.opened_at.unwrap_or(now_ms);
                if now_ms.saturating_sub(opened_at) >= self.recovery_delay_ms {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_probe_in_flight = true;
                    entry.version += 1;
                    tracing::info!(provider, model, "circuit OPEN -> HALF_OPEN, admitting probe");
                    self.publish(&entry, provider, model);
                    ProbeOutcome::Admitted
                } else {
                    ProbeOutcome::Denied
                }
            }
            CircuitState::HalfOpen => {
                if entry.half_open_probe_in_flight {
                    ProbeOutcome::Denied
                } else {
                    entry.half_open_probe_in_flight = true;
                    ProbeOutcome::Admitted
                }
            }
        }
    }

    pub fn record_success(&self, provider: &str, model: &str) {
        let mut entry = self
            .entries
            .entry((provider.to_string(), model.to_string()))
            .or_insert_with(Entry::new);
        match entry.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Closed;
                entry.consecutive_failures = 0;
                entry.failure_timestamps.clear();
                entry.half_open_probe_in_flight = false;
                entry.opened_at = None;
                entry.version += 1;
                tracing::info!(provider, model, "circuit HALF_OPEN -> CLOSED (probe succeeded)");
                self.publish(&entry, provider, model);
            }
            CircuitState::Open => {
                // A success can't normally arrive while OPEN (callers are
                // denied), but treat it defensively as a no-op.
            }
        }
    }

    pub fn record_failure(&self, provider: &str, model: &str, now_ms: u64) {
        let mut entry = self
            .entries
            .entry((provider.to_string(), model.to_string()))
            .or_insert_with(Entry::new);

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(now_ms);
                entry.half_open_probe_in_flight = false;
                entry.version += 1;
                tracing::info!(provider, model, "circuit HALF_OPEN -> OPEN (probe failed)");
                self.publish(&entry, provider, model);
            }
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                entry.failure_timestamps.retain(|&ts| now_ms.saturating_sub(ts) < self.failure_window_ms);
                entry.failure_timestamps.push(now_ms);
                if entry.consecutive_failures >= self.failure_threshold
                    && entry.failure_timestamps.len() as u32 >= self.failure_threshold
                {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(now_ms);
                    entry.version += 1;
                    tracing::info!(provider, model, threshold = self.failure_threshold, "circuit CLOSED -> OPEN");
                    self.publish(&entry, provider, model);
                }
            }
            CircuitState::Open => {
                // Already open: do not re-emit a transition log.
            }
        }
    }

    /// Apply a peer's broadcast snapshot. Only accepted if its version is
    /// strictly newer than the local copy.
    pub fn apply_remote_update(&self, remote: CircuitEntry) {
        let mut entry = self
            .entries
            .entry((remote.provider.clone(), remote.model.clone()))
            .or_insert_with(Entry::new);
        if remote.version > entry.version {
            entry.state = remote.state;
            entry.consecutive_failures = remote.consecutive_failures;
            entry.opened_at = remote.recovery_at;
            entry.version = remote.version;
        }
    }

    pub fn snapshot(&self, provider: &str, model: &str) -> Option<CircuitEntry> {
        self.entries
            .get(&(provider.to_string(), model.to_string()))
            .map(|e| e.snapshot(provider, model))
    }

    fn publish(&self, entry: &Entry, provider: &str, model: &str) {
        let _ = self.broadcast.send(entry.snapshot(provider, model));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_failures_open_circuit_exactly_once() {
        let cb = CircuitBreaker::new(3, 60_000, 5_000);
        for i in 0..2 {
            assert_eq!(cb.check("openai", "gpt", i), ProbeOutcome::Admitted);
            cb.record_failure("openai", "gpt", i);
        }
        assert_eq!(cb.snapshot("openai", "gpt").unwrap().state, CircuitState::Closed);
        cb.record_failure("openai", "gpt", 2);
        assert_eq!(cb.snapshot("openai", "gpt").unwrap().state, CircuitState::Open);
        // Further failures while OPEN do not bump the version (no re-emit).
        let version_after_open = cb.snapshot("openai", "gpt").unwrap().version;
        cb.record_failure("openai", "gpt", 3);
        assert_eq!(cb.snapshot("openai", "gpt").unwrap().version, version_after_open);
    }

    #[test]
    fn half_open_admits_single_probe_then_closes_on_success() {
        let cb = CircuitBreaker::new(1, 60_000, 1_000);
        cb.check("p", "m", 0);
        cb.record_failure("p", "m", 0);
        assert_eq!(cb.check("p", "m", 500), ProbeOutcome::Denied);
        assert_eq!(cb.check("p", "m", 1_500), ProbeOutcome::Admitted);
        assert_eq!(cb.check("p", "m", 1_600), ProbeOutcome::Denied);
        cb.record_success("p", "m");
        assert_eq!(cb.snapshot("p", "m").unwrap().state, CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens_circuit() {
        let cb = CircuitBreaker::new(1, 60_000, 1_000);
        cb.check("p", "m", 0);
        cb.record_failure("p", "m", 0);
        cb.check("p", "m", 1_500);
        cb.record_failure("p", "m", 1_500);
        assert_eq!(cb.snapshot("p", "m").unwrap().state, CircuitState::Open);
    }

    #[test]
    fn remote_update_only_applied_when_strictly_newer() {
        let cb = CircuitBreaker::new(3, 60_000, 5_000);
        cb.check("p", "m", 0);
        let stale = CircuitEntry {
            provider: "p".into(),
            model: "m".into(),
            state: CircuitState::Open,
            consecutive_failures: 9,
            failure_count: 9,
            recovery_at: Some(0),
            version: 0,
        };
        cb.apply_remote_update(stale);
        assert_eq!(cb.snapshot("p", "m").unwrap().state, CircuitState::Closed);
    }
}
