//! Boot-time recovery cascade and WAL replay (C13 / §4.11).
//!
//! Priority order: local WAL → object store → source-control snapshot →
//! built-in template. Each non-template source is wrapped with
//! per-operation timeouts; an overall boot deadline bounds the cascade.

use std::time::Duration;

use async_trait::async_trait;
use gateway_ledger::JournalEntry;
use thiserror::Error;
use tokio::time::timeout;

pub mod sources;
pub use sources::{GitSnapshotSource, LocalWalSource, ObjectStoreSource, TemplateSource};

pub const IS_AVAILABLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const RESTORE_TIMEOUT: Duration = Duration::from_secs(30);
pub const OVERALL_BOOT_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("source {0} timed out")]
    Timeout(String),
    #[error("source {0} failed: {1}")]
    SourceFailed(String, String),
}

#[derive(Debug, Clone, Default)]
pub struct RestoreStats {
    pub files_restored: u64,
    pub entries: Vec<JournalEntry>,
}

/// A candidate source the recovery engine can restore durable state from.
#[async_trait]
pub trait RestoreSource: Send + Sync {
    fn name(&self) -> &str;
    async fn is_available(&self) -> bool;
    async fn restore(&self) -> Result<RestoreStats, RecoveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Running,
    Degraded,
    LoopDetected,
}

#[derive(Debug, Clone)]
pub struct BootReport {
    pub source: String,
    pub state: BootState,
    pub files_restored: u64,
    pub entries_replayed: u64,
    pub duration: Duration,
}

/// Runs the cascade over `sources` in priority order, falling back to
/// `template` (forced unconditionally, no timeout) if every ranked source
/// times out or fails, or if the overall deadline elapses first. After
/// restoring files, streams the restored WAL entries through `apply`.
pub async fn boot<F>(
    sources: Vec<Box<dyn RestoreSource>>,
    template: Box<dyn RestoreSource>,
    mut apply: F,
) -> BootReport
where
    F: FnMut(&JournalEntry),
{
    let started = std::time::Instant::now();

    for source in &sources {
        if started.elapsed() >= OVERALL_BOOT_DEADLINE {
            tracing::error!("recovery overall deadline exceeded, forcing template source");
            break;
        }

        let available = timeout(IS_AVAILABLE_TIMEOUT, source.is_available())
            .await
            .unwrap_or(false);
        if !available {
            tracing::warn!(source = source.name(), "restore source unavailable");
            continue;
        }

        match timeout(RESTORE_TIMEOUT, source.restore()).await {
            Ok(Ok(stats)) => {
                for entry in &stats.entries {
                    apply(entry);
                }
                tracing::info!(source = source.name(), files = stats.files_restored, "source_selected");
                return BootReport {
                    source: source.name().to_string(),
                    state: BootState::Running,
                    files_restored: stats.files_restored,
                    entries_replayed: stats.entries.len() as u64,
                    duration: started.elapsed(),
                };
            }
            Ok(Err(e)) => {
                tracing::warn!(source = source.name(), error = %e, "restore source failed, trying next");
            }
            Err(_) => {
                tracing::warn!(source = source.name(), "restore source timed out, trying next");
            }
        }
    }

    match template.restore().await {
        Ok(stats) => {
            for entry in &stats.entries {
                apply(entry);
            }
            tracing::warn!("source_selected: built-in template (all other sources exhausted)");
            BootReport {
                source: template.name().to_string(),
                state: BootState::Degraded,
                files_restored: stats.files_restored,
                entries_replayed: stats.entries.len() as u64,
                duration: started.elapsed(),
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "template source itself failed — cannot bootstrap");
            BootReport {
                source: "none".to_string(),
                state: BootState::LoopDetected,
                files_restored: 0,
                entries_replayed: 0,
                duration: started.elapsed(),
            }
        }
    }
}
