//! The retention worker: a periodic cycle that ensures future partitions
//! exist, purges expired allows, detaches aged denial partitions, and
//! drops partitions past their detach grace period.
//!
//! Mirrors [`crate::listener::run_reconnecting`]'s shape — a cancellable
//! loop spawned once at bootstrap — but on a fixed interval rather than
//! a reconnecting stream.

use std::sync::Arc;
use std::time::Duration;

use reaper_core::retention::{PartitionManager, RetentionConfig, RetentionCycleReport, DETACH_DROP_GRACE};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How many months ahead `ensure_partitions` provisions.
pub const FUTURE_MONTHS: u32 = 3;

/// Runs one retention cycle against `manager` under `config`.
///
/// All four operations are attempted regardless of earlier failures —
/// per spec §4.7, a failed purge must not prevent partition creation or
/// detachment from being attempted. Every error is recorded on the
/// returned [`RetentionCycleReport`] rather than short-circuiting the
/// cycle.
pub async fn run_once(manager: &dyn PartitionManager, config: &RetentionConfig) -> RetentionCycleReport {
    let mut report = RetentionCycleReport::default();
    let now = chrono::Utc::now();

    match manager.ensure_partitions(FUTURE_MONTHS).await {
        Ok(()) => report.partitions_ensured = true,
        Err(err) => report.errors.push(format!("ensure_partitions: {err}")),
    }

    match manager
        .purge_expired_allows(now - chrono_duration(config.retain_allows))
        .await
    {
        Ok(deleted) => report.allows_purged = deleted,
        Err(err) => report.errors.push(format!("purge_expired_allows: {err}")),
    }

    match manager
        .detach_expired_partitions(now - chrono_duration(config.retain_denials))
        .await
    {
        Ok(names) => report.partitions_detached = names,
        Err(err) => report.errors.push(format!("detach_expired_partitions: {err}")),
    }

    match manager.drop_detached_partitions(DETACH_DROP_GRACE).await {
        Ok(names) => report.partitions_dropped = names,
        Err(err) => report.errors.push(format!("drop_detached_partitions: {err}")),
    }

    if report.has_errors() {
        error!(errors = ?report.errors, "retention cycle completed with errors");
    } else {
        info!(
            allows_purged = report.allows_purged,
            detached = report.partitions_detached.len(),
            dropped = report.partitions_dropped.len(),
            "retention cycle completed"
        );
    }

    report
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

/// Owns the background task that drives [`run_once`] on `purge_interval`,
/// starting with an immediate run.
///
/// `stop` waits for the in-flight cycle to finish before returning, so a
/// caller never observes a worker that's "stopped" mid-purge.
pub struct RetentionWorker {
    manager: Arc<dyn PartitionManager>,
    config: RetentionConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RetentionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetentionWorker {
    #[must_use]
    pub fn new(manager: Arc<dyn PartitionManager>, config: RetentionConfig) -> Self {
        Self {
            manager,
            config,
            handle: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the worker loop: runs a cycle immediately, then again every
    /// `purge_interval` until [`stop`](Self::stop) is called.
    pub async fn start(&self) {
        let manager = self.manager.clone();
        let config = self.config;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.purge_interval);
            // The first tick fires immediately; subsequent ticks wait a
            // full interval, matching "RunOnce immediately, then on tick".
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        run_once(manager.as_ref(), &config).await;
                    }
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Signal the loop to stop and wait for the current cycle to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
