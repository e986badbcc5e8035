//! Expiry Sweeper
//!
//! A background task that, every tick, removes expired entries from the
//! local table (releasing their bytes in the recorder) and replaces the
//! remote byte total with what the remote service reports. Evictions only
//! touch memory; the write-behind task is woken once per sweep to persist
//! them, and retries there whatever an earlier flush failed to write.
//! Backend errors are logged and counted; the next tick runs regardless.

use std::sync::Arc;
use std::time::Duration;

use flowstore::{now_millis, EntryStore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::dispatcher::Shared;
use crate::telemetry;

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys whose expired entries were removed
    pub removed: Vec<String>,
    /// Bytes subtracted from `totalLocalBytes`
    pub bytes_released: u64,
    /// Memory usage reported by the remote service
    pub remote_bytes: Option<u64>,
    /// Backend errors hit along the way
    pub errors: usize,
}

/// Handle to the running sweeper task
pub(crate) struct Sweeper {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the task; the first sweep happens one `period` from now
    pub(crate) fn start(shared: Arc<Shared>, period: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(shared, period, Arc::clone(&shutdown)));
        debug!(?period, "sweeper started");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for it to finish its current tick
    pub(crate) async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("sweeper task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

async fn run(shared: Arc<Shared>, period: Duration, shutdown: Arc<Notify>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                sweep_once(&shared, now_millis()).await;
            }
        }
    }
    debug!("sweeper stopped");
}

/// Run one sweep as of `now_ms`
pub(crate) async fn sweep_once(shared: &Shared, now_ms: i64) -> SweepReport {
    let mut report = SweepReport::default();

    if let Some(local) = &shared.local {
        match local.scan().await {
            Ok(entries) => {
                for (key, _) in entries
                    .into_iter()
                    .filter(|(_, entry)| entry.is_expired_at(now_ms))
                {
                    // re-checked under the write lock; a refreshed entry survives
                    match local.evict_if_expired(&key, now_ms) {
                        Ok(Some(_)) => {
                            report.bytes_released += shared.recorder.release_local_bytes(&key);
                            report.removed.push(key);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(key = %key, "failed to evict expired entry: {}", e);
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("failed to scan local table: {}", e);
                report.errors += 1;
            }
        }
    }

    if let Some(remote) = &shared.remote {
        match remote.used_memory().await {
            Ok(bytes) => {
                shared.recorder.set_remote_bytes(bytes);
                report.remote_bytes = Some(bytes);
            }
            Err(e) => {
                warn!("failed to read remote memory usage: {}", e);
                report.errors += 1;
            }
        }
    }

    shared.dirty.notify_one();

    let removed = report.removed.len() as u64;
    shared
        .stats
        .record_tick(removed, report.bytes_released, report.errors > 0);
    if removed > 0 {
        metrics::counter!(telemetry::CACHE_SWEPT_TOTAL).increment(removed);
        debug!(
            removed,
            bytes = report.bytes_released,
            "swept expired entries"
        );
    }

    report
}
