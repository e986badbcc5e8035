//! Write-behind for the local table and the metrics documents
//!
//! Calls and sweeps only change in-memory state and wake the writer. The
//! writer flushes on the blocking pool, off the request path; wake-ups that
//! arrive while a flush runs collapse into one more flush. A failed flush is
//! logged and tried again on the next wake-up, and the sweeper wakes the
//! writer every tick.

use std::io;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatcher::Shared;
use crate::error::{Error, Result};

/// Handle to the running writer task
pub(crate) struct Writer {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Writer {
    pub(crate) fn start(shared: Arc<Shared>) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(shared, Arc::clone(&shutdown)));
        debug!("writer started");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for its current flush to finish
    pub(crate) async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("writer task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

async fn run(shared: Arc<Shared>, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = shared.dirty.notified() => {
                if let Err(e) = flush(&shared).await {
                    warn!("write-behind flush failed: {}", e);
                }
            }
        }
    }
    debug!("writer stopped");
}

/// Flush both the local table and the metrics documents on the blocking pool
pub(crate) async fn flush(shared: &Arc<Shared>) -> Result<()> {
    let shared = Arc::clone(shared);
    tokio::task::spawn_blocking(move || shared.flush_blocking())
        .await
        .map_err(|e| Error::Backend(flowstore::Error::Io(io::Error::other(e.to_string()))))?
}
