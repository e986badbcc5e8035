//! Sweeper counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals across sweeper ticks
#[derive(Debug, Default)]
pub struct SweepStats {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    entries_removed: AtomicU64,
    bytes_released: AtomicU64,
}

impl SweepStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed tick
    pub fn record_tick(&self, removed: u64, bytes: u64, failed: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_ticks.fetch_add(1, Ordering::Relaxed);
        }
        self.entries_removed.fetch_add(removed, Ordering::Relaxed);
        self.bytes_released.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Ticks run
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that hit at least one backend error
    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks.load(Ordering::Relaxed)
    }

    /// Expired entries removed
    pub fn entries_removed(&self) -> u64 {
        self.entries_removed.load(Ordering::Relaxed)
    }

    /// Bytes subtracted from `totalLocalBytes`
    pub fn bytes_released(&self) -> u64 {
        self.bytes_released.load(Ordering::Relaxed)
    }
}
