//! Metric names emitted through the `metrics` facade.
//!
//! The library installs no recorder; without one every call is a no-op.
//!
//! # Labels
//!
//! - `location`: "local" or "remote"
//! - `trigger`: what persisted a miss, "frequency" or "score"

/// Calls served from an entry store.
///
/// Labels: `location`.
pub const CACHE_HITS_TOTAL: &str = "cacheflow_cache_hits_total";

/// Calls that invoked the producer.
///
/// Labels: `location`.
pub const CACHE_MISSES_TOTAL: &str = "cacheflow_cache_misses_total";

/// Misses whose value was written to an entry store.
///
/// Labels: `location`, `trigger`.
pub const CACHE_PERSISTED_TOTAL: &str = "cacheflow_cache_persisted_total";

/// Forced overwrites.
///
/// Labels: `location`.
pub const CACHE_MUTATIONS_TOTAL: &str = "cacheflow_cache_mutations_total";

/// Expired local entries removed by the sweeper.
pub const CACHE_SWEPT_TOTAL: &str = "cacheflow_cache_swept_total";

/// Producer latency in seconds.
///
/// Labels: `location`.
pub const PRODUCER_DURATION_SECONDS: &str = "cacheflow_producer_duration_seconds";
