//! # cacheflow
//!
//! Adaptive caching for per-key computations (GraphQL resolvers and the
//! like). Each call either serves a stored value, or runs the producer and
//! decides from observed call patterns whether the result is worth storing.
//!
//! ## Parts
//! - **Entry stores**: the local table or a remote service, from [`flowstore`]
//! - **Metrics Recorder**: per-key call windows and a global rollup
//! - **Decision Engine**: frequency trigger OR adaptive score
//! - **Dispatcher**: the [`CacheFlow`] handle
//! - **Sweeper**: background removal of expired local entries
//! - **Writer**: write-behind of the local table and the metrics documents
//!
//! ## Example
//!
//! ```no_run
//! use cacheflow::{CacheFlow, CacheFlowConfig, CachePolicy, LocalConfig};
//! use std::convert::Infallible;
//!
//! # async fn run() -> cacheflow::Result<()> {
//! let flow = CacheFlow::init(
//!     CacheFlowConfig::new().with_local(LocalConfig::new().global_threshold(100.0)),
//! )
//! .await?;
//!
//! let policy = CachePolicy::local().max_age(30.0);
//! let greeting: String = flow
//!     .cache(&policy, "hello", || async { Ok::<_, Infallible>("world".to_string()) })
//!     .await?;
//! assert_eq!(greeting, "world");
//!
//! flow.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod decision;
mod dispatcher;
mod error;
mod metrics;
mod policy;
mod stats;
mod sweeper;
mod writer;
pub mod telemetry;

pub use config::{
    CacheFlowConfig, LocalConfig, DEFAULT_SWEEP_INTERVAL_SECS, MAX_SWEEP_INTERVAL_SECS,
};
pub use decision::{decide, frequency, score, Decision, DecisionInputs, ScoreWeights};
pub use dispatcher::CacheFlow;
pub use error::{BoxError, Error, Result};
pub use self::metrics::{
    CallSpan, GlobalMetrics, KeyMetrics, MetricsRecorder, MetricsSnapshot, Miss,
    GLOBAL_METRICS_FILE, KEY_METRICS_FILE, WINDOW_CAPACITY,
};
pub use policy::{CachePolicy, StorageLocation};
pub use stats::SweepStats;
pub use sweeper::SweepReport;

pub use flowstore::{RemoteConfig, TABLE_FILE};
