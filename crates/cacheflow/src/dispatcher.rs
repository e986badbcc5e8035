//! Cache Dispatcher: the [`CacheFlow`] handle
//!
//! Each call is routed by its policy to the local table or the remote
//! service:
//!
//! - **hit**: refresh the entry's TTL, record a cached observation, return
//!   the stored value
//! - **miss**: run the producer once, ask the Decision Engine whether to
//!   persist, record an uncached observation, return the produced value
//! - **mutate**: run the producer and overwrite the target key
//!   unconditionally
//!
//! A hit whose refresh finds the entry gone (swept in between) is handled as
//! a miss. Failed calls leave the metrics untouched. Nothing here touches the
//! disk; changes are handed to the write-behind task.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use flowstore::{estimate_size, now_millis, EntryStore, LocalStore, RemoteStore};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::CacheFlowConfig;
use crate::decision::{decide, ScoreWeights};
use crate::error::{BoxError, Error, Result};
use crate::metrics::{MetricsRecorder, Miss};
use crate::policy::{CachePolicy, StorageLocation};
use crate::stats::SweepStats;
use crate::sweeper::{sweep_once, SweepReport, Sweeper};
use crate::telemetry;
use crate::writer::{self, Writer};

/// State shared between the handle and the background tasks
pub(crate) struct Shared {
    pub(crate) local: Option<LocalStore>,
    pub(crate) remote: Option<RemoteStore>,
    pub(crate) recorder: MetricsRecorder,
    pub(crate) stats: SweepStats,
    /// Wakes the writer after in-memory state changed
    pub(crate) dirty: Notify,
    weights: ScoreWeights,
    default_threshold: Option<f64>,
}

impl Shared {
    fn store(&self, location: StorageLocation) -> Result<&dyn EntryStore> {
        let store: Option<&dyn EntryStore> = match location {
            StorageLocation::Local => self.local.as_ref().map(|s| s as &dyn EntryStore),
            StorageLocation::Remote => self.remote.as_ref().map(|s| s as &dyn EntryStore),
        };
        store.ok_or_else(|| {
            Error::Configuration(format!("{} storage is not configured", location))
        })
    }

    /// Whether anything is mirrored to disk
    fn is_durable(&self) -> bool {
        self.local.as_ref().is_some_and(|local| local.path().is_some())
            || self.recorder.dir().is_some()
    }

    /// Write out the local table and the metrics documents; blocking.
    ///
    /// Both are attempted; the first error is returned.
    pub(crate) fn flush_blocking(&self) -> Result<()> {
        let table = match &self.local {
            Some(local) => local.flush().map(|_| ()).map_err(Error::from),
            None => Ok(()),
        };
        let documents = self.recorder.flush().map(|_| ());
        table.and(documents)
    }
}

/// Adaptive cache in front of per-key computations.
///
/// Built once with [`CacheFlow::init`] and shared by reference (or behind an
/// `Arc`) across tasks.
pub struct CacheFlow {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<Sweeper>>,
    writer: Mutex<Option<Writer>>,
}

impl CacheFlow {
    /// Open the configured backends, reset the metrics documents and start
    /// the sweeper and the write-behind task
    pub async fn init(config: CacheFlowConfig) -> Result<Self> {
        config.validate()?;
        let period = config.sweep_interval()?;

        let local = match config.local_enabled() {
            Some(local) => Some(match &local.path {
                Some(dir) => LocalStore::open(dir)?,
                None => LocalStore::in_memory(),
            }),
            None => None,
        };

        let remote = match &config.remote {
            Some(remote) => Some(RemoteStore::connect(remote.clone()).await?),
            None => None,
        };

        let nominal = config.score.nominal_threshold;
        let recorder = match &config.metrics_dir {
            Some(dir) => MetricsRecorder::open(dir, nominal)?,
            None => MetricsRecorder::in_memory(nominal),
        };

        let has_backend = local.is_some() || remote.is_some();
        let shared = Arc::new(Shared {
            local,
            remote,
            recorder,
            stats: SweepStats::new(),
            dirty: Notify::new(),
            weights: config.score,
            default_threshold: config.default_threshold(),
        });

        let sweeper = has_backend.then(|| Sweeper::start(Arc::clone(&shared), period));
        let writer = shared
            .is_durable()
            .then(|| Writer::start(Arc::clone(&shared)));

        info!(
            local = shared.local.is_some(),
            remote = shared.remote.is_some(),
            sweep_interval = ?period,
            "cacheflow initialized"
        );

        Ok(Self {
            shared,
            sweeper: Mutex::new(sweeper),
            writer: Mutex::new(writer),
        })
    }

    /// Serve `key` from the store the policy names, or produce it.
    ///
    /// With `policy.mutate` set, the producer's value overwrites the mutate
    /// key instead; that key must have been observed before.
    pub async fn cache<T, F, Fut, E>(&self, policy: &CachePolicy, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        policy.validate()?;
        let store = self.shared.store(policy.location)?;
        self.serve(policy, store, key, producer).await
    }

    /// [`cache`](Self::cache) with the policy given as JSON
    pub async fn cache_json<T, F, Fut, E>(&self, policy: &Value, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let policy = CachePolicy::from_value(policy)?;
        self.cache(&policy, key, producer).await
    }

    async fn serve<T, F, Fut, E>(
        &self,
        policy: &CachePolicy,
        store: &dyn EntryStore,
        key: &str,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        if let Some(target) = &policy.mutate {
            return self.mutate(policy, store, target, producer).await;
        }

        let ttl = policy.ttl()?;
        let started = Instant::now();
        if let Some(entry) = store.get(key).await? {
            if store.refresh_ttl(key, ttl).await? {
                let size = estimate_size(&entry.data);
                let value: T = serde_json::from_value(entry.data)?;
                let latency = elapsed_ms(started);

                self.shared
                    .recorder
                    .record_hit(key, policy.location, latency, size, now_millis());
                self.shared.dirty.notify_one();
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "location" => policy.location.as_str())
                    .increment(1);
                debug!(key, location = %policy.location, latency_ms = latency, "cache hit");
                return Ok(value);
            }
            debug!(key, "entry vanished before refresh, producing");
        }

        self.produce(policy, store, key, producer, started).await
    }

    async fn produce<T, F, Fut, E>(
        &self,
        policy: &CachePolicy,
        store: &dyn EntryStore,
        key: &str,
        producer: F,
        started: Instant,
    ) -> Result<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let value = producer().await.map_err(|e| Error::Producer(e.into()))?;
        let latency = elapsed_ms(started);
        let location = policy.location.as_str();
        metrics::histogram!(telemetry::PRODUCER_DURATION_SECONDS, "location" => location)
            .record(latency / 1000.0);

        let data = serde_json::to_value(&value)?;
        let data_size = estimate_size(&data);

        let threshold = policy
            .frequency_threshold()
            .or(self.shared.default_threshold);
        // a key's first call has nothing to decide on
        let decision = self
            .shared
            .recorder
            .decision_inputs(key)
            .map(|inputs| decide(&inputs, threshold, &self.shared.weights));
        let persist = decision.is_some_and(|d| d.persist);

        if persist {
            store.set(key, data, policy.ttl()?).await?;
        }

        self.shared.recorder.record_miss(
            key,
            Miss {
                location: policy.location,
                latency_ms: latency,
                data_size,
                persisted: persist,
                score: decision.and_then(|d| d.recorded_score()),
            },
            now_millis(),
        );
        self.shared.dirty.notify_one();

        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "location" => location).increment(1);
        if let Some(decision) = decision.filter(|d| d.persist) {
            let trigger = if decision.frequency_hit {
                "frequency"
            } else {
                "score"
            };
            metrics::counter!(telemetry::CACHE_PERSISTED_TOTAL,
                "location" => location,
                "trigger" => trigger,
            )
            .increment(1);
        }
        debug!(
            key,
            location,
            latency_ms = latency,
            persist,
            frequency = decision.map(|d| d.frequency),
            score = decision.map(|d| d.score),
            "cache miss"
        );

        Ok(value)
    }

    async fn mutate<T, F, Fut, E>(
        &self,
        policy: &CachePolicy,
        store: &dyn EntryStore,
        target: &str,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        if !self.shared.recorder.has_key(target) {
            return Err(Error::NotFound(target.to_string()));
        }

        let ttl = policy.ttl()?;
        let value = producer().await.map_err(|e| Error::Producer(e.into()))?;
        let data = serde_json::to_value(&value)?;
        let data_size = estimate_size(&data);
        store.set(target, data, ttl).await?;

        self.shared
            .recorder
            .record_mutation(target, policy.location, data_size);
        self.shared.dirty.notify_one();
        metrics::counter!(telemetry::CACHE_MUTATIONS_TOTAL, "location" => policy.location.as_str())
            .increment(1);
        debug!(key = target, location = %policy.location, data_size, "mutated");

        Ok(value)
    }

    /// Call statistics
    pub fn recorder(&self) -> &MetricsRecorder {
        &self.shared.recorder
    }

    /// The local table, if configured
    pub fn local_store(&self) -> Option<&LocalStore> {
        self.shared.local.as_ref()
    }

    /// The remote service client, if configured
    pub fn remote_store(&self) -> Option<&RemoteStore> {
        self.shared.remote.as_ref()
    }

    /// Totals across sweeper ticks, manual sweeps included
    pub fn sweep_stats(&self) -> &SweepStats {
        &self.shared.stats
    }

    /// Sweep now instead of waiting for the next tick
    pub async fn sweep_now(&self) -> SweepReport {
        sweep_once(&self.shared, now_millis()).await
    }

    /// Sweep as if the clock read `now_ms`
    pub async fn sweep_at(&self, now_ms: i64) -> SweepReport {
        sweep_once(&self.shared, now_ms).await
    }

    /// Write pending changes to the local table and the metrics documents
    /// now instead of waiting for the write-behind task
    pub async fn flush(&self) -> Result<()> {
        writer::flush(&self.shared).await
    }

    /// Stop the background tasks, flush, and close the local table.
    ///
    /// Later calls routed to the local table fail with a backend error.
    pub async fn shutdown(&self) -> Result<()> {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.stop().await;
        }
        self.flush().await?;
        if let Some(local) = &self.shared.local {
            local.close()?;
        }
        info!("cacheflow shut down");
        Ok(())
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
