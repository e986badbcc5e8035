//! Metrics Recorder: per-key call statistics and the global rollup
//!
//! All state sits behind one mutex, so every recorder operation is atomic
//! with respect to the others. When a metrics directory is configured,
//! [`MetricsRecorder::flush`] rewrites both documents (temp file, then
//! rename) from one consistent state, outside the mutex:
//!
//! - `localMetricsStorage.json`: key -> per-key record
//! - `globalMetrics.json`: the global rollup
//!
//! Size accounting keeps `totalLocalBytes` equal to the sum of `dataSize`
//! over keys stored locally.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::decision::DecisionInputs;
use crate::error::Result;
use crate::policy::StorageLocation;

/// Per-key metrics document
pub const KEY_METRICS_FILE: &str = "localMetricsStorage.json";

/// Global metrics document
pub const GLOBAL_METRICS_FILE: &str = "globalMetrics.json";

/// Call timestamps retained per key
pub const WINDOW_CAPACITY: usize = 10;

const INSUFFICIENT_DATA: &str = "Insufficient Data";

/// Average interval between a key's calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallSpan {
    /// Only one call on record
    InsufficientData,
    /// Milliseconds
    Millis(f64),
}

impl CallSpan {
    /// The interval, if one has been measured
    pub fn millis(&self) -> Option<f64> {
        match self {
            CallSpan::InsufficientData => None,
            CallSpan::Millis(ms) => Some(*ms),
        }
    }
}

impl Serialize for CallSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CallSpan::InsufficientData => serializer.serialize_str(INSUFFICIENT_DATA),
            CallSpan::Millis(ms) => serializer.serialize_f64(*ms),
        }
    }
}

impl<'de> Deserialize<'de> for CallSpan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SpanVisitor;

        impl<'de> de::Visitor<'de> for SpanVisitor {
            type Value = CallSpan;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a number or \"{}\"", INSUFFICIENT_DATA)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<CallSpan, E> {
                Ok(CallSpan::Millis(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<CallSpan, E> {
                Ok(CallSpan::Millis(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<CallSpan, E> {
                Ok(CallSpan::Millis(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<CallSpan, E> {
                if v == INSUFFICIENT_DATA {
                    Ok(CallSpan::InsufficientData)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(SpanVisitor)
    }
}

/// Statistics for one key; lives as long as the recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetrics {
    /// First call, epoch millis
    pub first_call: i64,
    /// Most recent call timestamps, oldest first
    pub all_calls: VecDeque<i64>,
    /// Calls on record
    pub number_of_calls: u64,
    /// `(latest - oldest retained) / retained`
    pub average_call_span: CallSpan,
    /// Latency of the last uncached call, ms
    pub uncached_call_time: Option<f64>,
    /// Latency of the last cached call, ms
    pub cached_call_time: Option<f64>,
    /// Last known payload size
    pub data_size: u64,
    /// Store the payload was last routed to
    pub stored_location: StorageLocation,
    /// Last adaptive score that triggered persistence
    #[serde(rename = "cacheThreshold")]
    pub cache_score: Option<f64>,
}

impl KeyMetrics {
    fn first(now_ms: i64, location: StorageLocation) -> Self {
        Self {
            first_call: now_ms,
            all_calls: VecDeque::from([now_ms]),
            number_of_calls: 1,
            average_call_span: CallSpan::InsufficientData,
            uncached_call_time: None,
            cached_call_time: None,
            data_size: 0,
            stored_location: location,
            cache_score: None,
        }
    }

    fn observe(&mut self, now_ms: i64) {
        self.all_calls.push_back(now_ms);
        while self.all_calls.len() > WINDOW_CAPACITY {
            self.all_calls.pop_front();
        }
        self.number_of_calls += 1;

        let oldest = self.all_calls.front().copied().unwrap_or(now_ms);
        self.average_call_span =
            CallSpan::Millis((now_ms - oldest) as f64 / self.all_calls.len() as f64);
    }

    fn time_saved(&self) -> Option<f64> {
        Some(self.uncached_call_time? - self.cached_call_time?)
    }
}

/// Process-wide rollup
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    /// Completed dispatcher calls, mutations included
    pub total_requests: u64,
    /// Hits plus persisted misses
    pub cached_count: u64,
    /// Misses that were not persisted
    pub uncached_count: u64,
    pub total_time_saved_ms: f64,
    pub total_cached_elapsed_ms: f64,
    pub total_uncached_elapsed_ms: f64,
    pub average_cached_latency_ms: f64,
    pub average_uncached_latency_ms: f64,
    pub average_calls_per_key: f64,
    /// Always the number of per-key records
    pub unique_key_count: u64,
    /// Sum of `dataSize` over locally stored keys
    pub total_local_bytes: u64,
    pub average_local_bytes_per_key: f64,
    /// As last reported by the remote service
    pub total_remote_bytes: u64,
    /// Mean of the measured per-key call spans
    pub global_average_call_span: f64,
    pub average_cache_score: f64,
}

/// A produced value that missed the cache
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Miss {
    /// Store the call was routed to
    pub location: StorageLocation,
    /// Producer latency, ms
    pub latency_ms: f64,
    /// Size of the produced value
    pub data_size: u64,
    /// The value was written to the store
    pub persisted: bool,
    /// Score to record, if the score trigger fired
    pub score: Option<f64>,
}

/// Point-in-time copy of everything the recorder holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Per-key records by key
    pub keys: BTreeMap<String, KeyMetrics>,
    /// Global rollup
    pub global: GlobalMetrics,
}

type State = MetricsSnapshot;

impl State {
    fn resize(&mut self, key: &str, location: StorageLocation, size: u64) {
        let Some(record) = self.keys.get_mut(key) else {
            return;
        };
        if record.stored_location == StorageLocation::Local {
            self.global.total_local_bytes =
                self.global.total_local_bytes.saturating_sub(record.data_size);
        }
        record.stored_location = location;
        record.data_size = size;
        if location == StorageLocation::Local {
            self.global.total_local_bytes += size;
        }
    }

    fn refresh_aggregates(&mut self) {
        let global = &mut self.global;
        let unique = self.keys.len() as u64;
        global.unique_key_count = unique;
        if unique == 0 {
            return;
        }
        global.average_calls_per_key = global.total_requests as f64 / unique as f64;
        global.average_local_bytes_per_key = global.total_local_bytes as f64 / unique as f64;

        let spans: Vec<f64> = self
            .keys
            .values()
            .filter_map(|record| record.average_call_span.millis())
            .collect();
        global.global_average_call_span = if spans.is_empty() {
            0.0
        } else {
            spans.iter().sum::<f64>() / spans.len() as f64
        };
    }
}

/// Single-writer owner of all call statistics
pub struct MetricsRecorder {
    state: Mutex<State>,
    dir: Option<PathBuf>,
    nominal_threshold: f64,
    /// Bumped under the state mutex on every change
    version: AtomicU64,
    /// Version the documents hold; locked for the duration of a flush
    flushed: Mutex<u64>,
}

impl MetricsRecorder {
    /// Recorder that keeps its documents in memory only
    pub fn in_memory(nominal_threshold: f64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            dir: None,
            nominal_threshold,
            version: AtomicU64::new(0),
            flushed: Mutex::new(0),
        }
    }

    /// Recorder mirrored to `dir`; existing documents are reset
    pub fn open<P: AsRef<Path>>(dir: P, nominal_threshold: f64) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(flowstore::Error::from)?;
        let state = State::default();
        write_documents(dir, &encode(&state)?)?;
        let recorder = Self {
            state: Mutex::new(state),
            dir: Some(dir.to_path_buf()),
            nominal_threshold,
            version: AtomicU64::new(0),
            flushed: Mutex::new(0),
        };
        debug!(path = %dir.display(), "reset metrics documents");
        Ok(recorder)
    }

    /// Directory the documents are mirrored to
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Whether `key` has been observed
    pub fn has_key(&self, key: &str) -> bool {
        self.state.lock().keys.contains_key(key)
    }

    /// Snapshot of `key`'s prior state for the Decision Engine
    pub fn decision_inputs(&self, key: &str) -> Option<DecisionInputs> {
        let state = self.state.lock();
        let record = state.keys.get(key)?;
        Some(DecisionInputs {
            call_count: record.number_of_calls,
            oldest_call_ms: record.all_calls.front().copied().unwrap_or(record.first_call),
            newest_call_ms: record.all_calls.back().copied().unwrap_or(record.first_call),
            window_len: record.all_calls.len(),
            average_call_span: record.average_call_span,
            data_size: record.data_size,
            average_calls_per_key: state.global.average_calls_per_key,
            average_local_bytes_per_key: state.global.average_local_bytes_per_key,
        })
    }

    /// Record a call served from the store.
    ///
    /// `data_size` is only adopted when the key has no record yet (an entry
    /// left over from an earlier run).
    pub fn record_hit(
        &self,
        key: &str,
        location: StorageLocation,
        latency_ms: f64,
        data_size: u64,
        now_ms: i64,
    ) {
        let mut state = self.state.lock();
        match state.keys.get_mut(key) {
            Some(record) => record.observe(now_ms),
            None => {
                state
                    .keys
                    .insert(key.to_string(), KeyMetrics::first(now_ms, location));
                state.resize(key, location, data_size);
            }
        }

        let saved = state.keys.get_mut(key).and_then(|record| {
            record.cached_call_time = Some(latency_ms);
            record.time_saved()
        });

        let global = &mut state.global;
        global.total_requests += 1;
        global.cached_count += 1;
        global.total_cached_elapsed_ms += latency_ms;
        global.average_cached_latency_ms =
            global.total_cached_elapsed_ms / global.cached_count as f64;
        if let Some(saved) = saved {
            global.total_time_saved_ms += saved;
        }
        state.refresh_aggregates();

        self.touch();
    }

    /// Record a call whose value was produced
    pub fn record_miss(&self, key: &str, miss: Miss, now_ms: i64) {
        let mut state = self.state.lock();
        match state.keys.get_mut(key) {
            Some(record) => record.observe(now_ms),
            None => {
                state
                    .keys
                    .insert(key.to_string(), KeyMetrics::first(now_ms, miss.location));
            }
        }
        state.resize(key, miss.location, miss.data_size);

        let prior_requests = state.global.total_requests;
        let saved = state.keys.get_mut(key).and_then(|record| {
            record.uncached_call_time = Some(miss.latency_ms);
            if let Some(score) = miss.score {
                record.cache_score = Some(score);
            }
            record.time_saved()
        });

        let global = &mut state.global;
        if let Some(score) = miss.score {
            global.average_cache_score =
                (self.nominal_threshold + score) / prior_requests.max(1) as f64;
        }
        global.total_requests += 1;
        if miss.persisted {
            global.cached_count += 1;
        } else {
            global.uncached_count += 1;
            global.total_uncached_elapsed_ms += miss.latency_ms;
            global.average_uncached_latency_ms =
                global.total_uncached_elapsed_ms / global.uncached_count as f64;
        }
        if let Some(saved) = saved {
            global.total_time_saved_ms += saved;
        }
        state.refresh_aggregates();

        self.touch();
    }

    /// Record a forced overwrite of `key`; false if the key was never observed
    pub fn record_mutation(&self, key: &str, location: StorageLocation, data_size: u64) -> bool {
        let mut state = self.state.lock();
        if !state.keys.contains_key(key) {
            return false;
        }
        state.resize(key, location, data_size);
        state.global.total_requests += 1;
        state.refresh_aggregates();

        self.touch();
        true
    }

    /// Zero the size of a locally stored key whose entry was swept.
    ///
    /// Returns the bytes subtracted from `totalLocalBytes`.
    pub fn release_local_bytes(&self, key: &str) -> u64 {
        let mut state = self.state.lock();
        let released = match state.keys.get(key) {
            Some(record) if record.stored_location == StorageLocation::Local => record.data_size,
            _ => return 0,
        };
        state.resize(key, StorageLocation::Local, 0);
        state.refresh_aggregates();

        self.touch();
        released
    }

    /// Replace `totalRemoteBytes` with the figure reported by the remote service
    pub fn set_remote_bytes(&self, bytes: u64) {
        let mut state = self.state.lock();
        if state.global.total_remote_bytes == bytes {
            return;
        }
        state.global.total_remote_bytes = bytes;
        self.touch();
    }

    /// Copy of one key's record
    pub fn key_metrics(&self, key: &str) -> Option<KeyMetrics> {
        self.state.lock().keys.get(key).cloned()
    }

    /// Copy of the global rollup
    pub fn global(&self) -> GlobalMetrics {
        self.state.lock().global.clone()
    }

    /// Copy of everything
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().clone()
    }

    /// The per-key and global documents as JSON
    pub fn to_documents(&self) -> Result<(Value, Value)> {
        let state = self.state.lock();
        Ok((
            serde_json::to_value(&state.keys)?,
            serde_json::to_value(&state.global)?,
        ))
    }

    /// Whether the documents on disk lag behind the in-memory state
    pub fn is_dirty(&self) -> bool {
        self.dir.is_some() && self.version.load(Ordering::Acquire) != *self.flushed.lock()
    }

    /// Rewrite both documents if anything changed since the last flush.
    ///
    /// Blocking; returns whether a write happened. A failed write leaves the
    /// recorder dirty for the next flush.
    pub fn flush(&self) -> Result<bool> {
        let Some(dir) = &self.dir else {
            return Ok(false);
        };
        let mut flushed = self.flushed.lock();

        let (version, docs) = {
            let state = self.state.lock();
            let version = self.version.load(Ordering::Acquire);
            if version == *flushed {
                return Ok(false);
            }
            (version, encode(&state)?)
        };

        write_documents(dir, &docs)?;
        *flushed = version;
        debug!(version, "flushed metrics documents");
        Ok(true)
    }

    fn touch(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for MetricsRecorder {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Serialized per-key and global documents
fn encode(state: &State) -> Result<(Vec<u8>, Vec<u8>)> {
    Ok((
        serde_json::to_vec(&state.keys)?,
        serde_json::to_vec(&state.global)?,
    ))
}

fn write_documents(dir: &Path, (keys, global): &(Vec<u8>, Vec<u8>)) -> Result<()> {
    write_file(&dir.join(KEY_METRICS_FILE), keys)?;
    write_file(&dir.join(GLOBAL_METRICS_FILE), global)?;
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let write = || -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(contents)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(flowstore::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOCAL: StorageLocation = StorageLocation::Local;
    const REMOTE: StorageLocation = StorageLocation::Remote;

    fn miss(data_size: u64, persisted: bool) -> Miss {
        Miss {
            location: LOCAL,
            latency_ms: 40.0,
            data_size,
            persisted,
            score: None,
        }
    }

    #[test]
    fn test_first_observation() {
        let recorder = MetricsRecorder::in_memory(1.0);
        assert!(recorder.decision_inputs("a").is_none());

        recorder.record_miss("a", miss(12, false), 1_000);

        let record = recorder.key_metrics("a").unwrap();
        assert_eq!(record.first_call, 1_000);
        assert_eq!(record.all_calls, VecDeque::from([1_000]));
        assert_eq!(record.number_of_calls, 1);
        assert_eq!(record.average_call_span, CallSpan::InsufficientData);
        assert_eq!(record.uncached_call_time, Some(40.0));
        assert_eq!(record.cached_call_time, None);
        assert_eq!(record.data_size, 12);

        let global = recorder.global();
        assert_eq!(global.total_requests, 1);
        assert_eq!(global.uncached_count, 1);
        assert_eq!(global.unique_key_count, 1);
        assert_eq!(global.total_local_bytes, 12);
        assert_eq!(global.average_calls_per_key, 1.0);
        assert_eq!(global.average_uncached_latency_ms, 40.0);
    }

    #[test]
    fn test_decision_inputs_reflect_prior_state() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.record_miss("a", miss(12, false), 1_000);

        let inputs = recorder.decision_inputs("a").unwrap();
        assert_eq!(inputs.call_count, 1);
        assert_eq!(inputs.window_len, 1);
        assert_eq!(inputs.oldest_call_ms, 1_000);
        assert_eq!(inputs.newest_call_ms, 1_000);
        assert_eq!(inputs.data_size, 12);
        assert_eq!(inputs.average_local_bytes_per_key, 12.0);
    }

    #[test]
    fn test_window_bound() {
        let recorder = MetricsRecorder::in_memory(1.0);
        for i in 0..15 {
            recorder.record_miss("a", miss(1, false), 1_000 + i * 10);
        }

        let record = recorder.key_metrics("a").unwrap();
        assert_eq!(record.number_of_calls, 15);
        assert_eq!(record.all_calls.len(), WINDOW_CAPACITY);
        let expected: Vec<i64> = (5..15).map(|i| 1_000 + i * 10).collect();
        assert_eq!(record.all_calls.iter().copied().collect::<Vec<_>>(), expected);
        // (1140 - 1050) / 10
        assert_eq!(record.average_call_span, CallSpan::Millis(9.0));
    }

    #[test]
    fn test_hit_and_time_saved() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.record_miss("a", miss(8, true), 1_000);
        recorder.record_hit("a", LOCAL, 1.5, 0, 1_100);

        let record = recorder.key_metrics("a").unwrap();
        assert_eq!(record.number_of_calls, 2);
        assert_eq!(record.cached_call_time, Some(1.5));
        assert_eq!(record.average_call_span, CallSpan::Millis(50.0));
        assert_eq!(record.data_size, 8);

        let global = recorder.global();
        assert_eq!(global.total_requests, 2);
        assert_eq!(global.cached_count, 2);
        assert_eq!(global.uncached_count, 0);
        assert_eq!(global.total_time_saved_ms, 38.5);
        assert_eq!(global.average_cached_latency_ms, 1.5);
        assert_eq!(global.global_average_call_span, 50.0);
    }

    #[test]
    fn test_hit_without_record() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.record_hit("a", LOCAL, 2.0, 30, 1_000);

        let record = recorder.key_metrics("a").unwrap();
        assert_eq!(record.number_of_calls, 1);
        assert_eq!(record.data_size, 30);
        assert_eq!(recorder.global().total_local_bytes, 30);
    }

    #[test]
    fn test_score_recorded() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.record_miss("a", miss(8, false), 1_000);
        recorder.record_miss("b", miss(8, false), 1_000);
        recorder.record_miss(
            "a",
            Miss {
                score: Some(1.5),
                ..miss(8, true)
            },
            1_010,
        );

        assert_eq!(recorder.key_metrics("a").unwrap().cache_score, Some(1.5));
        assert_eq!(recorder.key_metrics("b").unwrap().cache_score, None);
        // (1 + 1.5) / 2 prior requests
        assert_eq!(recorder.global().average_cache_score, 1.25);
    }

    #[test]
    fn test_size_accounting() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.record_miss("a", miss(10, true), 1_000);
        recorder.record_miss("b", miss(20, true), 1_000);
        recorder.record_miss(
            "c",
            Miss {
                location: REMOTE,
                ..miss(50, true)
            },
            1_000,
        );
        assert_eq!(recorder.global().total_local_bytes, 30);

        assert!(recorder.record_mutation("a", LOCAL, 25));
        assert_eq!(recorder.global().total_local_bytes, 45);
        assert_eq!(recorder.global().total_requests, 4);
        assert_eq!(recorder.key_metrics("a").unwrap().number_of_calls, 1);

        // moving a key out of the local table drops its bytes
        recorder.record_miss(
            "b",
            Miss {
                location: REMOTE,
                ..miss(20, true)
            },
            1_100,
        );
        assert_eq!(recorder.global().total_local_bytes, 25);

        assert_eq!(recorder.release_local_bytes("a"), 25);
        assert_eq!(recorder.release_local_bytes("b"), 0);
        assert_eq!(recorder.release_local_bytes("missing"), 0);
        assert_eq!(recorder.key_metrics("a").unwrap().data_size, 0);
        assert_eq!(recorder.global().total_local_bytes, 0);
        assert_eq!(recorder.global().unique_key_count, 3);
    }

    #[test]
    fn test_mutation_of_unknown_key() {
        let recorder = MetricsRecorder::in_memory(1.0);
        assert!(!recorder.record_mutation("nope", LOCAL, 5));
        assert_eq!(recorder.global(), GlobalMetrics::default());
    }

    #[test]
    fn test_remote_bytes() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.set_remote_bytes(4096);
        assert_eq!(recorder.global().total_remote_bytes, 4096);
    }

    #[test]
    fn test_documents_shape() {
        let recorder = MetricsRecorder::in_memory(1.0);
        recorder.record_miss("hello", miss(10, false), 1_000);

        let (keys, global) = recorder.to_documents().unwrap();
        let record = &keys["hello"];
        assert_eq!(record["firstCall"], 1_000);
        assert_eq!(record["allCalls"], serde_json::json!([1_000]));
        assert_eq!(record["numberOfCalls"], 1);
        assert_eq!(record["averageCallSpan"], "Insufficient Data");
        assert_eq!(record["uncachedCallTime"], 40.0);
        assert!(record["cachedCallTime"].is_null());
        assert_eq!(record["dataSize"], 10);
        assert_eq!(record["storedLocation"], "local");
        assert!(record["cacheThreshold"].is_null());

        assert_eq!(global["totalRequests"], 1);
        assert_eq!(global["uniqueKeyCount"], 1);
        assert_eq!(global["totalLocalBytes"], 10);
    }

    #[test]
    fn test_call_span_json() {
        let span: CallSpan = serde_json::from_str("\"Insufficient Data\"").unwrap();
        assert_eq!(span, CallSpan::InsufficientData);
        let span: CallSpan = serde_json::from_str("12").unwrap();
        assert_eq!(span, CallSpan::Millis(12.0));
        assert!(serde_json::from_str::<CallSpan>("\"soon\"").is_err());
    }

    #[test]
    fn test_documents_on_disk() {
        let dir = TempDir::new().unwrap();
        let recorder = MetricsRecorder::open(dir.path(), 1.0).unwrap();

        let keys = fs::read_to_string(dir.path().join(KEY_METRICS_FILE)).unwrap();
        assert_eq!(keys, "{}");

        recorder.record_miss("a", miss(10, false), 1_000);
        recorder.record_miss("a", miss(10, false), 1_020);
        assert!(recorder.is_dirty());
        assert_eq!(fs::read_to_string(dir.path().join(KEY_METRICS_FILE)).unwrap(), "{}");

        assert!(recorder.flush().unwrap());
        assert!(!recorder.flush().unwrap());
        assert!(!recorder.is_dirty());

        let keys: BTreeMap<String, KeyMetrics> =
            serde_json::from_slice(&fs::read(dir.path().join(KEY_METRICS_FILE)).unwrap()).unwrap();
        assert_eq!(keys["a"], recorder.key_metrics("a").unwrap());

        let global: GlobalMetrics =
            serde_json::from_slice(&fs::read(dir.path().join(GLOBAL_METRICS_FILE)).unwrap())
                .unwrap();
        assert_eq!(global, recorder.global());
    }

    #[test]
    fn test_open_resets_documents() {
        let dir = TempDir::new().unwrap();
        {
            let recorder = MetricsRecorder::open(dir.path(), 1.0).unwrap();
            recorder.record_miss("a", miss(10, false), 1_000);
        }
        let _recorder = MetricsRecorder::open(dir.path(), 1.0).unwrap();
        let keys = fs::read_to_string(dir.path().join(KEY_METRICS_FILE)).unwrap();
        assert_eq!(keys, "{}");
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let dir = TempDir::new().unwrap();
        let metrics_dir = dir.path().join("metrics");
        let recorder = MetricsRecorder::open(&metrics_dir, 1.0).unwrap();
        recorder.record_miss("a", miss(10, false), 1_000);

        fs::remove_dir_all(&metrics_dir).unwrap();
        assert!(recorder.flush().is_err());
        assert!(recorder.is_dirty());

        fs::create_dir_all(&metrics_dir).unwrap();
        assert!(recorder.flush().unwrap());
        let global: GlobalMetrics =
            serde_json::from_slice(&fs::read(metrics_dir.join(GLOBAL_METRICS_FILE)).unwrap())
                .unwrap();
        assert_eq!(global.total_requests, 1);
    }
}
