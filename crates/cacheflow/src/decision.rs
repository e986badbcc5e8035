//! Decision Engine: should a freshly produced value be persisted?
//!
//! Two triggers, either one persists the value:
//!
//! - **frequency**: `callCount / (newest - oldest)` over the retained call
//!   window, compared against the effective threshold in calls per ms
//! - **score**: a blend of relative call volume, average call interval and
//!   payload size, compared against a fraction of a nominal threshold
//!
//! Everything here is a pure function of a [`DecisionInputs`] snapshot taken
//! before the current call is recorded.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::CallSpan;

/// Coefficients of the adaptive score
///
/// ```text
/// score = (calls - avgCalls) / avgCalls
///       + interval_weight / (interval_scale * intervalMs)
///       + size_weight * (size - avgBytes) / size_divisor
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    /// Multiplies the interval in the recency term
    pub interval_scale: f64,
    /// Numerator of the recency term
    pub interval_weight: f64,
    /// Weight of the size term
    pub size_weight: f64,
    /// Bytes per unit of the size term
    pub size_divisor: f64,
    /// Fraction of `nominal_threshold` the score must exceed
    pub threshold_fraction: f64,
    /// Reference score
    pub nominal_threshold: f64,
    /// Interval assumed while a key has only one call on record
    pub fallback_interval_ms: f64,
    /// Interval substituted when the measured one is not positive
    pub clamp_interval_ms: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            interval_scale: 0.004,
            interval_weight: 0.92,
            size_weight: 0.17,
            size_divisor: 300.0,
            threshold_fraction: 0.97,
            nominal_threshold: 1.0,
            fallback_interval_ms: 10_000.0,
            clamp_interval_ms: 5_000.0,
        }
    }
}

impl ScoreWeights {
    /// Score a value must exceed to be persisted
    pub fn cutoff(&self) -> f64 {
        self.threshold_fraction * self.nominal_threshold
    }

    /// Reject coefficients that would divide by zero or yield NaN
    pub fn validate(&self) -> Result<()> {
        let all = [
            ("intervalScale", self.interval_scale),
            ("intervalWeight", self.interval_weight),
            ("sizeWeight", self.size_weight),
            ("sizeDivisor", self.size_divisor),
            ("thresholdFraction", self.threshold_fraction),
            ("nominalThreshold", self.nominal_threshold),
            ("fallbackIntervalMs", self.fallback_interval_ms),
            ("clampIntervalMs", self.clamp_interval_ms),
        ];
        if let Some((name, value)) = all.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Configuration(format!(
                "score.{} must be finite, got {}",
                name, value
            )));
        }

        let positive = [
            ("intervalScale", self.interval_scale),
            ("sizeDivisor", self.size_divisor),
            ("fallbackIntervalMs", self.fallback_interval_ms),
            ("clampIntervalMs", self.clamp_interval_ms),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| *v <= 0.0) {
            return Err(Error::Configuration(format!(
                "score.{} must be positive, got {}",
                name, value
            )));
        }
        Ok(())
    }
}

/// Prior state of one key and the global rollup
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionInputs {
    /// Calls on record for the key
    pub call_count: u64,
    /// Oldest retained call timestamp, epoch millis
    pub oldest_call_ms: i64,
    /// Newest retained call timestamp, epoch millis
    pub newest_call_ms: i64,
    /// Number of retained call timestamps
    pub window_len: usize,
    /// Average interval between the key's calls
    pub average_call_span: CallSpan,
    /// Last known payload size of the key
    pub data_size: u64,
    /// Global average calls per key
    pub average_calls_per_key: f64,
    /// Global average local bytes per key
    pub average_local_bytes_per_key: f64,
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Persist the produced value
    pub persist: bool,
    /// Calls per millisecond over the window
    pub frequency: f64,
    /// The frequency trigger fired
    pub frequency_hit: bool,
    /// Adaptive score
    pub score: f64,
    /// The score trigger fired
    pub score_hit: bool,
}

impl Decision {
    /// The score to record on the key, present only when the score trigger fired
    pub fn recorded_score(&self) -> Option<f64> {
        self.score_hit.then_some(self.score)
    }
}

/// Calls per millisecond over the retained window.
///
/// A single-entry window has frequency 0; a window whose calls all share one
/// millisecond has infinite frequency.
pub fn frequency(inputs: &DecisionInputs) -> f64 {
    if inputs.window_len <= 1 {
        return 0.0;
    }
    let span = inputs.newest_call_ms - inputs.oldest_call_ms;
    if span <= 0 {
        return f64::INFINITY;
    }
    inputs.call_count as f64 / span as f64
}

/// Adaptive score of the key
pub fn score(inputs: &DecisionInputs, weights: &ScoreWeights) -> f64 {
    let average_calls = inputs.average_calls_per_key;
    let call_rate = if average_calls > 0.0 {
        (inputs.call_count as f64 - average_calls) / average_calls
    } else {
        0.0
    };

    let mut interval = inputs
        .average_call_span
        .millis()
        .unwrap_or(weights.fallback_interval_ms);
    if interval <= 0.0 {
        interval = weights.clamp_interval_ms;
    }
    let recency = weights.interval_weight / (weights.interval_scale * interval);

    let size = (inputs.data_size as f64 - inputs.average_local_bytes_per_key) / weights.size_divisor;

    call_rate + recency + weights.size_weight * size
}

/// Combine both triggers.
///
/// `threshold` is the effective frequency threshold in calls per ms; with no
/// threshold the frequency trigger never fires.
pub fn decide(inputs: &DecisionInputs, threshold: Option<f64>, weights: &ScoreWeights) -> Decision {
    let frequency = frequency(inputs);
    let frequency_hit = threshold.map_or(false, |t| frequency >= t);
    let score = score(inputs, weights);
    let score_hit = score > weights.cutoff();

    Decision {
        persist: frequency_hit || score_hit,
        frequency,
        frequency_hit,
        score,
        score_hit,
    }
}
