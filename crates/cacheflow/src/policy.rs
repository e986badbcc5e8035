//! Per-call caching policy

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Which entry store a call is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    /// The durable local table
    Local,
    /// The remote cache service
    #[serde(alias = "redis")]
    Remote,
}

impl StorageLocation {
    /// Label used in documents and telemetry
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageLocation::Local => "local",
            StorageLocation::Remote => "remote",
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one call should be cached.
///
/// ```
/// use cacheflow::CachePolicy;
///
/// let policy = CachePolicy::local().max_age(30.0).threshold(2.0);
/// assert_eq!(policy.frequency_threshold(), Some(0.002));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    /// Store the call is routed to
    pub location: StorageLocation,

    /// TTL in seconds applied on write and on every hit; `None` never expires
    #[serde(default)]
    pub max_age: Option<f64>,

    /// Per-call frequency threshold in calls per second
    #[serde(default)]
    pub threshold: Option<f64>,

    /// Key whose cached value is recomputed and overwritten
    #[serde(default)]
    pub mutate: Option<String>,
}

impl CachePolicy {
    /// Policy routed to the given store with no TTL and no overrides
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            max_age: None,
            threshold: None,
            mutate: None,
        }
    }

    /// Policy routed to the local table
    pub fn local() -> Self {
        Self::new(StorageLocation::Local)
    }

    /// Policy routed to the remote service
    pub fn remote() -> Self {
        Self::new(StorageLocation::Remote)
    }

    /// Set the TTL in seconds
    pub fn max_age(mut self, seconds: f64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Set the frequency threshold in calls per second
    pub fn threshold(mut self, calls_per_second: f64) -> Self {
        self.threshold = Some(calls_per_second);
        self
    }

    /// Turn the call into a mutation of `key`
    pub fn mutate(mut self, key: impl Into<String>) -> Self {
        self.mutate = Some(key.into());
        self
    }

    /// Parse and validate a policy given as JSON.
    ///
    /// Anything but an object (arrays, scalars, null) is rejected.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Configuration(format!(
                "cache policy must be an object, got {}",
                json_kind(value)
            )));
        }
        let policy: CachePolicy = serde_json::from_value(value.clone())
            .map_err(|e| Error::Configuration(format!("invalid cache policy: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check numeric fields
    pub fn validate(&self) -> Result<()> {
        self.ttl()?;
        if let Some(threshold) = self.threshold {
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(Error::Configuration(format!(
                    "threshold must be a positive number, got {}",
                    threshold
                )));
            }
        }
        if self.mutate.as_deref() == Some("") {
            return Err(Error::Configuration("mutate key is empty".to_string()));
        }
        Ok(())
    }

    /// TTL for writes and refreshes.
    ///
    /// Fails unless `maxAge` is a non-negative number of seconds that fits a
    /// [`Duration`].
    pub fn ttl(&self) -> Result<Option<Duration>> {
        self.max_age
            .map(|max_age| {
                Duration::try_from_secs_f64(max_age).map_err(|_| {
                    Error::Configuration(format!(
                        "maxAge must be a non-negative number of seconds, got {}",
                        max_age
                    ))
                })
            })
            .transpose()
    }

    /// The per-call threshold converted to calls per millisecond
    pub fn frequency_threshold(&self) -> Option<f64> {
        self.threshold.map(|t| t / 1000.0)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let policy =
            CachePolicy::from_value(&json!({"location": "local", "maxAge": 10, "threshold": 2}))
                .unwrap();
        assert_eq!(policy.location, StorageLocation::Local);
        assert_eq!(policy.ttl().unwrap(), Some(Duration::from_secs(10)));
        assert_eq!(policy.frequency_threshold(), Some(0.002));
        assert_eq!(policy.mutate, None);
    }

    #[test]
    fn test_redis_alias() {
        let policy = CachePolicy::from_value(&json!({"location": "redis"})).unwrap();
        assert_eq!(policy.location, StorageLocation::Remote);
    }

    #[test]
    fn test_rejects_non_objects() {
        for value in [json!([1, 2]), json!("local"), json!(null), json!(3)] {
            let err = CachePolicy::from_value(&value).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{:?}", value);
        }
    }

    #[test]
    fn test_rejects_bad_fields() {
        for value in [
            json!({}),
            json!({"location": "disk"}),
            json!({"location": "local", "maxAge": -1}),
            json!({"location": "local", "maxAge": 1e20}),
            json!({"location": "local", "threshold": 0}),
            json!({"location": "local", "mutate": ""}),
        ] {
            assert!(CachePolicy::from_value(&value).is_err(), "{:?}", value);
        }
    }

    #[test]
    fn test_builder() {
        let policy = CachePolicy::remote().max_age(1.5).mutate("user");
        assert_eq!(policy.ttl().unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(policy.mutate.as_deref(), Some("user"));
        assert_eq!(policy.location.to_string(), "remote");
    }

    #[test]
    fn test_max_age_out_of_range() {
        let policy = CachePolicy::local().max_age(1e20);
        assert!(matches!(policy.validate(), Err(Error::Configuration(_))));
        assert!(matches!(policy.ttl(), Err(Error::Configuration(_))));

        let policy = CachePolicy::local().max_age(f64::NAN);
        assert!(policy.validate().is_err());

        // large but representable
        let policy = CachePolicy::local().max_age(1e12);
        assert_eq!(policy.ttl().unwrap(), Some(Duration::from_secs(1_000_000_000_000)));
    }
}
