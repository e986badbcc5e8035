//! Cache entry and TTL arithmetic

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Time-to-live for a write or refresh. `None` means the entry never expires.
pub type Ttl = Option<Duration>;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a TTL starting at `now_ms`
pub fn expires_at(now_ms: i64, ttl: Ttl) -> Option<i64> {
    ttl.map(|ttl| now_ms.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64))
}

/// A stored value with its absolute expiry.
///
/// Serializes as `{ "data": ..., "expire": epoch-millis | null }`, the shape
/// of one row of the local table document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached payload
    pub data: Value,
    /// Epoch millis after which the entry is stale; `None` never expires
    pub expire: Option<i64>,
}

impl CacheEntry {
    /// Create an entry written at `now_ms` with the given TTL
    pub fn new(data: Value, now_ms: i64, ttl: Ttl) -> Self {
        Self {
            data,
            expire: expires_at(now_ms, ttl),
        }
    }

    /// An entry is expired once `now_ms` is strictly past its expiry
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expire.is_some_and(|expire| now_ms > expire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new(json!(1), 1_000, Some(Duration::from_secs(2)));
        assert_eq!(entry.expire, Some(3_000));
        assert!(!entry.is_expired_at(3_000));
        assert!(entry.is_expired_at(3_001));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = CacheEntry::new(json!("x"), 1_000, None);
        assert_eq!(entry.expire, None);
        assert!(!entry.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_document_shape() {
        let entry = CacheEntry::new(json!({"a": 1}), 0, None);
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"data":{"a":1},"expire":null}"#
        );
    }
}
