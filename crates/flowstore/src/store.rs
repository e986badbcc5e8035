//! The entry store contract shared by the local and remote backends

use async_trait::async_trait;
use serde_json::Value;

use crate::entry::{CacheEntry, Ttl};
use crate::error::Result;

/// Key-value storage with TTL.
///
/// Implementations must give read-your-writes within one process. TTLs are
/// relative to the moment of the call.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Fetch a live entry. Entries past their expiry read as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Write (or overwrite) an entry
    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()>;

    /// Restart the TTL of an existing entry.
    ///
    /// Returns `false` when the key no longer exists.
    async fn refresh_ttl(&self, key: &str, ttl: Ttl) -> Result<bool>;

    /// Remove an entry, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Approximate stored size of an entry in bytes (0 when absent)
    async fn size_bytes(&self, key: &str) -> Result<u64>;

    /// Every stored entry, including ones that have expired but not been swept
    async fn scan(&self) -> Result<Vec<(String, CacheEntry)>>;
}
