//! Local backend: a durable key -> entry table
//!
//! File layout:
//! - `localStorage.json`: the whole table as `{ key: { data, expire } }`
//!
//! Mutations only touch the in-memory table and bump its version. The file
//! is brought up to date by [`LocalStore::flush`], which writes the table as
//! of one version (temp file + rename) outside the table lock, so the file
//! is always a complete document and a failed write is retried by the next
//! flush. [`LocalStore::close`] flushes one last time.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::entry::{now_millis, CacheEntry, Ttl};
use crate::error::{Error, Result};
use crate::size::estimate_size;
use crate::store::EntryStore;

/// File name of the persisted table inside the store directory
pub const TABLE_FILE: &str = "localStorage.json";

type Table = HashMap<String, CacheEntry, RandomState>;

/// LocalStore keeps entries in memory and mirrors them to disk
pub struct LocalStore {
    /// Path of the table file, `None` for a purely in-memory table
    path: Option<PathBuf>,

    /// key -> entry
    table: RwLock<Table>,

    /// Bumped under the table's write lock on every change
    version: AtomicU64,

    /// Version the file holds; locked for the duration of a flush
    flushed: Mutex<u64>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl LocalStore {
    /// Open or create a table in the given directory
    ///
    /// # Arguments
    /// * `dir` - Directory holding `localStorage.json`
    ///
    /// # Returns
    /// * `Result<LocalStore>` - Store handle with any previously persisted entries
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(TABLE_FILE);

        let table = if path.exists() {
            let raw = fs::read(&path)?;
            let table: Table = serde_json::from_slice(&raw)?;
            debug!(entries = table.len(), path = %path.display(), "loaded local table");
            table
        } else {
            write_file(&path, b"{}")?;
            Table::default()
        };

        Ok(Self {
            path: Some(path),
            table: RwLock::new(table),
            version: AtomicU64::new(0),
            flushed: Mutex::new(0),
            closed: RwLock::new(false),
        })
    }

    /// Create a table that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: RwLock::new(Table::default()),
            version: AtomicU64::new(0),
            flushed: Mutex::new(0),
            closed: RwLock::new(false),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a live entry as of `now_ms`
    pub fn get_at(&self, key: &str, now_ms: i64) -> Result<Option<CacheEntry>> {
        self.ensure_open()?;
        let table = self.table.read();
        Ok(table
            .get(key)
            .filter(|entry| !entry.is_expired_at(now_ms))
            .cloned())
    }

    /// Write an entry stamped at `now_ms`
    pub fn set_at(&self, key: &str, value: Value, ttl: Ttl, now_ms: i64) -> Result<()> {
        self.mutate(|table| {
            table.insert(key.to_string(), CacheEntry::new(value, now_ms, ttl));
            true
        })?;
        Ok(())
    }

    /// Restart the TTL of a live entry as of `now_ms`
    pub fn refresh_ttl_at(&self, key: &str, ttl: Ttl, now_ms: i64) -> Result<bool> {
        self.mutate(|table| match table.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now_ms) => {
                *entry = CacheEntry::new(entry.data.take(), now_ms, ttl);
                true
            }
            _ => false,
        })
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.mutate(|table| table.remove(key).is_some())
    }

    /// Delete `key` only if it is still expired as of `now_ms`.
    ///
    /// The check and the delete happen under one write lock, so an entry
    /// refreshed after a [`scan`](EntryStore::scan) survives.
    pub fn evict_if_expired(&self, key: &str, now_ms: i64) -> Result<Option<CacheEntry>> {
        let mut evicted = None;
        self.mutate(|table| {
            if table.get(key).is_some_and(|entry| entry.is_expired_at(now_ms)) {
                evicted = table.remove(key);
            }
            evicted.is_some()
        })?;
        Ok(evicted)
    }

    /// Get the number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Whether the file lags behind the in-memory table
    pub fn is_dirty(&self) -> bool {
        self.path.is_some() && self.version.load(Ordering::Acquire) != *self.flushed.lock()
    }

    /// Write the table to disk if it changed since the last flush.
    ///
    /// Blocking; returns whether a write happened. After a failed write the
    /// table stays dirty and the next flush tries again.
    pub fn flush(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut flushed = self.flushed.lock();

        let (version, doc) = {
            let table = self.table.read();
            let version = self.version.load(Ordering::Acquire);
            if version == *flushed {
                return Ok(false);
            }
            (version, serde_json::to_vec(&*table)?)
        };

        write_file(path, &doc)?;
        *flushed = version;
        debug!(version, bytes = doc.len(), "flushed local table");
        Ok(true)
    }

    /// Flush the table and refuse further operations
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.write();
        if *closed {
            return Ok(());
        }
        self.flush()?;
        *closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Apply `f` under the write lock; bump the version when it reports a change
    fn mutate(&self, f: impl FnOnce(&mut Table) -> bool) -> Result<bool> {
        // held across the change so close() cannot flush in between
        let closed = self.closed.read();
        if *closed {
            return Err(Error::Closed);
        }
        let mut table = self.table.write();
        let changed = f(&mut table);
        if changed {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        Ok(changed)
    }
}

#[async_trait]
impl EntryStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.get_at(key, now_millis())
    }

    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        self.set_at(key, value, ttl, now_millis())
    }

    async fn refresh_ttl(&self, key: &str, ttl: Ttl) -> Result<bool> {
        self.refresh_ttl_at(key, ttl, now_millis())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.remove(key)
    }

    async fn size_bytes(&self, key: &str) -> Result<u64> {
        self.ensure_open()?;
        Ok(self
            .table
            .read()
            .get(key)
            .map(|entry| estimate_size(&entry.data))
            .unwrap_or(0))
    }

    async fn scan(&self) -> Result<Vec<(String, CacheEntry)>> {
        self.ensure_open()?;
        Ok(self
            .table
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect())
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Atomically replace a file
fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(contents)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const SECOND: Option<Duration> = Some(Duration::from_secs(1));

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join(TABLE_FILE)).unwrap(), "{}");
    }

    #[test]
    fn test_set_and_get() {
        let store = LocalStore::in_memory();
        store.set_at("hello", json!({"n": 1}), SECOND, 1_000).unwrap();

        let entry = store.get_at("hello", 1_500).unwrap().unwrap();
        assert_eq!(entry.data, json!({"n": 1}));
        assert_eq!(entry.expire, Some(2_000));
    }

    #[test]
    fn test_expired_reads_as_absent() {
        let store = LocalStore::in_memory();
        store.set_at("hello", json!(1), SECOND, 1_000).unwrap();

        assert!(store.get_at("hello", 2_001).unwrap().is_none());
        // still in the table until swept
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let store = LocalStore::in_memory();
        store.set_at("hello", json!(1), SECOND, 1_000).unwrap();

        assert!(store.refresh_ttl_at("hello", SECOND, 1_800).unwrap());
        assert_eq!(store.get_at("hello", 2_500).unwrap().unwrap().expire, Some(2_800));
    }

    #[test]
    fn test_refresh_missing_or_expired() {
        let store = LocalStore::in_memory();
        assert!(!store.refresh_ttl_at("nope", SECOND, 0).unwrap());

        store.set_at("hello", json!(1), SECOND, 1_000).unwrap();
        assert!(!store.refresh_ttl_at("hello", SECOND, 5_000).unwrap());
    }

    #[test]
    fn test_evict_if_expired() {
        let store = LocalStore::in_memory();
        store.set_at("old", json!(1), SECOND, 0).unwrap();
        store.set_at("new", json!(2), SECOND, 5_000).unwrap();
        store.set_at("forever", json!(3), None, 0).unwrap();

        assert!(store.evict_if_expired("new", 5_500).unwrap().is_none());
        assert!(store.evict_if_expired("forever", i64::MAX).unwrap().is_none());
        assert_eq!(store.evict_if_expired("old", 5_500).unwrap().unwrap().data, json!(1));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.set_at("a", json!("x"), None, 0).unwrap();
            store.set_at("b", json!([1, 2]), SECOND, 0).unwrap();
            store.close().unwrap();
        }

        {
            let store = LocalStore::open(dir.path()).unwrap();
            assert_eq!(store.len(), 2);
            assert_eq!(store.get_at("a", 10).unwrap().unwrap().data, json!("x"));
        }
    }

    #[test]
    fn test_file_is_valid_json_after_each_flush() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        store.set_at("hello", json!(1), None, 0).unwrap();
        assert!(store.flush().unwrap());
        let doc: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(TABLE_FILE)).unwrap()).unwrap();
        assert_eq!(doc, json!({"hello": {"data": 1, "expire": null}}));

        store.remove("hello").unwrap();
        assert!(store.flush().unwrap());
        let doc: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(TABLE_FILE)).unwrap()).unwrap();
        assert_eq!(doc, json!({}));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TABLE_FILE), "{not json").unwrap();

        assert!(matches!(LocalStore::open(dir.path()), Err(Error::Json(_))));
    }

    #[test]
    fn test_put_after_close() {
        let store = LocalStore::in_memory();
        store.close().unwrap();
        store.close().unwrap(); // Should not error

        let result = store.set_at("k", json!(1), None, 0);
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_entry_store_contract() {
        let store = LocalStore::in_memory();
        store.set("k", json!({"id": 1}), None).await.unwrap();

        assert_eq!(store.size_bytes("k").await.unwrap(), 12);
        assert_eq!(store.size_bytes("missing").await.unwrap(), 0);
        assert_eq!(store.scan().await.unwrap().len(), 1);
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[test]
    fn test_writes_wait_for_flush() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let file = dir.path().join(TABLE_FILE);

        assert!(!store.is_dirty());
        store.set_at("a", json!(1), None, 0).unwrap();
        store.set_at("b", json!(2), None, 0).unwrap();
        assert!(store.is_dirty());
        assert_eq!(fs::read_to_string(&file).unwrap(), "{}");

        // both writes land in one flush
        assert!(store.flush().unwrap());
        assert!(!store.flush().unwrap());
        assert!(!store.is_dirty());
        let doc: Value = serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(doc.as_object().unwrap().len(), 2);

        // a refresh that finds nothing changes nothing
        assert!(!store.refresh_ttl_at("missing", SECOND, 0).unwrap());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let dir = TempDir::new().unwrap();
        let table_dir = dir.path().join("table");
        let store = LocalStore::open(&table_dir).unwrap();
        store.set_at("k", json!("payload"), SECOND, 0).unwrap();
        store.flush().unwrap();

        fs::remove_dir_all(&table_dir).unwrap();

        // the eviction itself never touches the disk
        let evicted = store.evict_if_expired("k", 5_000).unwrap();
        assert_eq!(evicted.unwrap().data, json!("payload"));
        assert!(store.is_empty());

        assert!(matches!(store.flush(), Err(Error::Io(_))));
        assert!(store.is_dirty());

        fs::create_dir_all(&table_dir).unwrap();
        assert!(store.flush().unwrap());
        assert!(!store.is_dirty());
        assert_eq!(fs::read_to_string(table_dir.join(TABLE_FILE)).unwrap(), "{}");
    }

    #[test]
    fn test_close_flushes() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store.set_at("a", json!("x"), None, 0).unwrap();
        store.close().unwrap();

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(TABLE_FILE)).unwrap()).unwrap();
        assert_eq!(doc, json!({"a": {"data": "x", "expire": null}}));
    }

    #[test]
    fn test_in_memory_never_dirty() {
        let store = LocalStore::in_memory();
        store.set_at("a", json!(1), None, 0).unwrap();
        assert!(!store.is_dirty());
        assert!(!store.flush().unwrap());
    }
}
