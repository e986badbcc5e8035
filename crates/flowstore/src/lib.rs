//! # flowstore
//!
//! Entry store for CacheFlow: key -> `{ data, expire }` storage with TTL.
//!
//! ## Backends
//! - **LocalStore**: AHash table behind a single writer, mirrored to a JSON file
//! - **RemoteStore**: Redis-compatible service over RESP2, native TTLs
//!
//! Both implement [`EntryStore`], the get/set/refresh/delete/size/scan
//! contract the cache layer is written against.

#![warn(missing_docs)]

mod entry;
mod error;
mod info;
mod local;
mod remote;
mod resp;
mod size;
mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use entry::{expires_at, now_millis, CacheEntry, Ttl};
pub use error::{Error, Result};
pub use info::{parse_info, InfoReport};
pub use local::{LocalStore, TABLE_FILE};
pub use remote::{RemoteConfig, RemoteStore};
pub use resp::RespValue;
pub use size::estimate_size;
pub use store::EntryStore;
