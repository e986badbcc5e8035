//! Remote backend: a Redis-compatible cache service spoken to over RESP
//!
//! A single connection is shared behind an async mutex; requests are
//! strictly request/response, pipelined where one operation needs several
//! commands. A failed or abandoned request drops the connection and the
//! next request dials again.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{now_millis, CacheEntry, Ttl};
use crate::error::{Error, Result};
use crate::info::parse_info;
use crate::resp::RespValue;
use crate::store::EntryStore;

/// Keys fetched per `SCAN` round trip
const SCAN_COUNT: &str = "100";

/// Connection settings for the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Sent with `AUTH` right after connecting
    pub password: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
        }
    }
}

impl RemoteConfig {
    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    async fn open(config: &RemoteConfig) -> Result<Self> {
        let addr = config.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::Connection {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        };

        if let Some(password) = &config.password {
            conn.request(&[RespValue::command(&["AUTH", password.as_str()])])
                .await?
                .remove(0)
                .into_status()?;
        }

        debug!("connected to {}", addr);
        Ok(conn)
    }

    /// Send `commands` in one write and read one reply per command
    async fn request(&mut self, commands: &[RespValue]) -> Result<Vec<RespValue>> {
        let mut out = Vec::new();
        for cmd in commands {
            out.extend_from_slice(&cmd.serialize());
        }
        self.stream.write_all(&out).await?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            match RespValue::parse(&mut self.buffer)? {
                Some(reply) => replies.push(reply),
                None => {
                    let n = self.stream.read_buf(&mut self.buffer).await?;
                    if n == 0 {
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed by remote",
                        )));
                    }
                }
            }
        }
        Ok(replies)
    }
}

/// Entry store backed by a Redis-compatible service with native TTLs
pub struct RemoteStore {
    config: RemoteConfig,
    conn: Mutex<Option<Connection>>,
}

impl RemoteStore {
    /// Connect, authenticate and `PING` the service
    ///
    /// # Returns
    /// * `Result<RemoteStore>` - Fails if the service is unreachable or rejects the password
    pub async fn connect(config: RemoteConfig) -> Result<Self> {
        let conn = Connection::open(&config).await?;
        let store = Self {
            config,
            conn: Mutex::new(Some(conn)),
        };
        store.ping().await?;
        info!("remote store ready at {}", store.config.addr());
        Ok(store)
    }

    /// Connection settings
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Round-trip a `PING`
    pub async fn ping(&self) -> Result<()> {
        let reply = self.execute(RespValue::command(&["PING"])).await?;
        match reply.into_status()?.as_str() {
            "PONG" => Ok(()),
            other => Err(Error::Protocol(format!("unexpected PING reply {:?}", other))),
        }
    }

    /// Memory reported by `INFO memory` (`used_memory`)
    pub async fn used_memory(&self) -> Result<u64> {
        let body = self
            .execute(RespValue::command(&["INFO", "memory"]))
            .await?
            .into_bulk()?
            .unwrap_or_default();
        let report = parse_info(&String::from_utf8_lossy(&body));
        report
            .used_memory()
            .ok_or_else(|| Error::Protocol("INFO reply has no used_memory field".to_string()))
    }

    /// Run one command
    pub async fn execute(&self, command: RespValue) -> Result<RespValue> {
        let mut replies = self.pipeline(vec![command]).await?;
        replies
            .pop()
            .ok_or_else(|| Error::Protocol("missing reply".to_string()))
    }

    /// Run several commands in one round trip.
    ///
    /// The connection is taken out of its slot for the duration of the
    /// request and only put back once every reply has been read, so a
    /// request dropped halfway never leaves stale replies for the next one.
    pub async fn pipeline(&self, commands: Vec<RespValue>) -> Result<Vec<RespValue>> {
        let mut guard = self.conn.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => Connection::open(&self.config).await?,
        };

        match conn.request(&commands).await {
            Ok(replies) => {
                *guard = Some(conn);
                Ok(replies)
            }
            Err(e) => {
                warn!("dropping connection to {}: {}", self.config.addr(), e);
                Err(e)
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = now_millis();
        let mut replies = self
            .pipeline(vec![
                RespValue::command(&["GET", key]),
                RespValue::command(&["PTTL", key]),
            ])
            .await?
            .into_iter();

        let (Some(data), Some(pttl)) = (replies.next(), replies.next()) else {
            return Err(Error::Protocol("missing reply".to_string()));
        };
        let Some(raw) = data.into_bulk()? else {
            return Ok(None);
        };

        let expire = match pttl.into_integer()? {
            // key vanished between the two commands
            -2 => return Ok(None),
            ms if ms < 0 => None,
            ms => Some(now + ms),
        };
        Ok(Some(CacheEntry {
            data: serde_json::from_slice(&raw)?,
            expire,
        }))
    }
}

/// TTL in whole milliseconds; the service rejects a zero expiry
fn ttl_millis(ttl: Duration) -> String {
    ttl.as_millis().max(1).to_string()
}

#[async_trait]
impl EntryStore for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.fetch(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let json = serde_json::to_vec(&value)?;
        let ttl_ms = ttl.map(ttl_millis);

        let mut args: Vec<&[u8]> = Vec::with_capacity(5);
        args.push(b"SET");
        args.push(key.as_bytes());
        args.push(&json);
        if let Some(ttl_ms) = &ttl_ms {
            args.push(b"PX");
            args.push(ttl_ms.as_bytes());
        }
        let command = RespValue::command(args.as_slice());
        self.execute(command).await?.into_status()?;
        Ok(())
    }

    async fn refresh_ttl(&self, key: &str, ttl: Ttl) -> Result<bool> {
        match ttl {
            Some(ttl) => {
                let reply = self
                    .execute(RespValue::command(&["PEXPIRE", key, ttl_millis(ttl).as_str()]))
                    .await?;
                Ok(reply.into_integer()? == 1)
            }
            None => {
                let mut replies = self
                    .pipeline(vec![
                        RespValue::command(&["EXISTS", key]),
                        RespValue::command(&["PERSIST", key]),
                    ])
                    .await?;
                replies.truncate(1);
                match replies.pop() {
                    Some(exists) => Ok(exists.into_integer()? > 0),
                    None => Err(Error::Protocol("missing reply".to_string())),
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let reply = self.execute(RespValue::command(&["DEL", key])).await?;
        Ok(reply.into_integer()? > 0)
    }

    async fn size_bytes(&self, key: &str) -> Result<u64> {
        let reply = self.execute(RespValue::command(&["STRLEN", key])).await?;
        Ok(reply.into_integer()?.max(0) as u64)
    }

    async fn scan(&self) -> Result<Vec<(String, CacheEntry)>> {
        let mut keys = Vec::new();
        let mut cursor = "0".to_string();

        loop {
            let reply = self
                .execute(RespValue::command(&["SCAN", cursor.as_str(), "COUNT", SCAN_COUNT]))
                .await?
                .into_result()?;
            let (next, batch) = parse_scan_reply(reply)?;
            keys.extend(batch);
            if next == "0" {
                break;
            }
            cursor = next;
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.fetch(&key).await? {
                entries.push((key, entry));
            }
        }
        Ok(entries)
    }
}

/// `[cursor, [key, ...]]`
fn parse_scan_reply(reply: RespValue) -> Result<(String, Vec<String>)> {
    let mut parts = match reply {
        RespValue::Array(Some(parts)) => parts,
        other => return Err(Error::Protocol(format!("malformed SCAN reply {:?}", other))),
    };
    if parts.len() != 2 {
        return Err(Error::Protocol("malformed SCAN reply".to_string()));
    }

    let keys = match parts.pop() {
        Some(RespValue::Array(Some(items))) => items
            .into_iter()
            .filter_map(|item| item.into_bulk().ok().flatten())
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .collect(),
        _ => Vec::new(),
    };
    let cursor = parts
        .pop()
        .map(RespValue::into_bulk)
        .transpose()?
        .flatten()
        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
        .ok_or_else(|| Error::Protocol("SCAN reply has no cursor".to_string()))?;

    Ok((cursor, keys))
}
