//! In-process Redis-compatible server for tests
//!
//! Speaks the subset of RESP commands [`RemoteStore`](crate::RemoteStore)
//! issues, keeping keys in memory with millisecond TTLs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::remote::RemoteConfig;
use crate::resp::RespValue;

struct Slot {
    value: Vec<u8>,
    deadline: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Default)]
struct Keyspace {
    slots: Mutex<HashMap<Vec<u8>, Slot>>,
    used_memory: AtomicU64,
}

/// A running test server; stopped when dropped
pub struct TestServer {
    addr: SocketAddr,
    password: Option<String>,
    keyspace: Arc<Keyspace>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Bind an ephemeral port and start accepting connections
    pub async fn start(password: Option<&str>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let keyspace = Arc::new(Keyspace::default());
        let password = password.map(str::to_string);

        let task = {
            let keyspace = Arc::clone(&keyspace);
            let password = password.clone();
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            let keyspace = Arc::clone(&keyspace);
                            let password = password.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, keyspace, password).await {
                                    debug!("client {} closed: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => warn!("accept failed: {}", e),
                    }
                }
            })
        };

        Ok(Self {
            addr,
            password,
            keyspace,
            task,
        })
    }

    /// Client configuration pointing at this server
    pub fn config(&self) -> RemoteConfig {
        RemoteConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            password: self.password.clone(),
        }
    }

    /// Set the `used_memory` figure reported by `INFO`
    pub fn set_used_memory(&self, bytes: u64) {
        self.keyspace.used_memory.store(bytes, Ordering::Relaxed);
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.keyspace
            .slots
            .lock()
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_client(
    mut stream: TcpStream,
    keyspace: Arc<Keyspace>,
    password: Option<String>,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut authenticated = password.is_none();

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }

        loop {
            match RespValue::parse(&mut buffer) {
                Ok(Some(cmd)) => {
                    let response = handle(&keyspace, password.as_deref(), &mut authenticated, cmd);
                    stream.write_all(&response.serialize()).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    let reply = RespValue::Error(format!("ERR {}", e));
                    stream.write_all(&reply.serialize()).await?;
                    buffer.clear();
                    break;
                }
            }
        }
    }
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

fn error(message: &str) -> RespValue {
    RespValue::Error(message.to_string())
}

fn handle(
    keyspace: &Keyspace,
    password: Option<&str>,
    authenticated: &mut bool,
    cmd: RespValue,
) -> RespValue {
    let args: Vec<Vec<u8>> = match cmd {
        RespValue::Array(Some(items)) if !items.is_empty() => items
            .into_iter()
            .filter_map(|item| match item {
                RespValue::BulkString(Some(bytes)) => Some(bytes),
                _ => None,
            })
            .collect(),
        _ => return error("ERR invalid command format"),
    };
    let Some((name, args)) = args.split_first() else {
        return error("ERR invalid command format");
    };
    let command = String::from_utf8_lossy(name).to_uppercase();

    if command == "AUTH" {
        return match (password, args.first()) {
            (Some(expected), Some(given)) if expected.as_bytes() == given.as_slice() => {
                *authenticated = true;
                ok()
            }
            _ => error("WRONGPASS invalid username-password pair"),
        };
    }
    if !*authenticated {
        return error("NOAUTH Authentication required.");
    }

    let now = Instant::now();
    let mut slots = keyspace.slots.lock();
    slots.retain(|_, slot| slot.is_live(now));

    match (command.as_str(), args) {
        ("PING", []) => RespValue::SimpleString("PONG".to_string()),
        ("GET", [key]) => RespValue::BulkString(slots.get(key).map(|slot| slot.value.clone())),
        ("SET", [key, value, rest @ ..]) => {
            let deadline = match rest {
                [] => None,
                [px, ms] if px.eq_ignore_ascii_case(b"PX") => {
                    match String::from_utf8_lossy(ms).parse::<u64>() {
                        Ok(ms) if ms > 0 => Some(now + Duration::from_millis(ms)),
                        _ => return error("ERR invalid expire time in 'set' command"),
                    }
                }
                _ => return error("ERR syntax error"),
            };
            slots.insert(
                key.clone(),
                Slot {
                    value: value.clone(),
                    deadline,
                },
            );
            ok()
        }
        ("PTTL", [key]) => RespValue::Integer(match slots.get(key) {
            None => -2,
            Some(Slot { deadline: None, .. }) => -1,
            Some(Slot {
                deadline: Some(deadline),
                ..
            }) => deadline.saturating_duration_since(now).as_millis() as i64,
        }),
        ("PEXPIRE", [key, ms]) => {
            let Ok(ms) = String::from_utf8_lossy(ms).parse::<u64>() else {
                return error("ERR value is not an integer or out of range");
            };
            match slots.get_mut(key) {
                Some(slot) => {
                    slot.deadline = Some(now + Duration::from_millis(ms));
                    RespValue::Integer(1)
                }
                None => RespValue::Integer(0),
            }
        }
        ("PERSIST", [key]) => match slots.get_mut(key) {
            Some(slot) if slot.deadline.is_some() => {
                slot.deadline = None;
                RespValue::Integer(1)
            }
            _ => RespValue::Integer(0),
        },
        ("EXISTS", keys) => {
            RespValue::Integer(keys.iter().filter(|key| slots.contains_key(*key)).count() as i64)
        }
        ("DEL", keys) => RespValue::Integer(
            keys.iter()
                .filter(|key| slots.remove(*key).is_some())
                .count() as i64,
        ),
        ("STRLEN", [key]) => {
            RespValue::Integer(slots.get(key).map_or(0, |slot| slot.value.len() as i64))
        }
        // one pass: every live key, cursor back to 0
        ("SCAN", [_cursor, ..]) => RespValue::Array(Some(vec![
            RespValue::BulkString(Some(b"0".to_vec())),
            RespValue::Array(Some(
                slots
                    .keys()
                    .map(|key| RespValue::BulkString(Some(key.clone())))
                    .collect(),
            )),
        ])),
        ("INFO", _) => RespValue::BulkString(Some(
            format!(
                "# Memory\r\nused_memory:{}\r\n",
                keyspace.used_memory.load(Ordering::Relaxed)
            )
            .into_bytes(),
        )),
        _ => RespValue::Error(format!("ERR unknown command '{}'", command)),
    }
}
