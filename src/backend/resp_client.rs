use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Backend, BackendError, BackendResult, Lookup, Removal};
use crate::codec::encode_document;
use crate::resp::{RespParser, RespValue};
use crate::ttl::Expiry;

struct Session {
    /// `None` once the session broke; it is never reopened.
    stream: Option<TcpStream>,
    buf: BytesMut,
}

/// A document store reached over RESP.
///
/// Documents are kept as JSON text under `<bucket>:<key>`. All calls share a
/// single session; bulk calls are pipelined so each costs one round trip.
pub struct RespBackend {
    addr: String,
    prefix: Bytes,
    op_timeout: Duration,
    session: Mutex<Session>,
}

impl RespBackend {
    pub async fn connect(
        addr: &str,
        user: &str,
        password: &str,
        bucket: &str,
        op_timeout: Duration,
    ) -> BackendResult<Self> {
        let connect_err = |reason: String| BackendError::Connect {
            addr: addr.to_string(),
            reason,
        };
        let stream = tokio::time::timeout(op_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| connect_err(format!("timed out after {op_timeout:?}")))?
            .map_err(|e| connect_err(e.to_string()))?;
        stream.set_nodelay(true).ok();

        let prefix = if bucket.is_empty() {
            Bytes::new()
        } else {
            Bytes::from(format!("{bucket}:"))
        };
        let backend = RespBackend {
            addr: addr.to_string(),
            prefix,
            op_timeout,
            session: Mutex::new(Session {
                stream: Some(stream),
                buf: BytesMut::with_capacity(8192),
            }),
        };

        if !password.is_empty() {
            let auth = if user.is_empty() {
                RespValue::command([Bytes::from_static(b"AUTH"), Bytes::from(password.to_string())])
            } else {
                RespValue::command([
                    Bytes::from_static(b"AUTH"),
                    Bytes::from(user.to_string()),
                    Bytes::from(password.to_string()),
                ])
            };
            match backend.call(auth).await? {
                RespValue::SimpleString(_) => {}
                RespValue::Error(e) => return Err(BackendError::Auth(e)),
                other => return Err(BackendError::Auth(format!("unexpected reply {other:?}"))),
            }
        }

        match backend.call(RespValue::command([Bytes::from_static(b"PING")])).await? {
            RespValue::SimpleString(_) | RespValue::BulkString(Some(_)) => {}
            RespValue::Error(e) if e.starts_with("NOAUTH") => return Err(BackendError::Auth(e)),
            other => return Err(connect_err(format!("unexpected PING reply {other:?}"))),
        }

        info!("Connected to backend at {addr}");
        Ok(backend)
    }

    fn full_key(&self, key: &[u8]) -> Bytes {
        let mut full = BytesMut::with_capacity(self.prefix.len() + key.len());
        full.put_slice(&self.prefix);
        full.put_slice(key);
        full.freeze()
    }

    async fn call(&self, frame: RespValue) -> BackendResult<RespValue> {
        let mut replies = self.round_trip(vec![frame]).await?;
        replies
            .pop()
            .ok_or_else(|| BackendError::Protocol("missing reply".into()))
    }

    /// Write every frame at once, then read one reply per frame. Any transport
    /// failure or timeout closes the session for good, since replies still in
    /// flight would be paired with the wrong requests.
    async fn round_trip(&self, frames: Vec<RespValue>) -> BackendResult<Vec<RespValue>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = BytesMut::new();
        for frame in &frames {
            frame.write_to(&mut out);
        }

        let mut session = self.session.lock().await;
        let Session { stream, buf } = &mut *session;
        let Some(conn) = stream.as_mut() else {
            return Err(BackendError::Closed);
        };

        let outcome =
            tokio::time::timeout(self.op_timeout, exchange(conn, buf, &out, frames.len())).await;
        match outcome {
            Ok(Ok(replies)) => Ok(replies),
            Ok(Err(e)) => {
                warn!("Backend session to {} failed: {e}", self.addr);
                *stream = None;
                Err(e)
            }
            Err(_) => {
                warn!("Backend call to {} timed out", self.addr);
                *stream = None;
                Err(BackendError::Timeout(self.op_timeout))
            }
        }
    }

    fn set_frame(&self, key: &[u8], doc: &Value, expiry: Expiry) -> RespValue {
        let mut parts = vec![
            Bytes::from_static(b"SET"),
            self.full_key(key),
            encode_document(doc),
        ];
        if let Expiry::At(at) = expiry {
            parts.push(Bytes::from_static(b"EXAT"));
            parts.push(Bytes::from(at.to_string()));
        }
        RespValue::command(parts)
    }

    fn del_frame(&self, key: &[u8]) -> RespValue {
        RespValue::command([Bytes::from_static(b"DEL"), self.full_key(key)])
    }
}

async fn exchange(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    out: &[u8],
    count: usize,
) -> BackendResult<Vec<RespValue>> {
    stream
        .write_all(out)
        .await
        .map_err(|e| BackendError::Io(e.to_string()))?;

    let mut replies = Vec::with_capacity(count);
    while replies.len() < count {
        match RespParser::parse(buf) {
            Ok(Some(value)) => {
                replies.push(value);
                continue;
            }
            Ok(None) => {}
            Err(e) => return Err(BackendError::Protocol(e.to_string())),
        }
        let n = stream
            .read_buf(buf)
            .await
            .map_err(|e| BackendError::Io(e.to_string()))?;
        if n == 0 {
            return Err(BackendError::Closed);
        }
    }
    Ok(replies)
}

fn parse_document(data: &[u8]) -> BackendResult<Value> {
    serde_json::from_slice(data).map_err(|e| BackendError::CorruptDocument(e.to_string()))
}

fn unexpected(reply: RespValue) -> BackendError {
    match reply {
        RespValue::Error(e) => BackendError::Server(e),
        other => BackendError::Protocol(format!("{other:?}")),
    }
}

fn lookup_from(reply: RespValue) -> Lookup<Value> {
    match reply {
        RespValue::BulkString(None) => Lookup::Absent,
        RespValue::BulkString(Some(data)) => match parse_document(&data) {
            Ok(doc) => Lookup::Found(doc),
            Err(e) => Lookup::Failed(e),
        },
        other => Lookup::Failed(unexpected(other)),
    }
}

fn ack_from(reply: RespValue) -> BackendResult<()> {
    match reply {
        RespValue::SimpleString(_) => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn removal_from(reply: RespValue) -> Removal {
    match reply {
        RespValue::Integer(n) if n > 0 => Removal::Removed,
        RespValue::Integer(_) => Removal::NotFound,
        other => Removal::Failed(unexpected(other)),
    }
}

#[async_trait]
impl Backend for RespBackend {
    async fn get(&self, key: &[u8]) -> BackendResult<Option<Value>> {
        let reply = self
            .call(RespValue::command([Bytes::from_static(b"GET"), self.full_key(key)]))
            .await?;
        match lookup_from(reply) {
            Lookup::Found(doc) => Ok(Some(doc)),
            Lookup::Absent => Ok(None),
            Lookup::Failed(e) => Err(e),
        }
    }

    async fn set(&self, key: &[u8], doc: &Value, expiry: Expiry) -> BackendResult<()> {
        ack_from(self.call(self.set_frame(key, doc, expiry)).await?)
    }

    async fn remove(&self, key: &[u8]) -> BackendResult<Removal> {
        match removal_from(self.call(self.del_frame(key)).await?) {
            Removal::Failed(e) => Err(e),
            outcome => Ok(outcome),
        }
    }

    async fn touch(&self, key: &[u8], expiry: Expiry) -> BackendResult<bool> {
        let full = self.full_key(key);
        match expiry {
            Expiry::At(at) => {
                let reply = self
                    .call(RespValue::command([
                        Bytes::from_static(b"EXPIREAT"),
                        full,
                        Bytes::from(at.to_string()),
                    ]))
                    .await?;
                match reply {
                    RespValue::Integer(n) => Ok(n > 0),
                    other => Err(unexpected(other)),
                }
            }
            Expiry::Never => {
                // PERSIST answers 0 both for "missing" and "had no TTL".
                let mut replies = self
                    .round_trip(vec![
                        RespValue::command([Bytes::from_static(b"EXISTS"), full.clone()]),
                        RespValue::command([Bytes::from_static(b"PERSIST"), full]),
                    ])
                    .await?;
                let persisted = replies.pop();
                let exists = replies.pop();
                match (exists, persisted) {
                    (Some(RespValue::Integer(n)), Some(RespValue::Integer(_))) => Ok(n > 0),
                    (Some(RespValue::Error(e)), _) | (_, Some(RespValue::Error(e))) => {
                        Err(BackendError::Server(e))
                    }
                    other => Err(BackendError::Protocol(format!("{other:?}"))),
                }
            }
        }
    }

    async fn get_many(&self, keys: &[Bytes]) -> BackendResult<Vec<Lookup<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut parts = Vec::with_capacity(keys.len() + 1);
        parts.push(Bytes::from_static(b"MGET"));
        parts.extend(keys.iter().map(|k| self.full_key(k)));

        match self.call(RespValue::command(parts)).await? {
            RespValue::Array(Some(items)) if items.len() == keys.len() => {
                Ok(items.into_iter().map(lookup_from).collect())
            }
            RespValue::Array(Some(items)) => Err(BackendError::Protocol(format!(
                "MGET returned {} items for {} keys",
                items.len(),
                keys.len()
            ))),
            other => Err(unexpected(other)),
        }
    }

    async fn set_many(
        &self,
        items: &[(Bytes, Value)],
        expiry: Expiry,
    ) -> BackendResult<Vec<BackendResult<()>>> {
        let frames = items
            .iter()
            .map(|(key, doc)| self.set_frame(key, doc, expiry))
            .collect();
        let replies = self.round_trip(frames).await?;
        debug!("Pipelined {} upserts", replies.len());
        Ok(replies.into_iter().map(ack_from).collect())
    }

    async fn remove_many(&self, keys: &[Bytes]) -> BackendResult<Vec<Removal>> {
        let frames = keys.iter().map(|key| self.del_frame(key)).collect();
        let replies = self.round_trip(frames).await?;
        Ok(replies.into_iter().map(removal_from).collect())
    }
}
