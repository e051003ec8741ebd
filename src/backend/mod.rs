//! Document store adapters.
//!
//! The proxy talks to its backend only through [`Backend`]: single and bulk
//! get/set/remove plus an expiry update ("touch"). "Key not found" never
//! surfaces as an error here; it is reported as [`Lookup::Absent`],
//! [`Removal::NotFound`] or `false`.

pub mod memory;
pub mod resp_client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::config::Config;
use crate::ttl::{Expiry, TtlNormalizer};

pub use memory::{BackendStats, MemoryBackend, StatsSnapshot};
pub use resp_client::RespBackend;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unsupported backend '{0}' (expected memory:// or resp://host:port)")]
    UnsupportedScheme(String),

    #[error("backend I/O error: {0}")]
    Io(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend session is closed")]
    Closed,

    #[error("backend error: {0}")]
    Server(String),

    #[error("unexpected backend reply: {0}")]
    Protocol(String),

    #[error("stored document is not valid JSON: {0}")]
    CorruptDocument(String),

    #[error("{0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Per-key outcome of a bulk read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Absent,
    Failed(BackendError),
}

impl<T> Lookup<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::Absent => Lookup::Absent,
            Lookup::Failed(e) => Lookup::Failed(e),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Per-key outcome of a removal.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    Removed,
    NotFound,
    Failed(BackendError),
}

/// Blocking call surface of the document store. Calls are never retried.
///
/// Bulk calls take ordered keys and return exactly one outcome per key, in
/// the same order. The outer `Result` is the call-level failure; per-key
/// failures are carried inside the returned vector.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &[u8]) -> BackendResult<Option<Value>>;

    async fn set(&self, key: &[u8], doc: &Value, expiry: Expiry) -> BackendResult<()>;

    async fn remove(&self, key: &[u8]) -> BackendResult<Removal>;

    /// Replace the key's expiry. Returns `false` when the key does not exist.
    async fn touch(&self, key: &[u8], expiry: Expiry) -> BackendResult<bool>;

    async fn get_many(&self, keys: &[Bytes]) -> BackendResult<Vec<Lookup<Value>>>;

    async fn set_many(
        &self,
        docs: &[(Bytes, Value)],
        expiry: Expiry,
    ) -> BackendResult<Vec<BackendResult<()>>>;

    async fn remove_many(&self, keys: &[Bytes]) -> BackendResult<Vec<Removal>>;
}

/// Where the configured connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    Memory,
    Resp(String),
}

impl BackendTarget {
    pub fn parse(conn: &str) -> BackendResult<Self> {
        if conn == "memory" || conn.starts_with("memory://") {
            return Ok(BackendTarget::Memory);
        }
        let addr = conn
            .strip_prefix("resp://")
            .or_else(|| conn.strip_prefix("redis://"))
            .ok_or_else(|| BackendError::UnsupportedScheme(conn.to_string()))?;
        let addr = addr.trim_end_matches('/');
        if addr.is_empty() {
            return Err(BackendError::UnsupportedScheme(conn.to_string()));
        }
        if addr.contains(':') {
            Ok(BackendTarget::Resp(addr.to_string()))
        } else {
            Ok(BackendTarget::Resp(format!("{addr}:6379")))
        }
    }
}

/// Open the backend named by `config.backend`, authenticating if credentials
/// are configured. Any error here is fatal to startup.
pub async fn connect(config: &Config, ttl: &TtlNormalizer) -> BackendResult<Arc<dyn Backend>> {
    match BackendTarget::parse(&config.backend)? {
        BackendTarget::Memory => Ok(Arc::new(MemoryBackend::new(ttl.clock().clone()))),
        BackendTarget::Resp(addr) => {
            let backend = RespBackend::connect(
                &addr,
                &config.user,
                &config.password,
                &config.bucket,
                config.op_timeout(),
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
