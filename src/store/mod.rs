//! Store capabilities the dispatcher runs commands against.
//!
//! Two variants sit behind [`KvStore`]: [`DirectStore`] forwards every call to
//! the backend, [`CacheAsideStore`] keeps a [`LocalCache`] in front of it. The
//! variant is chosen once at startup. Values cross this boundary as raw client
//! bytes; they are decoded into documents here, before any backend call.

pub mod cache;
pub mod cache_aside;
pub mod direct;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::backend::{Lookup, Removal};
use crate::codec::decode_document;
use crate::error::ProxyResult;
use crate::ttl::Expiry;

pub use cache::{Cached, FillTicket, LocalCache};
pub use cache_aside::CacheAsideStore;
pub use direct::DirectStore;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Bytes>>;

    /// One outcome per key, in input order.
    async fn mget(&self, keys: &[Bytes]) -> ProxyResult<Vec<Lookup<Bytes>>>;

    async fn set(&self, key: Bytes, value: Bytes, expiry: Expiry) -> ProxyResult<()>;

    /// Upsert every pair without expiry. Values are all validated up front.
    async fn mset(&self, pairs: Vec<(Bytes, Bytes)>) -> ProxyResult<()>;

    /// Number of keys actually removed.
    async fn del(&self, keys: &[Bytes]) -> ProxyResult<usize>;

    /// Number of keys that resolve to a value.
    async fn exists(&self, keys: &[Bytes]) -> ProxyResult<usize> {
        let found = self.mget(keys).await?;
        Ok(found.iter().filter(|l| l.is_found()).count())
    }

    /// Replace a key's expiry. `false` if the key does not exist.
    async fn expire(&self, key: &[u8], expiry: Expiry) -> ProxyResult<bool>;
}

/// Decode every value before anything is written.
fn decode_pairs(pairs: &[(Bytes, Bytes)]) -> ProxyResult<Vec<(Bytes, Value)>> {
    pairs
        .iter()
        .map(|(key, raw)| Ok((key.clone(), decode_document(key, raw)?)))
        .collect()
}

fn warn_failed_key(op: &str, key: &[u8], err: &dyn std::fmt::Display) {
    warn!("{op} failed for key '{}': {err}", String::from_utf8_lossy(key));
}

/// Count removals, logging per-key failures.
fn count_removed(keys: &[Bytes], outcomes: &[Removal]) -> usize {
    keys.iter()
        .zip(outcomes)
        .filter(|(key, outcome)| match outcome {
            Removal::Removed => true,
            Removal::NotFound => false,
            Removal::Failed(e) => {
                warn_failed_key("DEL", key, e);
                false
            }
        })
        .count()
}
