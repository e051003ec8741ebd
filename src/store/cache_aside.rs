use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::cache::{Cached, LocalCache};
use super::{KvStore, count_removed, decode_pairs, warn_failed_key};
use crate::backend::{Backend, Lookup, Removal};
use crate::codec::{decode_document, encode_document};
use crate::error::ProxyResult;
use crate::ttl::Expiry;

/// Look-aside cache in front of the backend.
///
/// Reads are answered from the cache when it holds a value or a miss marker
/// and go to the backend otherwise. Writes always go to the backend first; the
/// cache changes only after the backend acknowledged them. A read result is
/// cached only if no write to the same key landed while the read was in
/// flight.
pub struct CacheAsideStore {
    backend: Arc<dyn Backend>,
    cache: Arc<LocalCache>,
}

impl CacheAsideStore {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<LocalCache>) -> Self {
        CacheAsideStore { backend, cache }
    }
}

#[async_trait]
impl KvStore for CacheAsideStore {
    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Bytes>> {
        if let Some(cached) = self.cache.lookup(key).await {
            return Ok(cached.into_value());
        }

        let key = Bytes::copy_from_slice(key);
        let ticket = self.cache.begin_fill();
        let value = self.backend.get(&key).await?.map(|doc| encode_document(&doc));
        let cached = match &value {
            Some(v) => Cached::Value(v.clone()),
            None => Cached::Missing,
        };
        if self.cache.fill(ticket, vec![(key, cached)]).await == 0 {
            debug!("GET result not cached, key was written during the read");
        }
        Ok(value)
    }

    async fn mget(&self, keys: &[Bytes]) -> ProxyResult<Vec<Lookup<Bytes>>> {
        let cached = self.cache.lookup_many(keys).await;

        let mut results = Vec::with_capacity(keys.len());
        let mut unresolved = Vec::new();
        let mut positions = Vec::new();
        for (i, (key, hit)) in keys.iter().zip(cached).enumerate() {
            match hit {
                Some(Cached::Value(v)) => results.push(Lookup::Found(v)),
                Some(Cached::Missing) => results.push(Lookup::Absent),
                None => {
                    results.push(Lookup::Absent);
                    unresolved.push(key.clone());
                    positions.push(i);
                }
            }
        }

        if unresolved.is_empty() {
            return Ok(results);
        }
        debug!(
            "MGET resolved {} of {} keys from cache",
            keys.len() - unresolved.len(),
            keys.len()
        );

        let ticket = self.cache.begin_fill();
        let fetched = self.backend.get_many(&unresolved).await?;
        let mut to_cache = Vec::with_capacity(unresolved.len());
        for ((key, pos), outcome) in unresolved.into_iter().zip(positions).zip(fetched) {
            results[pos] = match outcome {
                Lookup::Found(doc) => {
                    let value = encode_document(&doc);
                    to_cache.push((key, Cached::Value(value.clone())));
                    Lookup::Found(value)
                }
                Lookup::Absent => {
                    to_cache.push((key, Cached::Missing));
                    Lookup::Absent
                }
                Lookup::Failed(e) => {
                    warn_failed_key("MGET", &key, &e);
                    Lookup::Failed(e)
                }
            };
        }
        self.cache.fill(ticket, to_cache).await;
        Ok(results)
    }

    async fn set(&self, key: Bytes, value: Bytes, expiry: Expiry) -> ProxyResult<()> {
        let doc = decode_document(&key, &value)?;
        self.backend.set(&key, &doc, expiry).await?;
        self.cache.store_value(key, value).await;
        Ok(())
    }

    async fn mset(&self, pairs: Vec<(Bytes, Bytes)>) -> ProxyResult<()> {
        let docs = decode_pairs(&pairs)?;
        let acks = self.backend.set_many(&docs, Expiry::Never).await?;

        let mut to_cache = Vec::with_capacity(pairs.len());
        let mut stale = Vec::new();
        for ((key, value), ack) in pairs.into_iter().zip(acks) {
            match ack {
                Ok(()) => to_cache.push((key, Cached::Value(value))),
                Err(e) => {
                    warn_failed_key("MSET", &key, &e);
                    stale.push(key);
                }
            }
        }
        self.cache.store_all(to_cache).await;
        self.cache.invalidate_all(&stale).await;
        Ok(())
    }

    async fn del(&self, keys: &[Bytes]) -> ProxyResult<usize> {
        let outcomes = self.backend.remove_many(keys).await?;
        let settled = keys
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| !matches!(outcome, Removal::Failed(_)))
            .map(|(key, _)| key);
        self.cache.invalidate_all(settled).await;
        Ok(count_removed(keys, &outcomes))
    }

    async fn expire(&self, key: &[u8], expiry: Expiry) -> ProxyResult<bool> {
        Ok(self.backend.touch(key, expiry).await?)
    }
}
