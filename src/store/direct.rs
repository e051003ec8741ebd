use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{KvStore, count_removed, decode_pairs, warn_failed_key};
use crate::backend::{Backend, Lookup};
use crate::codec::{decode_document, encode_document};
use crate::error::ProxyResult;
use crate::ttl::Expiry;

/// Every command goes straight to the backend.
pub struct DirectStore {
    backend: Arc<dyn Backend>,
}

impl DirectStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        DirectStore { backend }
    }
}

#[async_trait]
impl KvStore for DirectStore {
    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Bytes>> {
        Ok(self.backend.get(key).await?.map(|doc| encode_document(&doc)))
    }

    async fn mget(&self, keys: &[Bytes]) -> ProxyResult<Vec<Lookup<Bytes>>> {
        let outcomes = self.backend.get_many(keys).await?;
        Ok(keys
            .iter()
            .zip(outcomes)
            .map(|(key, outcome)| {
                if let Lookup::Failed(e) = &outcome {
                    warn_failed_key("MGET", key, e);
                }
                outcome.map(|doc| encode_document(&doc))
            })
            .collect())
    }

    async fn set(&self, key: Bytes, value: Bytes, expiry: Expiry) -> ProxyResult<()> {
        let doc = decode_document(&key, &value)?;
        self.backend.set(&key, &doc, expiry).await?;
        Ok(())
    }

    async fn mset(&self, pairs: Vec<(Bytes, Bytes)>) -> ProxyResult<()> {
        let docs = decode_pairs(&pairs)?;
        let acks = self.backend.set_many(&docs, Expiry::Never).await?;
        for ((key, _), ack) in docs.iter().zip(&acks) {
            if let Err(e) = ack {
                warn_failed_key("MSET", key, e);
            }
        }
        Ok(())
    }

    async fn del(&self, keys: &[Bytes]) -> ProxyResult<usize> {
        let outcomes = self.backend.remove_many(keys).await?;
        Ok(count_removed(keys, &outcomes))
    }

    async fn expire(&self, key: &[u8], expiry: Expiry) -> ProxyResult<bool> {
        Ok(self.backend.touch(key, expiry).await?)
    }
}
