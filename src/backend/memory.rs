use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Backend, BackendError, BackendResult, Lookup, Removal};
use crate::ttl::{Clock, Expiry};

#[derive(Debug, Clone)]
struct StoredDoc {
    doc: Value,
    expiry: Expiry,
}

/// Round trips made against a backend, one per call regardless of batch size.
#[derive(Debug, Default)]
pub struct BackendStats {
    gets: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
    touches: AtomicU64,
    bulk_gets: AtomicU64,
    bulk_sets: AtomicU64,
    bulk_removes: AtomicU64,
    /// Total keys requested across all bulk gets.
    bulk_get_keys: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub gets: u64,
    pub sets: u64,
    pub removes: u64,
    pub touches: u64,
    pub bulk_gets: u64,
    pub bulk_sets: u64,
    pub bulk_removes: u64,
    pub bulk_get_keys: u64,
}

impl StatsSnapshot {
    /// Every call that reads documents.
    pub fn reads(&self) -> u64 {
        self.gets + self.bulk_gets
    }

    /// Every call that writes documents or expiries.
    pub fn writes(&self) -> u64 {
        self.sets + self.bulk_sets + self.removes + self.bulk_removes + self.touches
    }
}

impl BackendStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            gets: load(&self.gets),
            sets: load(&self.sets),
            removes: load(&self.removes),
            touches: load(&self.touches),
            bulk_gets: load(&self.bulk_gets),
            bulk_sets: load(&self.bulk_sets),
            bulk_removes: load(&self.bulk_removes),
            bulk_get_keys: load(&self.bulk_get_keys),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// An in-process document store.
///
/// Serves `memory://` deployments and tests. Documents expire against the
/// injected clock. Individual keys can be made to fail, and the whole store
/// can be taken down, to exercise error paths.
#[derive(Debug)]
pub struct MemoryBackend {
    docs: RwLock<HashMap<Bytes, StoredDoc>>,
    clock: Arc<dyn Clock>,
    stats: BackendStats,
    faulty_keys: RwLock<HashSet<Bytes>>,
    down: AtomicBool,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemoryBackend {
            docs: RwLock::new(HashMap::new()),
            clock,
            stats: BackendStats::default(),
            faulty_keys: RwLock::new(HashSet::new()),
            down: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Make every operation on `key` fail until [`MemoryBackend::heal`].
    pub async fn inject_fault(&self, key: impl Into<Bytes>) {
        self.faulty_keys.write().await.insert(key.into());
    }

    pub async fn heal(&self) {
        self.faulty_keys.write().await.clear();
        self.down.store(false, Ordering::SeqCst);
    }

    /// Fail every call at the call level.
    pub fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Stored document and expiry, ignoring faults and without counting.
    pub async fn peek(&self, key: &[u8]) -> Option<(Value, Expiry)> {
        let now = self.clock.unix_seconds();
        self.docs
            .read()
            .await
            .get(key)
            .filter(|d| !d.expiry.has_passed(now))
            .map(|d| (d.doc.clone(), d.expiry))
    }

    fn check_up(&self) -> BackendResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("backend unavailable".into()))
        } else {
            Ok(())
        }
    }

    async fn check_key(&self, key: &[u8]) -> BackendResult<()> {
        if self.faulty_keys.read().await.contains(key) {
            Err(BackendError::Unavailable(format!(
                "temporary failure for key '{}'",
                String::from_utf8_lossy(key)
            )))
        } else {
            Ok(())
        }
    }

    fn live<'a>(
        docs: &'a HashMap<Bytes, StoredDoc>,
        key: &[u8],
        now: u64,
    ) -> Option<&'a StoredDoc> {
        docs.get(key).filter(|d| !d.expiry.has_passed(now))
    }

    fn remove_locked(docs: &mut HashMap<Bytes, StoredDoc>, key: &[u8], now: u64) -> Removal {
        match docs.remove(key) {
            Some(d) if !d.expiry.has_passed(now) => Removal::Removed,
            _ => Removal::NotFound,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> BackendResult<Option<Value>> {
        bump(&self.stats.gets);
        self.check_up()?;
        self.check_key(key).await?;
        let now = self.clock.unix_seconds();
        let docs = self.docs.read().await;
        Ok(Self::live(&docs, key, now).map(|d| d.doc.clone()))
    }

    async fn set(&self, key: &[u8], doc: &Value, expiry: Expiry) -> BackendResult<()> {
        bump(&self.stats.sets);
        self.check_up()?;
        self.check_key(key).await?;
        self.docs.write().await.insert(
            Bytes::copy_from_slice(key),
            StoredDoc {
                doc: doc.clone(),
                expiry,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> BackendResult<Removal> {
        bump(&self.stats.removes);
        self.check_up()?;
        self.check_key(key).await?;
        let now = self.clock.unix_seconds();
        let mut docs = self.docs.write().await;
        Ok(Self::remove_locked(&mut docs, key, now))
    }

    async fn touch(&self, key: &[u8], expiry: Expiry) -> BackendResult<bool> {
        bump(&self.stats.touches);
        self.check_up()?;
        self.check_key(key).await?;
        let now = self.clock.unix_seconds();
        let mut docs = self.docs.write().await;
        match docs.get_mut(key) {
            Some(d) if !d.expiry.has_passed(now) => {
                d.expiry = expiry;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_many(&self, keys: &[Bytes]) -> BackendResult<Vec<Lookup<Value>>> {
        bump(&self.stats.bulk_gets);
        self.stats
            .bulk_get_keys
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        self.check_up()?;
        let now = self.clock.unix_seconds();
        let faulty = self.faulty_keys.read().await;
        let docs = self.docs.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                if faulty.contains(key) {
                    return Lookup::Failed(BackendError::Unavailable(format!(
                        "temporary failure for key '{}'",
                        String::from_utf8_lossy(key)
                    )));
                }
                match Self::live(&docs, key, now) {
                    Some(d) => Lookup::Found(d.doc.clone()),
                    None => Lookup::Absent,
                }
            })
            .collect())
    }

    async fn set_many(
        &self,
        items: &[(Bytes, Value)],
        expiry: Expiry,
    ) -> BackendResult<Vec<BackendResult<()>>> {
        bump(&self.stats.bulk_sets);
        self.check_up()?;
        let faulty = self.faulty_keys.read().await;
        let mut docs = self.docs.write().await;
        Ok(items
            .iter()
            .map(|(key, doc)| {
                if faulty.contains(key) {
                    return Err(BackendError::Unavailable(format!(
                        "temporary failure for key '{}'",
                        String::from_utf8_lossy(key)
                    )));
                }
                docs.insert(
                    key.clone(),
                    StoredDoc {
                        doc: doc.clone(),
                        expiry,
                    },
                );
                Ok(())
            })
            .collect())
    }

    async fn remove_many(&self, keys: &[Bytes]) -> BackendResult<Vec<Removal>> {
        bump(&self.stats.bulk_removes);
        self.check_up()?;
        let now = self.clock.unix_seconds();
        let faulty = self.faulty_keys.read().await;
        let mut docs = self.docs.write().await;
        Ok(keys
            .iter()
            .map(|key| {
                if faulty.contains(key) {
                    Removal::Failed(BackendError::Unavailable(format!(
                        "temporary failure for key '{}'",
                        String::from_utf8_lossy(key)
                    )))
                } else {
                    Self::remove_locked(&mut docs, key, now)
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttl::ManualClock;
    use serde_json::json;

    fn backend() -> (Arc<ManualClock>, MemoryBackend) {
        let clock = Arc::new(ManualClock::new(1_000));
        (clock.clone(), MemoryBackend::new(clock))
    }

    #[tokio::test]
    async fn test_single_key_operations() {
        let (_, b) = backend();
        assert_eq!(b.get(b"k").await.unwrap(), None);
        b.set(b"k", &json!({"a": 1}), Expiry::Never).await.unwrap();
        assert_eq!(b.get(b"k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(b.remove(b"k").await.unwrap(), Removal::Removed);
        assert_eq!(b.remove(b"k").await.unwrap(), Removal::NotFound);
        assert_eq!(b.stats().gets, 2);
        assert_eq!(b.stats().removes, 2);
    }

    #[tokio::test]
    async fn test_documents_expire_with_clock() {
        let (clock, b) = backend();
        b.set(b"k", &json!(1), Expiry::At(1_010)).await.unwrap();
        assert!(b.get(b"k").await.unwrap().is_some());
        clock.set(1_010);
        assert_eq!(b.get(b"k").await.unwrap(), None);
        assert!(!b.touch(b"k", Expiry::Never).await.unwrap());
        assert_eq!(b.remove(b"k").await.unwrap(), Removal::NotFound);
    }

    #[tokio::test]
    async fn test_touch_replaces_expiry() {
        let (_, b) = backend();
        b.set(b"k", &json!(1), Expiry::Never).await.unwrap();
        assert!(b.touch(b"k", Expiry::At(2_000)).await.unwrap());
        assert_eq!(b.peek(b"k").await, Some((json!(1), Expiry::At(2_000))));
        assert!(!b.touch(b"missing", Expiry::At(2_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_outcomes_are_ordered_and_tagged() {
        let (_, b) = backend();
        b.set(b"a", &json!("A"), Expiry::Never).await.unwrap();
        b.set(b"c", &json!("C"), Expiry::Never).await.unwrap();
        b.inject_fault(Bytes::from_static(b"c")).await;

        let keys = [
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ];
        let got = b.get_many(&keys).await.unwrap();
        assert_eq!(got[0], Lookup::Found(json!("A")));
        assert_eq!(got[1], Lookup::Absent);
        assert!(matches!(got[2], Lookup::Failed(_)));

        let removed = b.remove_many(&keys).await.unwrap();
        assert_eq!(removed[0], Removal::Removed);
        assert_eq!(removed[1], Removal::NotFound);
        assert!(matches!(removed[2], Removal::Failed(_)));

        let stats = b.stats();
        assert_eq!(stats.bulk_gets, 1);
        assert_eq!(stats.bulk_get_keys, 3);
        assert_eq!(stats.bulk_removes, 1);
    }

    #[tokio::test]
    async fn test_set_many_partial_failure() {
        let (_, b) = backend();
        b.inject_fault(Bytes::from_static(b"bad")).await;
        let items = vec![
            (Bytes::from_static(b"good"), json!(1)),
            (Bytes::from_static(b"bad"), json!(2)),
        ];
        let results = b.set_many(&items, Expiry::Never).await.unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(b.peek(b"good").await.map(|(v, _)| v), Some(json!(1)));
        assert_eq!(b.peek(b"bad").await, None);
    }

    #[tokio::test]
    async fn test_take_down_fails_every_call() {
        let (_, b) = backend();
        b.take_down();
        assert!(b.get(b"k").await.is_err());
        assert!(b.get_many(&[Bytes::from_static(b"k")]).await.is_err());
        b.heal().await;
        assert!(b.get(b"k").await.is_ok());
    }
}
