use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What this process last observed for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached {
    Value(Bytes),
    /// Confirmed absent from the backend.
    Missing,
}

impl Cached {
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            Cached::Value(v) => Some(v),
            Cached::Missing => None,
        }
    }
}

#[derive(Debug)]
struct CacheRecord {
    cached: Cached,
    /// `None` when the cache lifetime is zero (records never expire).
    expires_at: Option<Instant>,
}

impl CacheRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Write epochs, kept so a backend read can tell whether a key was written
/// while it was in flight.
#[derive(Debug, Default)]
struct WriteLog {
    epoch: u64,
    /// Open fill tickets, by the epoch they were taken at.
    open: BTreeMap<u64, usize>,
    /// Last write epoch per key. Only tracked while tickets are open.
    written: HashMap<Bytes, u64>,
}

impl WriteLog {
    fn note<'a>(&mut self, keys: impl IntoIterator<Item = &'a Bytes>) {
        self.epoch += 1;
        if self.open.is_empty() {
            return;
        }
        for key in keys {
            self.written.insert(key.clone(), self.epoch);
        }
    }

    fn written_since(&self, key: &[u8], epoch: u64) -> bool {
        self.written.get(key).is_some_and(|&at| at > epoch)
    }

    fn release(&mut self, epoch: u64) {
        if let Some(count) = self.open.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&epoch);
            }
        }
        match self.open.keys().next() {
            None => self.written.clear(),
            Some(&oldest) if oldest > epoch => self.written.retain(|_, at| *at > oldest),
            Some(_) => {}
        }
    }
}

/// Taken before a backend read whose result will be cached. Dropping it
/// without filling is fine.
#[derive(Debug)]
pub struct FillTicket<'a> {
    cache: &'a LocalCache,
    epoch: u64,
}

impl Drop for FillTicket<'_> {
    fn drop(&mut self) {
        self.cache.write_log().release(self.epoch);
    }
}

/// In-process look-aside cache with a fixed record lifetime.
///
/// The lifetime is independent of any backend expiry: a record lives for the
/// configured duration after it was stored, whatever the document's own TTL.
///
/// Writes (`store_value`, `store_all`, `invalidate_all`) always apply. Results
/// of backend reads go through [`LocalCache::fill`], which drops any key
/// written after the read's ticket was taken.
#[derive(Debug)]
pub struct LocalCache {
    records: RwLock<HashMap<Bytes, CacheRecord>>,
    writes: Mutex<WriteLog>,
    lifetime: Duration,
}

impl LocalCache {
    pub fn new(lifetime: Duration) -> Self {
        LocalCache {
            records: RwLock::new(HashMap::new()),
            writes: Mutex::new(WriteLog::default()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn record(&self, cached: Cached) -> CacheRecord {
        let expires_at = if self.lifetime.is_zero() {
            None
        } else {
            Some(Instant::now() + self.lifetime)
        };
        CacheRecord { cached, expires_at }
    }

    // Lock order: `records` before `writes`. The log is never held across an await.
    fn write_log(&self) -> MutexGuard<'_, WriteLog> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expired records read as unresolved; the sweeper removes them later.
    pub async fn lookup(&self, key: &[u8]) -> Option<Cached> {
        let now = Instant::now();
        let records = self.records.read().await;
        records
            .get(key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.cached.clone())
    }

    /// Look up several keys under one lock, keeping input order.
    pub async fn lookup_many(&self, keys: &[Bytes]) -> Vec<Option<Cached>> {
        let now = Instant::now();
        let records = self.records.read().await;
        keys.iter()
            .map(|key| {
                records
                    .get(key)
                    .filter(|r| !r.is_expired(now))
                    .map(|r| r.cached.clone())
            })
            .collect()
    }

    pub async fn store_value(&self, key: Bytes, value: Bytes) {
        self.store_all(vec![(key, Cached::Value(value))]).await;
    }

    pub async fn store_all(&self, entries: Vec<(Bytes, Cached)>) {
        if entries.is_empty() {
            return;
        }
        let mut records = self.records.write().await;
        self.write_log().note(entries.iter().map(|(key, _)| key));
        for (key, cached) in entries {
            let record = self.record(cached);
            records.insert(key, record);
        }
    }

    pub async fn invalidate_all<'a>(&self, keys: impl IntoIterator<Item = &'a Bytes>) {
        let keys: Vec<&Bytes> = keys.into_iter().collect();
        if keys.is_empty() {
            return;
        }
        let mut records = self.records.write().await;
        self.write_log().note(keys.iter().copied());
        for key in keys {
            records.remove(key);
        }
    }

    /// Start a backend read. Writes that land after this call win over the
    /// read's result.
    pub fn begin_fill(&self) -> FillTicket<'_> {
        let mut log = self.write_log();
        let epoch = log.epoch;
        *log.open.entry(epoch).or_default() += 1;
        FillTicket { cache: self, epoch }
    }

    /// Cache the results of the read `ticket` was taken for, skipping keys
    /// written since. Returns how many records were stored.
    pub async fn fill(&self, ticket: FillTicket<'_>, entries: Vec<(Bytes, Cached)>) -> usize {
        if entries.is_empty() {
            return 0;
        }
        let mut records = self.records.write().await;
        let log = self.write_log();
        let mut filled = 0;
        for (key, cached) in entries {
            if log.written_since(&key, ticket.epoch) {
                continue;
            }
            let record = self.record(cached);
            records.insert(key, record);
            filled += 1;
        }
        filled
    }

    /// Remove expired records. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        before - records.len()
    }

    /// Number of records, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &'static str) -> Bytes {
        Bytes::from_static(k.as_bytes())
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_live_for_fixed_lifetime() {
        let cache = LocalCache::new(Duration::from_secs(10));
        cache.store_value(key("a"), Bytes::from_static(b"1")).await;
        cache.store_all(vec![(key("b"), Cached::Missing)]).await;

        assert_eq!(cache.lookup(b"a").await, Some(Cached::Value(Bytes::from_static(b"1"))));
        assert_eq!(cache.lookup(b"b").await, Some(Cached::Missing));
        assert_eq!(cache.lookup(b"c").await, None);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.lookup(b"a").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.lookup(b"a").await, None);
        assert_eq!(cache.lookup(b"b").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_refreshes_lifetime() {
        let cache = LocalCache::new(Duration::from_secs(10));
        cache.store_all(vec![(key("a"), Cached::Missing)]).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.store_value(key("a"), Bytes::from_static(b"2")).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.lookup(b"a").await, Some(Cached::Value(Bytes::from_static(b"2"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep() {
        let cache = LocalCache::new(Duration::from_secs(5));
        cache.store_all(vec![(key("old"), Cached::Missing)]).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.store_all(vec![(key("new"), Cached::Missing)]).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.lookup(b"new").await, Some(Cached::Missing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_lifetime_never_expires() {
        let cache = LocalCache::new(Duration::ZERO);
        cache.store_all(vec![(key("a"), Cached::Missing)]).await;
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(cache.sweep().await, 0);
        assert_eq!(cache.lookup(b"a").await, Some(Cached::Missing));
    }

    #[tokio::test]
    async fn test_bulk_lookup_and_invalidate() {
        let cache = LocalCache::new(Duration::from_secs(60));
        cache
            .store_all(vec![
                (key("a"), Cached::Value(Bytes::from_static(b"1"))),
                (key("c"), Cached::Missing),
            ])
            .await;

        let got = cache.lookup_many(&[key("a"), key("b"), key("c")]).await;
        assert_eq!(
            got,
            vec![Some(Cached::Value(Bytes::from_static(b"1"))), None, Some(Cached::Missing)]
        );

        cache.invalidate_all(&[key("a"), key("b")]).await;
        assert_eq!(cache.len().await, 1);
        cache.invalidate_all(&[key("c")]).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_fill_without_writes_stores_everything() {
        let cache = LocalCache::new(Duration::from_secs(60));
        let ticket = cache.begin_fill();
        let filled = cache
            .fill(ticket, vec![(key("a"), Cached::Value(key("1"))), (key("b"), Cached::Missing)])
            .await;
        assert_eq!(filled, 2);
        assert_eq!(cache.lookup(b"b").await, Some(Cached::Missing));
    }

    #[tokio::test]
    async fn test_fill_skips_keys_written_after_ticket() {
        let cache = LocalCache::new(Duration::from_secs(60));
        let ticket = cache.begin_fill();
        cache.invalidate_all(&[key("a")]).await;
        cache.store_value(key("b"), key("new")).await;

        let filled = cache
            .fill(
                ticket,
                vec![
                    (key("a"), Cached::Value(key("old"))),
                    (key("b"), Cached::Missing),
                    (key("c"), Cached::Missing),
                ],
            )
            .await;
        assert_eq!(filled, 1);
        assert_eq!(cache.lookup(b"a").await, None);
        assert_eq!(cache.lookup(b"b").await, Some(Cached::Value(key("new"))));
        assert_eq!(cache.lookup(b"c").await, Some(Cached::Missing));
    }

    #[tokio::test]
    async fn test_writes_before_ticket_do_not_block_fill() {
        let cache = LocalCache::new(Duration::from_secs(60));
        let early = cache.begin_fill();
        cache.invalidate_all(&[key("a")]).await;

        let late = cache.begin_fill();
        assert_eq!(cache.fill(late, vec![(key("a"), Cached::Missing)]).await, 1);
        assert_eq!(cache.fill(early, vec![(key("a"), Cached::Missing)]).await, 0);
    }

    #[tokio::test]
    async fn test_write_log_is_dropped_with_last_ticket() {
        let cache = LocalCache::new(Duration::from_secs(60));
        cache.store_value(key("a"), key("1")).await;
        assert!(cache.write_log().written.is_empty());

        let first = cache.begin_fill();
        cache.store_value(key("a"), key("2")).await;
        let second = cache.begin_fill();
        cache.store_value(key("b"), key("3")).await;
        assert_eq!(cache.write_log().written.len(), 2);

        // Only writes newer than the oldest open ticket are kept.
        drop(first);
        assert_eq!(cache.write_log().written.len(), 1);
        drop(second);
        let log = cache.write_log();
        assert!(log.written.is_empty());
        assert!(log.open.is_empty());
    }
}
