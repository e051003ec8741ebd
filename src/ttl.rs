//! Expiration handling.
//!
//! Clients speak in relative durations (`EX 60`, `PEXPIRE key 1500`), the
//! document store wants an absolute UNIX timestamp in whole seconds. The
//! [`TtlNormalizer`] does that conversion against an injectable [`Clock`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Absolute expiry of a backend document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// Persist without expiration.
    Never,
    /// Expire at this UNIX timestamp, in seconds.
    At(u64),
}

impl Expiry {
    /// Whether a document with this expiry is gone at `now` (UNIX seconds).
    pub fn has_passed(&self, now: u64) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now >= *at,
        }
    }
}

/// A relative TTL as received on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeTtl {
    Seconds(u64),
    Millis(u64),
}

impl RelativeTtl {
    /// Whole seconds, truncating sub-second remainders.
    pub fn whole_seconds(self) -> u64 {
        match self {
            RelativeTtl::Seconds(s) => s,
            RelativeTtl::Millis(ms) => ms / 1000,
        }
    }
}

/// Source of wall-clock time in UNIX seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn unix_seconds(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts relative TTLs into absolute [`Expiry`] values.
#[derive(Debug, Clone)]
pub struct TtlNormalizer {
    clock: Arc<dyn Clock>,
}

impl Default for TtlNormalizer {
    fn default() -> Self {
        TtlNormalizer::new(Arc::new(SystemClock))
    }
}

impl TtlNormalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        TtlNormalizer { clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A zero TTL means "no expiration"; anything else is `now + ttl`.
    pub fn normalize(&self, ttl: RelativeTtl) -> Expiry {
        match ttl.whole_seconds() {
            0 => Expiry::Never,
            secs => Expiry::At(self.clock.unix_seconds().saturating_add(secs)),
        }
    }

    pub fn seconds(&self, secs: u64) -> Expiry {
        self.normalize(RelativeTtl::Seconds(secs))
    }

    pub fn millis(&self, millis: u64) -> Expiry {
        self.normalize(RelativeTtl::Millis(millis))
    }
}
