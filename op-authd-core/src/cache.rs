//! Short-lived TTL cache for resolved secret values.
//!
//! Values live in wipeable buffers owned by the cache; eviction, replacement
//! and bulk clears overwrite the prior buffer before releasing it. Expiry is
//! evaluated at read time, so a reader never observes an entry whose
//! deadline has passed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;

use crate::secret::SecretBuf;

struct Entry {
    value: SecretBuf,
    cached_at: SystemTime,
    expires_at: Instant,
}

/// A value copied out of the cache together with its entry timestamps.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub value: String,
    pub expires_in: Duration,
    pub cached_at: SystemTime,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub in_flight: usize,
}

pub struct Cache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    in_flight: AtomicUsize,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// TTL fixed at construction.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the stored value when present and not yet expired. An expired
    /// entry reads as a miss; the sweep removes it later.
    pub fn get(&self, key: &str) -> Option<CacheHit> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        let now = Instant::now();
        if entry.expires_at <= now {
            return None;
        }
        Some(CacheHit {
            value: entry.value.reveal(),
            expires_in: entry.expires_at - now,
            cached_at: entry.cached_at,
        })
    }

    /// Stores a value under `key`, stamping `cached_at = now` and
    /// `expires_at = now + ttl`. Any replaced buffer is wiped first.
    pub fn set(&self, key: &str, value: &str) {
        let entry = Entry {
            value: SecretBuf::from(value),
            cached_at: SystemTime::now(),
            expires_at: Instant::now() + self.ttl,
        };
        let mut entries = self.entries.write();
        if let Some(mut old) = entries.insert(key.to_string(), entry) {
            old.value.wipe();
        }
    }

    /// Wipes and removes entries whose deadline has passed. Returns the
    /// number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            if entry.expires_at <= now {
                entry.value.wipe();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Wipes and removes every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        for entry in entries.values_mut() {
            entry.value.wipe();
        }
        entries.clear();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// RAII guard for the in-flight gauge. The gauge never goes negative:
    /// the decrement is saturating.
    pub fn flight_guard(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { cache: self }
    }
}

pub struct InFlightGuard<'a> {
    cache: &'a Cache,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .cache
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}
