//! Local Tier - In-Process Hot Cache
//!
//! Bounded LRU in front of the distributed tier. Entries carry an absolute
//! expiry and are dropped lazily on read or by `purge_expired`.
//!
//! # Design
//!
//! - One mutex guards the map, the recency index and the byte total so all
//!   three always agree.
//! - Recency is a monotonically increasing stamp; the smallest stamp is the
//!   least recently used entry.
//! - A value larger than `max_bytes` is never admitted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

/// Local tier configuration
#[derive(Debug, Clone)]
pub struct LocalTierConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Optional bound on the summed value sizes
    pub max_bytes: Option<u64>,
    /// Default entry lifetime
    pub ttl: Duration,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: None,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Local tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocalTierStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
struct LocalEntry {
    value: Bytes,
    expires_at: Instant,
    stamp: u64,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<String, LocalEntry>,
    /// stamp -> key, oldest first
    recency: BTreeMap<u64, String>,
    tick: u64,
    bytes: u64,
}

impl LruState {
    fn next_stamp(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<LocalEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.stamp);
        self.bytes -= entry.value.len() as u64;
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.bytes -= entry.value.len() as u64;
        }
        Some(key)
    }
}

/// In-process LRU tier with TTL
pub struct LocalTierCache {
    config: LocalTierConfig,
    state: Mutex<LruState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalTierCache {
    pub fn new(config: LocalTierConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LruState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Default lifetime applied by `set`
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Live value for `key`, refreshing its recency
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            state.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let stamp = state.next_stamp();
        let entry = state.entries.get_mut(key)?;
        let old_stamp = std::mem::replace(&mut entry.stamp, stamp);
        let value = entry.value.clone();
        state.recency.remove(&old_stamp);
        state.recency.insert(stamp, key.to_string());

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Insert with the default lifetime
    pub fn set(&self, key: &str, value: Bytes) {
        self.set_with_ttl(key, value, self.config.ttl);
    }

    /// Insert with an explicit lifetime, evicting LRU entries to fit
    pub fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) {
        let size = value.len() as u64;
        let mut state = self.state.lock();
        state.remove(key);

        if self.config.max_bytes.is_some_and(|max| size > max) {
            trace!(key, size, "Value exceeds local tier capacity, not cached");
            return;
        }

        let stamp = state.next_stamp();
        state.recency.insert(stamp, key.to_string());
        state.bytes += size;
        state.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now() + ttl,
                stamp,
            },
        );

        while state.entries.len() > self.config.max_entries
            || self.config.max_bytes.is_some_and(|max| state.bytes > max)
        {
            match state.pop_lru() {
                Some(evicted) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %evicted, "Evicted from local tier");
                }
                None => break,
            }
        }
    }

    /// Drop `key`, returning whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.bytes = 0;
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }

        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Summed value sizes
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().bytes
    }

    pub fn stats(&self) -> LocalTierStats {
        let (entries, bytes) = {
            let state = self.state.lock();
            (state.entries.len(), state.bytes)
        };
        LocalTierStats {
            entries,
            bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for LocalTierCache {
    fn default() -> Self {
        Self::new(LocalTierConfig::default())
    }
}
