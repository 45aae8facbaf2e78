//! In-Memory Node Backend
//!
//! DashMap-backed store with per-key expiry. Used for tests, local
//! development and embedding a cache node in-process. Supports fault
//! injection (outage, latency, transient failures) so node failure handling
//! can be exercised without a network.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::domain::NodeBackend;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Backend operation statistics
#[derive(Debug, Clone, Default)]
pub struct MemoryBackendStats {
    /// Live keys (expired keys not yet purged included)
    pub keys: usize,
    /// Total bytes stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
    /// Ping operations
    pub pings: u64,
}

/// In-memory node backend
pub struct InMemoryBackend {
    name: String,
    storage: DashMap<String, StoredValue>,
    /// Simulated reachability of the "server"
    available: AtomicBool,
    /// Remaining operations to fail before recovering
    transient_failures: AtomicU32,
    /// Artificial latency added to every call
    latency: Mutex<Option<Duration>>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    pings: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new reachable backend
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: DashMap::new(),
            available: AtomicBool::new(true),
            transient_failures: AtomicU32::new(0),
            latency: Mutex::new(None),
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            pings: AtomicU64::new(0),
        }
    }

    /// Simulate the server going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether the simulated server is reachable
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Fail the next `count` operations with a transport error
    pub fn fail_next(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Whether an unexpired value is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .get(key)
            .map(|v| !v.is_expired())
            .unwrap_or(false)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Get backend statistics
    pub fn stats(&self) -> MemoryBackendStats {
        MemoryBackendStats {
            keys: self.storage.len(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
        }
    }

    /// Apply injected latency and failures
    async fn simulate(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.is_available() {
            return Err(Error::NodeUnreachable {
                node: self.name.clone(),
                reason: "connection refused".into(),
            });
        }

        let consumed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(Error::NodeUnreachable {
                node: self.name.clone(),
                reason: "connection reset by peer".into(),
            });
        }

        Ok(())
    }

    fn remove_entry(&self, key: &str) -> bool {
        match self.storage.remove(key) {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
                !old.is_expired()
            }
            None => false,
        }
    }

    /// Drop `key` only if the stored value is still expired
    fn purge_if_expired(&self, key: &str) -> bool {
        match self.storage.remove_if(key, |_, v| v.is_expired()) {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl NodeBackend for InMemoryBackend {
    async fn connect(&self) -> Result<()> {
        self.simulate().await
    }

    async fn disconnect(&self) {}

    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        self.simulate().await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.simulate().await?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let expired = match self.storage.get(key) {
            Some(value) if !value.is_expired() => return Ok(Some(value.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.purge_if_expired(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.simulate().await?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = value.len() as u64;
        let stored = StoredValue {
            data: value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        if let Some(old) = self.storage.insert(key.to_string(), stored) {
            self.total_bytes
                .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.simulate().await?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.remove_entry(key))
    }

    async fn clear(&self) -> Result<()> {
        self.simulate().await?;
        self.storage.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
