//! Cache Node
//!
//! A single addressable backing store wrapped with health state.
//!
//! # Design
//!
//! - Every backend call runs under a per-call timeout and records its
//!   latency (last observed, not averaged).
//! - Transport failures increment `error_count`; any success resets it.
//! - A disconnected node fails fast without touching the backend.
//! - The `get`/`set`/`delete`/`clear` surface converts failures into
//!   miss/`false`. The `fetch`/`store`/`remove` surface keeps the error so
//!   the coordinator can decide whether to retry.

pub mod codec;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::NodeBackend;
use crate::error::{Error, Result};

use codec::ValueCodec;

/// Observed node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Connected with no recent failures
    Connected,
    /// Connected but failing
    Degraded,
    /// Marked disconnected, awaiting reconnection
    Unreachable,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Connected => write!(f, "connected"),
            NodeState::Degraded => write!(f, "degraded"),
            NodeState::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub backend: String,
    pub connected: bool,
    pub state: NodeState,
    pub error_count: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub response_time_ms: f64,
    pub operations: u64,
    pub failures: u64,
}

/// A cache node and its health bookkeeping
pub struct CacheNode {
    id: String,
    host: String,
    port: u16,
    weight: u32,
    backend: Arc<dyn NodeBackend>,
    codec: ValueCodec,
    timeout: Duration,
    connected: AtomicBool,
    error_count: AtomicU32,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
    /// Latest call latency in microseconds
    response_time_us: AtomicU64,
    operations: AtomicU64,
    failures: AtomicU64,
}

impl CacheNode {
    /// Create a disconnected node
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        weight: u32,
        backend: Arc<dyn NodeBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight,
            backend,
            codec: ValueCodec::default(),
            timeout: Duration::from_secs(1),
            connected: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
            last_heartbeat: RwLock::new(None),
            response_time_us: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Set the value codec
    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.read()
    }

    /// Latest observed call latency
    pub fn response_time_ms(&self) -> f64 {
        self.response_time_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Derived state from connection flag and error count
    pub fn state(&self) -> NodeState {
        if !self.is_connected() {
            NodeState::Unreachable
        } else if self.error_count() > 0 {
            NodeState::Degraded
        } else {
            NodeState::Connected
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Establish the backing connection.
    ///
    /// On failure the node stays disconnected and the error is logged and
    /// returned; nothing panics or propagates further.
    pub async fn connect(&self) -> Result<()> {
        let start = Instant::now();
        let result = self.with_timeout_of(self.backend.connect()).await;
        self.record_latency(start);

        match result {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                self.error_count.store(0, Ordering::SeqCst);
                self.touch_heartbeat();
                info!(node = %self.id, backend = self.backend.kind(), "Cache node connected");
                Ok(())
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                self.error_count.fetch_add(1, Ordering::SeqCst);
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(node = %self.id, error = %e, "Cache node connection failed");
                Err(e)
            }
        }
    }

    /// Drop the backing connection
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.backend.disconnect().await;
        debug!(node = %self.id, "Cache node disconnected");
    }

    /// Mark the node unreachable without touching the backend
    pub fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(
                node = %self.id,
                errors = self.error_count(),
                "Cache node marked disconnected"
            );
        }
    }

    /// Liveness probe; refreshes the heartbeat on success
    pub async fn ping(&self) -> Result<()> {
        self.call(self.backend.ping()).await?;
        self.touch_heartbeat();
        Ok(())
    }

    // =========================================================================
    // Error-preserving operations
    // =========================================================================

    /// Read and decode a value
    pub async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        self.ensure_connected()?;
        match self.call(self.backend.get(key)).await? {
            Some(framed) => match self.codec.decode(&framed) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(node = %self.id, key, error = %e, "Discarding undecodable value");
                    Err(e)
                }
            },
            None => Ok(None),
        }
    }

    /// Encode and write a value
    pub async fn store(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.ensure_connected()?;
        let framed = self.codec.encode(value)?;
        self.call(self.backend.set(key, framed, ttl)).await
    }

    /// Remove a value, returning whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.ensure_connected()?;
        self.call(self.backend.delete(key)).await
    }

    /// Remove every value
    pub async fn flush(&self) -> Result<()> {
        self.ensure_connected()?;
        self.call(self.backend.clear()).await
    }

    // =========================================================================
    // Availability-first operations
    // =========================================================================

    /// Value for `key`; `None` on miss, disconnection or failure
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.fetch(key).await.ok().flatten()
    }

    /// Write `value`; `false` on any failure
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        self.store(key, value, ttl).await.is_ok()
    }

    /// Delete `key`; `true` when the node confirmed the key is gone
    pub async fn delete(&self, key: &str) -> bool {
        self.remove(key).await.is_ok()
    }

    /// Clear the node; `false` on any failure
    pub async fn clear(&self) -> bool {
        self.flush().await.is_ok()
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            weight: self.weight,
            backend: self.backend.kind().to_string(),
            connected: self.is_connected(),
            state: self.state(),
            error_count: self.error_count(),
            last_heartbeat: self.last_heartbeat(),
            response_time_ms: self.response_time_ms(),
            operations: self.operations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected(self.id.clone()))
        }
    }

    async fn with_timeout_of<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                node: self.id.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Run a backend call with timeout, latency and error bookkeeping
    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = self.with_timeout_of(fut).await;
        self.record_latency(start);
        self.operations.fetch_add(1, Ordering::Relaxed);

        match &result {
            Ok(_) => {
                self.error_count.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                let errors = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(node = %self.id, errors, error = %e, "Cache node call failed");
            }
        }
        result
    }

    fn record_latency(&self, start: Instant) {
        self.response_time_us
            .store(start.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    fn touch_heartbeat(&self) {
        *self.last_heartbeat.write() = Some(Utc::now());
    }
}

impl std::fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("id", &self.id)
            .field("backend", &self.backend.kind())
            .field("connected", &self.is_connected())
            .field("error_count", &self.error_count())
            .finish()
    }
}
