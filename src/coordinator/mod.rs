//! Distributed Cache Coordinator
//!
//! Single public entry point for the cache. Hides node topology from callers
//! and routes every operation through the local tier and the hash ring.
//!
//! # Architecture
//!
//! ```text
//!   get(key) ──► local tier ──hit──► value
//!                   │ miss
//!                   ▼
//!              ring position ──► replica set [primary, backup, ...]
//!                                   │ strategy picks the first try
//!                                   ▼
//!                 node.fetch (retry on transport errors) ──► next replica
//!                                   │ hit
//!                                   ▼
//!                       write-through to local tier
//! ```
//!
//! # Design
//!
//! - Topology (node list plus ring) lives behind an `Arc` swapped as a whole;
//!   every operation works on one snapshot.
//! - Node failures never reach callers. They become misses or `false` and
//!   show up in metrics and node status. Only `EmptyRing` propagates.
//! - Writes go to all replicas concurrently; a partial failure returns
//!   `false` without rollback.

pub mod metrics;
pub mod strategy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{InMemoryBackend, RespBackend};
use crate::config::CacheConfig;
use crate::domain::NodeBackend;
use crate::error::{Error, Result};
use crate::health::{HealthCheckConfig, HealthChecker, HealthCheckerHandle};
use crate::local::{LocalTierCache, LocalTierConfig};
use crate::node::codec::ValueCodec;
use crate::node::{CacheNode, NodeStatus};
use crate::ring::HashRing;

pub use metrics::{CacheMetrics, MetricsSnapshot, PrometheusExporter};
pub use strategy::{NodeSelectionStrategy, NodeSelector};

/// Base delay between retries of one node, multiplied by the attempt number
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Builds the backend for a node added by address
pub type BackendFactory = Arc<dyn Fn(&str, u16) -> Arc<dyn NodeBackend> + Send + Sync>;

// =============================================================================
// Topology
// =============================================================================

/// Immutable view of the node set and its ring
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<Arc<CacheNode>>,
    index: HashMap<String, usize>,
    ring: HashRing,
}

impl Topology {
    fn build(virtual_nodes_per_physical: usize, nodes: Vec<Arc<CacheNode>>) -> Self {
        let ring = HashRing::build(
            virtual_nodes_per_physical,
            nodes.iter().map(|n| (n.id(), n.weight())),
        );
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().to_string(), i))
            .collect();
        Self { nodes, index, ring }
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[Arc<CacheNode>] {
        &self.nodes
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn node(&self, id: &str) -> Option<&Arc<CacheNode>> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Up to `count` distinct nodes for `key`, primary first
    pub fn replicas_for(&self, key: &str, count: usize) -> Result<Vec<Arc<CacheNode>>> {
        let position = HashRing::position_for(key);
        Ok(self
            .ring
            .replica_set(position, count)?
            .into_iter()
            .filter_map(|id| self.node(id).cloned())
            .collect())
    }
}

/// Guarded node set shared with the health checker.
///
/// Mutations are serialized and rebuild the ring off to the side before
/// swapping it in; readers only ever clone the current `Arc`.
#[derive(Debug)]
pub struct NodeRegistry {
    virtual_nodes_per_physical: usize,
    topology: RwLock<Arc<Topology>>,
    mutation: Mutex<()>,
}

impl NodeRegistry {
    pub fn new(virtual_nodes_per_physical: usize) -> Self {
        Self {
            virtual_nodes_per_physical,
            topology: RwLock::new(Arc::new(Topology::build(
                virtual_nodes_per_physical,
                Vec::new(),
            ))),
            mutation: Mutex::new(()),
        }
    }

    /// Current topology
    pub fn snapshot(&self) -> Arc<Topology> {
        self.topology.read().clone()
    }

    /// Current nodes in insertion order
    pub fn nodes(&self) -> Vec<Arc<CacheNode>> {
        self.snapshot().nodes().to_vec()
    }

    pub fn len(&self) -> usize {
        self.snapshot().nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, node: Arc<CacheNode>) -> Result<()> {
        let _serialized = self.mutation.lock();
        let current = self.snapshot();
        if current.node(node.id()).is_some() {
            return Err(Error::DuplicateNode(node.id().to_string()));
        }

        let mut nodes = current.nodes().to_vec();
        nodes.push(node);
        let next = Topology::build(self.virtual_nodes_per_physical, nodes);
        *self.topology.write() = Arc::new(next);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<Arc<CacheNode>> {
        let _serialized = self.mutation.lock();
        let current = self.snapshot();
        let removed = current
            .node(id)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;

        let nodes = current
            .nodes()
            .iter()
            .filter(|n| n.id() != id)
            .cloned()
            .collect();
        let next = Topology::build(self.virtual_nodes_per_physical, nodes);
        *self.topology.write() = Arc::new(next);
        Ok(removed)
    }
}

// =============================================================================
// Distributed Cache
// =============================================================================

/// Coordinator over a set of cache nodes
pub struct DistributedCache {
    config: CacheConfig,
    registry: Arc<NodeRegistry>,
    local: LocalTierCache,
    metrics: CacheMetrics,
    selector: NodeSelector,
    codec: ValueCodec,
    factory: BackendFactory,
}

impl DistributedCache {
    /// Create a coordinator and register the configured nodes (not yet
    /// connected; see [`DistributedCache::connect_all`])
    pub fn new(config: CacheConfig, factory: BackendFactory) -> Result<Self> {
        config.validate()?;

        let cache = Self {
            registry: Arc::new(NodeRegistry::new(config.virtual_nodes_per_physical)),
            local: LocalTierCache::new(LocalTierConfig {
                max_entries: config.local_tier_max_entries,
                max_bytes: config.local_tier_max_bytes,
                ttl: config.local_tier_ttl(),
            }),
            metrics: CacheMetrics::new(),
            selector: NodeSelector::new(config.strategy),
            codec: ValueCodec::new(config.compression.clone()),
            factory,
            config,
        };

        for node in cache.config.nodes.clone() {
            let backend = (cache.factory)(&node.host, node.port);
            cache.register(node.node_id(), node.host, node.port, node.weight, backend)?;
        }

        Ok(cache)
    }

    /// Coordinator whose nodes speak RESP over TCP
    pub fn with_resp_backends(config: CacheConfig) -> Result<Self> {
        let timeout = config.operation_timeout();
        Self::new(
            config,
            Arc::new(move |host: &str, port: u16| -> Arc<dyn NodeBackend> {
                Arc::new(
                    RespBackend::new(host, port)
                        .with_connect_timeout(timeout)
                        .with_response_timeout(timeout),
                )
            }),
        )
    }

    /// Coordinator whose nodes are in-process stores
    pub fn with_memory_backends(config: CacheConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(|host: &str, port: u16| -> Arc<dyn NodeBackend> {
                Arc::new(InMemoryBackend::new(format!("{}:{}", host, port)))
            }),
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Node set shared with background tasks
    pub fn registry(&self) -> Arc<NodeRegistry> {
        self.registry.clone()
    }

    pub fn local_tier(&self) -> &LocalTierCache {
        &self.local
    }

    pub fn strategy(&self) -> NodeSelectionStrategy {
        self.selector.strategy()
    }

    // =========================================================================
    // Membership
    // =========================================================================

    fn register(
        &self,
        id: String,
        host: String,
        port: u16,
        weight: u32,
        backend: Arc<dyn NodeBackend>,
    ) -> Result<Arc<CacheNode>> {
        if weight == 0 {
            return Err(Error::Config(format!("node {} has weight 0", id)));
        }

        let node = Arc::new(
            CacheNode::new(id, host, port, weight, backend)
                .with_codec(self.codec.clone())
                .with_timeout(self.config.operation_timeout()),
        );
        self.registry.insert(node.clone())?;
        info!(
            node = node.id(),
            weight,
            nodes = self.registry.len(),
            "Cache node added to ring"
        );
        Ok(node)
    }

    /// Add a node reached through the configured backend factory.
    ///
    /// Returns `false` when the id is taken or the weight is zero. A node
    /// that fails to connect is still added and left to the health checker.
    pub async fn add_node(&self, id: &str, host: &str, port: u16, weight: u32) -> bool {
        let backend = (self.factory)(host, port);
        self.add_node_with_backend(id, host, port, weight, backend)
            .await
    }

    /// Add a node with an explicit backend
    pub async fn add_node_with_backend(
        &self,
        id: &str,
        host: &str,
        port: u16,
        weight: u32,
        backend: Arc<dyn NodeBackend>,
    ) -> bool {
        let node = match self.register(id.to_string(), host.to_string(), port, weight, backend) {
            Ok(node) => node,
            Err(e) => {
                warn!(node = id, error = %e, "Cache node not added");
                return false;
            }
        };

        if node.connect().await.is_err() {
            warn!(node = id, "Cache node added disconnected, awaiting health check");
        }
        true
    }

    /// Remove a node from the ring and close its connection
    pub async fn remove_node(&self, id: &str) -> bool {
        match self.registry.remove(id) {
            Ok(node) => {
                node.disconnect().await;
                info!(
                    node = id,
                    nodes = self.registry.len(),
                    "Cache node removed from ring"
                );
                true
            }
            Err(e) => {
                debug!(node = id, error = %e, "Cache node not removed");
                false
            }
        }
    }

    /// Connect every registered node, returning how many are connected
    pub async fn connect_all(&self) -> usize {
        let nodes = self.registry.nodes();
        let results = join_all(nodes.iter().map(|node| async move {
            if node.is_connected() {
                true
            } else {
                node.connect().await.is_ok()
            }
        }))
        .await;

        let connected = results.into_iter().filter(|ok| *ok).count();
        info!(connected, total = nodes.len(), "Cache nodes connected");
        connected
    }

    // =========================================================================
    // Data Path
    // =========================================================================

    /// Value for `key`.
    ///
    /// Errors only with `EmptyRing`; every node failure degrades to a miss.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let topology = self.registry.snapshot();
        if topology.ring().is_empty() {
            self.metrics.record_miss();
            return Err(Error::EmptyRing);
        }

        if let Some(value) = self.local.get(key) {
            self.metrics.record_local_hit();
            return Ok(Some(value));
        }

        let candidates = topology.replicas_for(key, self.config.replication_factor.max(2))?;
        let first = self.selector.select(&candidates);
        let order = std::iter::once(first).chain((0..candidates.len()).filter(|&i| i != first));

        for index in order {
            let node = &candidates[index];
            match self.with_retry(node, || node.fetch(key)).await {
                Ok(Some(value)) => {
                    self.local.set(key, value.clone());
                    self.metrics.record_hit();
                    if index != 0 {
                        debug!(node = node.id(), "Served from backup replica");
                    }
                    return Ok(Some(value));
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_error();
                    debug!(node = node.id(), error = %e, "Replica read failed");
                }
            }
        }

        self.metrics.record_miss();
        Ok(None)
    }

    /// Write `value` to the local tier and every replica.
    ///
    /// Returns `true` only when every replica acknowledged the write.
    #[instrument(level = "debug", skip(self, value))]
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let value: Bytes = value.into();
        let topology = self.registry.snapshot();
        let replicas = topology.replicas_for(key, self.config.replication_factor)?;

        let local_ttl = ttl.map_or(self.local.ttl(), |ttl| ttl.min(self.local.ttl()));
        self.local.set_with_ttl(key, value.clone(), local_ttl);
        self.metrics.record_set();

        let value = &value;
        let results = join_all(
            replicas
                .iter()
                .map(|node| self.with_retry(node, move || node.store(key, value, ttl))),
        )
        .await;

        Ok(self.settle("set", key, &replicas, results))
    }

    /// Remove `key` from the local tier and every replica.
    ///
    /// Returns `true` only when every replica confirmed the delete.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let topology = self.registry.snapshot();
        let replicas = topology.replicas_for(key, self.config.replication_factor)?;

        self.local.delete(key);
        self.metrics.record_delete();

        let results = join_all(
            replicas
                .iter()
                .map(|node| self.with_retry(node, move || node.remove(key))),
        )
        .await;

        Ok(self.settle("delete", key, &replicas, results))
    }

    /// Clear the local tier and every node
    #[instrument(level = "debug", skip(self))]
    pub async fn clear(&self) -> bool {
        self.local.clear();

        let nodes = self.registry.nodes();
        let results = join_all(nodes.iter().map(|node| node.clear())).await;

        let mut all_cleared = true;
        for (node, cleared) in nodes.iter().zip(results) {
            if !cleared {
                all_cleared = false;
                self.metrics.record_error();
                warn!(node = node.id(), "Cache node clear failed");
            }
        }
        all_cleared
    }

    /// Serialize `value` as JSON and store it
    pub async fn set_value<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value)?;
        self.set(key, encoded, ttl).await
    }

    /// Fetch and deserialize a JSON value; undecodable values read as a miss
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Cached value does not decode, treating as miss");
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn metrics(&self) -> MetricsSnapshot {
        let topology = self.registry.snapshot();
        let nodes = topology.nodes();
        let connected = nodes.iter().filter(|n| n.is_connected()).count();
        self.metrics
            .snapshot(nodes.len(), connected, self.local.len())
    }

    /// Status of every node in insertion order
    pub fn node_status(&self) -> Vec<NodeStatus> {
        self.registry
            .snapshot()
            .nodes()
            .iter()
            .map(|n| n.status())
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<Arc<CacheNode>> {
        self.registry.snapshot().node(id).cloned()
    }

    /// Ring primary for `key`
    pub fn primary_for(&self, key: &str) -> Result<String> {
        let topology = self.registry.snapshot();
        topology
            .ring()
            .successor(HashRing::position_for(key))
            .map(str::to_string)
    }

    /// Replica set for `key`, primary first
    pub fn replicas_for(&self, key: &str) -> Result<Vec<String>> {
        let topology = self.registry.snapshot();
        Ok(topology
            .ring()
            .replica_set(HashRing::position_for(key), self.config.replication_factor)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Start the background health checker for this coordinator's nodes
    pub fn spawn_health_checker(&self) -> HealthCheckerHandle {
        HealthChecker::new(
            Arc::downgrade(&self.registry),
            HealthCheckConfig::from(&self.config),
        )
        .spawn()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Retry `op` against one node while it fails with transport errors
    async fn with_retry<T, F, Fut>(&self, node: &CacheNode, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transport() && attempt < attempts => {
                    debug!(node = node.id(), attempt, error = %e, "Retrying node call");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Fold replica results into the operation outcome
    fn settle<T>(
        &self,
        operation: &str,
        key: &str,
        replicas: &[Arc<CacheNode>],
        results: Vec<Result<T>>,
    ) -> bool {
        let attempted = results.len();
        let mut succeeded = 0;
        for (node, result) in replicas.iter().zip(results) {
            match result {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    self.metrics.record_error();
                    debug!(node = node.id(), operation, error = %e, "Replica call failed");
                }
            }
        }

        if succeeded == attempted {
            return true;
        }

        self.metrics.record_partial_replication();
        let partial = Error::PartialReplication {
            succeeded,
            attempted,
        };
        warn!(key, operation, error = %partial, "Replication degraded");
        false
    }
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("nodes", &self.registry.len())
            .field("strategy", &self.selector.strategy())
            .field("replication_factor", &self.config.replication_factor)
            .finish()
    }
}
