//! Cache Metrics
//!
//! Lock-free counters updated on the data path, a serializable snapshot,
//! and a Prometheus text exporter.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::NodeStatus;

/// Data path counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    local_hits: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    partial_replications: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A hit served by the local tier, counted as a hit too
    #[inline]
    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
        self.record_hit();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partial_replication(&self) {
        self.partial_replications.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot; node and local tier figures are filled in
    /// by the caller
    pub fn snapshot(
        &self,
        node_count: usize,
        connected_node_count: usize,
        local_entries: usize,
    ) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        MetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            node_count,
            connected_node_count,
            local_hits: self.local_hits.load(Ordering::Relaxed),
            local_entries,
            partial_replications: self.partial_replications.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    /// hits / (hits + misses), 0 when nothing was read
    pub hit_rate: f64,
    pub node_count: usize,
    pub connected_node_count: usize,
    pub local_hits: u64,
    pub local_entries: usize,
    pub partial_replications: u64,
}

// =============================================================================
// Prometheus Exporter
// =============================================================================

/// Renders snapshots in the Prometheus text format.
///
/// Owns its registry so several coordinators in one process do not collide.
pub struct PrometheusExporter {
    registry: Registry,
    operations: IntGaugeVec,
    hit_rate: Gauge,
    nodes: IntGaugeVec,
    local_entries: IntGauge,
    node_connected: IntGaugeVec,
    node_errors: IntGaugeVec,
    node_response_ms: GaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntGaugeVec::new(
            Opts::new("ringcache_operations", "Cache operations by outcome"),
            &["kind"],
        )
        .map_err(prom_err)?;
        let hit_rate = Gauge::new("ringcache_hit_rate", "Hits over hits plus misses")
            .map_err(prom_err)?;
        let nodes = IntGaugeVec::new(
            Opts::new("ringcache_nodes", "Registered cache nodes by connection state"),
            &["state"],
        )
        .map_err(prom_err)?;
        let local_entries = IntGauge::new("ringcache_local_entries", "Entries in the local tier")
            .map_err(prom_err)?;
        let node_connected = IntGaugeVec::new(
            Opts::new("ringcache_node_connected", "1 when the node is connected"),
            &["node"],
        )
        .map_err(prom_err)?;
        let node_errors = IntGaugeVec::new(
            Opts::new("ringcache_node_errors", "Consecutive errors per node"),
            &["node"],
        )
        .map_err(prom_err)?;
        let node_response_ms = GaugeVec::new(
            Opts::new(
                "ringcache_node_response_time_ms",
                "Last observed response time per node",
            ),
            &["node"],
        )
        .map_err(prom_err)?;

        registry.register(Box::new(operations.clone())).map_err(prom_err)?;
        registry.register(Box::new(hit_rate.clone())).map_err(prom_err)?;
        registry.register(Box::new(nodes.clone())).map_err(prom_err)?;
        registry.register(Box::new(local_entries.clone())).map_err(prom_err)?;
        registry.register(Box::new(node_connected.clone())).map_err(prom_err)?;
        registry.register(Box::new(node_errors.clone())).map_err(prom_err)?;
        registry.register(Box::new(node_response_ms.clone())).map_err(prom_err)?;

        Ok(Self {
            registry,
            operations,
            hit_rate,
            nodes,
            local_entries,
            node_connected,
            node_errors,
            node_response_ms,
        })
    }

    /// Update the gauges and encode the registry
    pub fn render(&self, snapshot: &MetricsSnapshot, nodes: &[NodeStatus]) -> Result<String> {
        for (kind, value) in [
            ("hit", snapshot.hits),
            ("miss", snapshot.misses),
            ("local_hit", snapshot.local_hits),
            ("set", snapshot.sets),
            ("delete", snapshot.deletes),
            ("error", snapshot.errors),
            ("partial_replication", snapshot.partial_replications),
        ] {
            self.operations.with_label_values(&[kind]).set(value as i64);
        }
        self.hit_rate.set(snapshot.hit_rate);
        self.nodes
            .with_label_values(&["connected"])
            .set(snapshot.connected_node_count as i64);
        self.nodes
            .with_label_values(&["disconnected"])
            .set((snapshot.node_count - snapshot.connected_node_count) as i64);
        self.local_entries.set(snapshot.local_entries as i64);

        // Removed nodes must not linger
        self.node_connected.reset();
        self.node_errors.reset();
        self.node_response_ms.reset();
        for node in nodes {
            let labels = [node.id.as_str()];
            self.node_connected
                .with_label_values(&labels)
                .set(i64::from(node.connected));
            self.node_errors
                .with_label_values(&labels)
                .set(i64::from(node.error_count));
            self.node_response_ms
                .with_label_values(&labels)
                .set(node.response_time_ms);
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}
