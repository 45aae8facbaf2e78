//! Node selection among a key's replicas

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::CacheNode;

/// How the coordinator picks which replica serves a read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSelectionStrategy {
    /// Always the ring primary
    #[default]
    ConsistentHash,
    /// Connected replica with the lowest observed response time
    LeastLatency,
    /// Rotate across replicas
    RoundRobin,
}

impl std::fmt::Display for NodeSelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeSelectionStrategy::ConsistentHash => write!(f, "consistent_hash"),
            NodeSelectionStrategy::LeastLatency => write!(f, "least_latency"),
            NodeSelectionStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Applies a [`NodeSelectionStrategy`] to ring-ordered candidates
#[derive(Debug)]
pub struct NodeSelector {
    strategy: NodeSelectionStrategy,
    cursor: AtomicUsize,
}

impl NodeSelector {
    pub fn new(strategy: NodeSelectionStrategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> NodeSelectionStrategy {
        self.strategy
    }

    /// Index into `candidates` of the node to try first.
    ///
    /// `candidates` is in ring order with the primary first; an empty slice
    /// yields 0.
    pub fn select(&self, candidates: &[Arc<CacheNode>]) -> usize {
        if candidates.len() <= 1 {
            return 0;
        }

        match self.strategy {
            NodeSelectionStrategy::ConsistentHash => 0,
            NodeSelectionStrategy::LeastLatency => candidates
                .iter()
                .enumerate()
                .filter(|(_, node)| node.is_connected())
                .min_by(|(_, a), (_, b)| a.response_time_ms().total_cmp(&b.response_time_ms()))
                .map(|(index, _)| index)
                .unwrap_or(0),
            NodeSelectionStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len()
            }
        }
    }
}
