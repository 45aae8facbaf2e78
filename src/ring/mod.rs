//! Consistent Hash Ring
//!
//! Maps virtual-node positions to physical node ids.
//!
//! # Architecture
//!
//! ```text
//!                 0 ─────────────────────────────► 2^128
//!   positions:  ──a:3────b:17──────c:4───a:88────b:2──────►(wrap)
//!                      ▲
//!             key ─────┘ successor = b, next distinct = c
//! ```
//!
//! # Design
//!
//! - A ring is immutable once built. Topology changes build a new ring and
//!   swap it in, so readers never see a partial ring.
//! - Each node contributes `virtual_nodes_per_physical * weight` positions.
//! - Position collisions keep the first node inserted.

pub mod hasher;

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

pub use hasher::{KeyHasher, RingPosition};

/// Immutable consistent hash ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    /// Virtual nodes per unit of weight
    virtual_nodes_per_physical: usize,
    /// Ring position -> node id
    positions: BTreeMap<RingPosition, String>,
    /// Distinct node ids in insertion order
    node_ids: Vec<String>,
}

impl HashRing {
    /// Ring with no nodes
    pub fn empty(virtual_nodes_per_physical: usize) -> Self {
        Self {
            virtual_nodes_per_physical,
            positions: BTreeMap::new(),
            node_ids: Vec::new(),
        }
    }

    /// Build a ring from `(node_id, weight)` pairs
    pub fn build<'a, I>(virtual_nodes_per_physical: usize, members: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut ring = Self::empty(virtual_nodes_per_physical);

        for (node_id, weight) in members {
            if ring.node_ids.iter().any(|id| id == node_id) {
                continue;
            }
            ring.node_ids.push(node_id.to_string());

            let count = virtual_nodes_per_physical * weight.max(1) as usize;
            for index in 0..count {
                let vnode = KeyHasher::virtual_node_id(node_id, index);
                ring.positions
                    .entry(KeyHasher::ring_position_for(&vnode))
                    .or_insert_with(|| node_id.to_string());
            }
        }

        ring
    }

    /// Ring position for a key
    #[inline]
    pub fn position_for(key: &str) -> RingPosition {
        KeyHasher::ring_position_for(key)
    }

    /// Walk the ring clockwise from `position`, wrapping once
    fn walk(&self, position: RingPosition) -> impl Iterator<Item = (&RingPosition, &String)> {
        self.positions
            .range(position..)
            .chain(self.positions.range(..position))
    }

    /// Node owning the smallest position >= `position`, wrapping around
    pub fn successor(&self, position: RingPosition) -> Result<&str> {
        self.walk(position)
            .next()
            .map(|(_, id)| id.as_str())
            .ok_or(Error::EmptyRing)
    }

    /// The `n`th distinct node clockwise from `position` (0 = primary).
    ///
    /// Returns `Ok(None)` when the ring holds fewer than `n + 1` nodes.
    pub fn nth_successor(&self, position: RingPosition, n: usize) -> Result<Option<&str>> {
        if self.positions.is_empty() {
            return Err(Error::EmptyRing);
        }
        Ok(self.distinct_from(position).nth(n))
    }

    /// Primary plus up to `count - 1` distinct backups, in ring order
    pub fn replica_set(&self, position: RingPosition, count: usize) -> Result<Vec<&str>> {
        if self.positions.is_empty() {
            return Err(Error::EmptyRing);
        }
        Ok(self.distinct_from(position).take(count).collect())
    }

    fn distinct_from(&self, position: RingPosition) -> impl Iterator<Item = &str> {
        let total = self.node_ids.len();
        let mut seen: Vec<&str> = Vec::with_capacity(total);
        self.walk(position)
            .map(|(_, id)| id.as_str())
            .filter(move |id| {
                if seen.contains(id) {
                    false
                } else {
                    seen.push(*id);
                    true
                }
            })
            .take(total)
    }

    /// Number of ring positions
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the ring has no positions
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of physical nodes
    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    /// Whether a node is on the ring
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node_ids.iter().any(|id| id == node_id)
    }

    /// Virtual node configuration the ring was built with
    pub fn virtual_nodes_per_physical(&self) -> usize {
        self.virtual_nodes_per_physical
    }

    /// Positions owned by each node
    pub fn position_counts(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for id in self.positions.values() {
            *counts.entry(id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Ordered view of all positions
    pub fn positions(&self) -> impl Iterator<Item = (RingPosition, &str)> {
        self.positions.iter().map(|(p, id)| (*p, id.as_str()))
    }
}
