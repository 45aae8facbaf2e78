//! RingCache - Distributed Cache Coordinator
//!
//! A cache client that spreads keys over a set of backing nodes with a
//! consistent-hash ring, replicates each key to a primary plus backups, and
//! keeps a bounded in-process tier in front of the network.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DistributedCache                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Local Tier  │───▶│  Hash Ring   │───▶│  Cache Nodes │       │
//! │  │  (LRU + TTL) │    │  (vnodes)    │    │  (backends)  │       │
//! │  └──────────────┘    └──────────────┘    └──────▲───────┘       │
//! │                                                 │               │
//! │                                        ┌────────┴───────┐       │
//! │                                        │ Health Checker │       │
//! │                                        └────────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ringcache::{CacheConfig, DistributedCache};
//!
//! # async fn demo() -> ringcache::Result<()> {
//! let cache = DistributedCache::with_resp_backends(CacheConfig::default())?;
//! cache.add_node("cache-a", "10.0.0.1", 6379, 1).await;
//! cache.add_node("cache-b", "10.0.0.2", 6379, 1).await;
//!
//! cache.set("keyword:rust", "1300", None).await?;
//! let volume = cache.get("keyword:rust").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Node backends (in-memory, Redis)
//! - [`config`] - Coordinator configuration
//! - [`coordinator`] - Public cache API, replication, node selection, metrics
//! - [`domain`] - Ports implemented by the adapters
//! - [`error`] - Error types
//! - [`health`] - Background node health checking
//! - [`local`] - In-process local tier
//! - [`memoize`] - Function-result caching
//! - [`node`] - Cache node state and value codec
//! - [`ring`] - Consistent hash ring

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod health;
pub mod local;
pub mod memoize;
pub mod node;
pub mod ring;

// Re-export commonly used types
pub use config::{CacheConfig, NodeConfig};
pub use coordinator::{DistributedCache, MetricsSnapshot, NodeSelectionStrategy};
pub use error::{Error, Result};
pub use health::{HealthChecker, HealthCheckerHandle};
pub use memoize::Memoized;
pub use node::{CacheNode, NodeState, NodeStatus};
pub use ring::HashRing;
