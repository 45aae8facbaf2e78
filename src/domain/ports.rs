//! Domain Ports (Port/Adapter Pattern)
//!
//! The coordinator and its nodes depend only on the traits in this module.
//! Infrastructure adapters provide the concrete transports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │                     NodeBackend                      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │          InMemoryBackend │ RespBackend               │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

// =============================================================================
// Node Backend Port
// =============================================================================

/// Port for the backing store behind a single cache node.
///
/// Implementations own their connection handling (pooling, reconnects) and
/// must be safe to call concurrently. Values are opaque encoded bytes; the
/// node layer handles compression.
///
/// # Example
///
/// ```ignore
/// struct RedisBackend { /* ... */ }
///
/// #[async_trait]
/// impl NodeBackend for RedisBackend {
///     async fn get(&self, key: &str) -> Result<Option<Bytes>> {
///         // GET key
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait NodeBackend: Send + Sync {
    /// Establish (or re-establish) the connection
    async fn connect(&self) -> Result<()>;

    /// Drop the connection
    async fn disconnect(&self);

    /// Lightweight liveness probe
    async fn ping(&self) -> Result<()>;

    /// Fetch a value, `Ok(None)` when absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value with an optional expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Remove a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every value
    async fn clear(&self) -> Result<()>;

    /// Human-readable backend name for logs
    fn kind(&self) -> &'static str;
}
