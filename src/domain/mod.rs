//! Domain Layer
//!
//! Trait abstractions the cache core depends on.
//!
//! - **Ports** (`ports.rs`) - the `NodeBackend` transport abstraction
//!
//! # Usage
//!
//! ```ignore
//! use ringcache::domain::NodeBackend;
//!
//! async fn warm<B: NodeBackend>(backend: &B) -> Result<()> {
//!     backend.connect().await?;
//!     backend.ping().await
//! }
//! ```

pub mod ports;

pub use ports::NodeBackend;
