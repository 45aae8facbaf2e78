//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                 Ports (Traits): NodeBackend                 │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │      InMemoryBackend (DashMap)  │  RespBackend (redis)      │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ringcache::adapters::RespBackend;
//! use ringcache::domain::NodeBackend;
//!
//! let backend = RespBackend::new("10.0.0.5", 6379);
//! backend.connect().await?;
//! ```

mod memory;
pub mod resp;

pub use memory::{InMemoryBackend, MemoryBackendStats};
pub use resp::RespBackend;
