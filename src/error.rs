//! Error types for the distributed cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the distributed cache
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// No nodes are registered on the ring
    #[error("Hash ring is empty: no cache nodes registered")]
    EmptyRing,

    /// Node id is not known to the coordinator
    #[error("Cache node not found: {0}")]
    NodeNotFound(String),

    /// Node id is already registered
    #[error("Cache node already registered: {0}")]
    DuplicateNode(String),

    // =========================================================================
    // Node Errors (recovered inside the coordinator)
    // =========================================================================
    /// Transport failure talking to a node
    #[error("Cache node {node} unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },

    /// Node is marked disconnected, operation not attempted
    #[error("Cache node {0} is not connected")]
    NotConnected(String),

    /// Node call exceeded its per-call timeout
    #[error("Cache node {node} timed out after {timeout_ms}ms")]
    Timeout { node: String, timeout_ms: u64 },

    /// Not every replica acknowledged a write or delete
    #[error("Replication incomplete: {succeeded}/{attempted} replicas acknowledged")]
    PartialReplication { succeeded: usize, attempted: usize },

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed reply on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure came from the network path and may succeed on retry
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::NodeUnreachable { .. } | Error::Timeout { .. } | Error::Io(_) | Error::Protocol(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
