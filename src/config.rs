//! Cache Configuration
//!
//! All recognized coordinator options, loadable from YAML. Every field has a
//! default so a file only needs to name what it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::NodeSelectionStrategy;
use crate::error::{Error, Result};

/// Default virtual nodes per physical node
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Default replication factor (primary + one backup)
pub const DEFAULT_REPLICATION_FACTOR: usize = 2;

/// Default per-operation retry bound
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default health check interval in seconds
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// A node entry in the configured node list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable identifier, `host:port` when omitted
    #[serde(default)]
    pub id: Option<String>,
    /// Hostname or IP
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Relative share of the ring
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl NodeConfig {
    /// Create a node entry with weight 1
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: None,
            host: host.into(),
            port,
            weight: 1,
        }
    }

    /// Resolved node id
    pub fn node_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    /// Parse `host:port` (as given on the command line)
    pub fn parse(addr: &str) -> Result<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("expected host:port, got '{}'", addr)))?;
        if host.is_empty() {
            return Err(Error::Config(format!("missing host in '{}'", addr)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("invalid port in '{}': {}", addr, e)))?;
        Ok(Self::new(host, port))
    }
}

/// Value compression settings applied at the node boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Compress values at all
    pub enabled: bool,
    /// Values smaller than this are stored raw
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: 1024,
            level: 4,
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ring entries per unit of node weight
    pub virtual_nodes_per_physical: usize,
    /// Nodes (primary + backups) holding each key
    pub replication_factor: usize,
    /// Attempts per node before falling back
    pub retry_attempts: u32,
    /// Local tier entry bound
    pub local_tier_max_entries: usize,
    /// Optional local tier byte bound
    pub local_tier_max_bytes: Option<u64>,
    /// Local tier entry lifetime
    pub local_tier_ttl_seconds: u64,
    /// Health check period
    pub health_check_interval_seconds: u64,
    /// Errors tolerated before a node is marked disconnected
    pub node_failure_threshold: u32,
    /// Per node call timeout
    pub operation_timeout_ms: u64,
    /// Sleep after a failed health round
    pub health_check_backoff_seconds: u64,
    /// Time allowed for in-flight pings at shutdown
    pub shutdown_grace_ms: u64,
    /// Node selection among a key's replicas
    pub strategy: NodeSelectionStrategy,
    /// Value compression
    pub compression: CompressionSettings,
    /// Initial node list
    pub nodes: Vec<NodeConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            virtual_nodes_per_physical: DEFAULT_VIRTUAL_NODES,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            local_tier_max_entries: 10_000,
            local_tier_max_bytes: None,
            local_tier_ttl_seconds: 300,
            health_check_interval_seconds: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            node_failure_threshold: 3,
            operation_timeout_ms: 1000,
            health_check_backoff_seconds: 5,
            shutdown_grace_ms: 2000,
            strategy: NodeSelectionStrategy::default(),
            compression: CompressionSettings::default(),
            nodes: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Load and validate a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the coordinator cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.virtual_nodes_per_physical == 0 {
            return Err(Error::Config(
                "virtual_nodes_per_physical must be at least 1".into(),
            ));
        }
        if self.replication_factor == 0 {
            return Err(Error::Config("replication_factor must be at least 1".into()));
        }
        if self.retry_attempts == 0 {
            return Err(Error::Config("retry_attempts must be at least 1".into()));
        }
        if self.local_tier_max_entries == 0 {
            return Err(Error::Config(
                "local_tier_max_entries must be at least 1".into(),
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(Error::Config(
                "health_check_interval_seconds must be non-zero".into(),
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(Error::Config("operation_timeout_ms must be non-zero".into()));
        }
        for node in &self.nodes {
            if node.weight == 0 {
                return Err(Error::Config(format!(
                    "node {} has weight 0",
                    node.node_id()
                )));
            }
        }
        Ok(())
    }

    pub fn local_tier_ttl(&self) -> Duration {
        Duration::from_secs(self.local_tier_ttl_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn health_check_backoff(&self) -> Duration {
        Duration::from_secs(self.health_check_backoff_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
