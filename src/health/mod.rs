//! Health Checker
//!
//! Background loop, one per coordinator, that pings connected nodes and
//! reconnects disconnected ones.
//!
//! # Node State Machine
//!
//! ```text
//!   Connected ──ping fails──► Degraded ──errors > threshold──► Unreachable
//!       ▲                        │                                │
//!       └──────ping succeeds─────┘◄────────connect succeeds───────┘
//! ```
//!
//! Nodes never leave the ring here; only an explicit `remove_node` does that.
//!
//! # Design
//!
//! - The checker holds a `Weak` reference to the node registry. It never
//!   keeps the coordinator alive and stops once the registry is dropped.
//! - Each round checks nodes concurrently in a `JoinSet`, so a panicking
//!   check is contained and reported instead of killing the loop.
//! - A failed round is logged and followed by a back-off sleep.
//! - Shutdown is cooperative: in-flight checks get a grace period, then are
//!   aborted.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::coordinator::NodeRegistry;
use crate::error::{Error, Result};
use crate::node::CacheNode;

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Time between rounds
    pub interval: Duration,
    /// Errors tolerated before a node is marked disconnected
    pub failure_threshold: u32,
    /// Sleep after a failed round
    pub backoff: Duration,
    /// Time allowed for in-flight checks at shutdown
    pub grace: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for HealthCheckConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            interval: config.health_check_interval(),
            failure_threshold: config.node_failure_threshold,
            backoff: config.health_check_backoff(),
            grace: config.shutdown_grace(),
        }
    }
}

/// Outcome of checking one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeOutcome {
    Healthy,
    Degraded,
    MarkedDown,
    Reconnected,
    StillDown,
}

/// Summary of one health round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthRoundReport {
    pub checked: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub marked_down: usize,
    pub reconnected: usize,
    pub still_down: usize,
    /// Checks that panicked instead of completing
    pub panicked: usize,
}

impl HealthRoundReport {
    fn record(&mut self, outcome: NodeOutcome) {
        match outcome {
            NodeOutcome::Healthy => self.healthy += 1,
            NodeOutcome::Degraded => self.degraded += 1,
            NodeOutcome::MarkedDown => self.marked_down += 1,
            NodeOutcome::Reconnected => self.reconnected += 1,
            NodeOutcome::StillDown => self.still_down += 1,
        }
    }

    /// Whether any node changed connection state this round
    pub fn has_transitions(&self) -> bool {
        self.marked_down > 0 || self.reconnected > 0
    }
}

/// Periodic node health checker
#[derive(Debug, Clone)]
pub struct HealthChecker {
    registry: Weak<NodeRegistry>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(registry: Weak<NodeRegistry>, config: HealthCheckConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Check every node once
    pub async fn check_once(&self) -> Result<HealthRoundReport> {
        let nodes = self
            .registry
            .upgrade()
            .ok_or_else(|| Error::Internal("node registry dropped".into()))?
            .nodes();

        let mut report = HealthRoundReport {
            checked: nodes.len(),
            ..Default::default()
        };

        let mut checks = JoinSet::new();
        for node in nodes {
            checks.spawn(check_node(node, self.config.failure_threshold));
        }

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.panicked += 1;
                    error!(error = %e, "Node health check did not complete");
                }
            }
        }

        Ok(report)
    }

    /// Run the loop on the current runtime
    pub fn spawn(self) -> HealthCheckerHandle {
        let token = CancellationToken::new();
        let grace = self.config.grace;
        let join = tokio::spawn(self.run(token.clone()));
        HealthCheckerHandle { token, join, grace }
    }

    async fn run(self, token: CancellationToken) {
        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            threshold = self.config.failure_threshold,
            "Health checker started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }

            let round = self.check_once();
            tokio::pin!(round);
            let finished = tokio::select! {
                result = &mut round => Some(result),
                _ = token.cancelled() => None,
            };
            let stopping = finished.is_none();
            let result = match finished {
                Some(result) => Some(result),
                None => timeout(self.config.grace, &mut round).await.ok(),
            };

            let failed = match result {
                Some(Ok(report)) if report.panicked > 0 => {
                    error!(panicked = report.panicked, "Health round incomplete");
                    true
                }
                Some(Ok(report)) => {
                    if report.has_transitions() {
                        info!(?report, "Health round changed node states");
                    } else {
                        debug!(?report, "Health round complete");
                    }
                    false
                }
                Some(Err(e)) => {
                    if self.registry.strong_count() == 0 {
                        info!("Node registry dropped, health checker exiting");
                        break;
                    }
                    error!(error = %e, "Health round failed");
                    true
                }
                None => {
                    warn!(
                        grace_ms = self.config.grace.as_millis() as u64,
                        "In-flight health checks abandoned after grace period"
                    );
                    false
                }
            };

            if stopping {
                break;
            }

            if failed {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(self.config.backoff) => {}
                }
            }
        }

        info!("Health checker stopped");
    }
}

async fn check_node(node: Arc<CacheNode>, failure_threshold: u32) -> NodeOutcome {
    if node.is_connected() {
        match node.ping().await {
            Ok(()) => NodeOutcome::Healthy,
            Err(e) => {
                let errors = node.error_count();
                if errors > failure_threshold {
                    node.mark_disconnected();
                    NodeOutcome::MarkedDown
                } else {
                    debug!(node = node.id(), errors, error = %e, "Health ping failed");
                    NodeOutcome::Degraded
                }
            }
        }
    } else {
        match node.connect().await {
            Ok(()) => {
                info!(node = node.id(), "Cache node reconnected");
                NodeOutcome::Reconnected
            }
            Err(_) => NodeOutcome::StillDown,
        }
    }
}

/// Handle to a running health checker
#[derive(Debug)]
pub struct HealthCheckerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
    grace: Duration,
}

impl HealthCheckerHandle {
    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the loop to stop without waiting
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the loop and wait for it; `false` if it did not exit cleanly
    pub async fn shutdown(mut self) -> bool {
        self.token.cancel();

        // The loop itself bounds in-flight work by `grace`
        match timeout(self.grace + Duration::from_millis(100), &mut self.join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Health checker task failed");
                false
            }
            Err(_) => {
                warn!("Health checker did not stop in time, aborting");
                self.join.abort();
                false
            }
        }
    }
}
