//! # Liveness Checker
//!
//! Periodically probes every registered node and writes the outcome back to
//! the registry: a successful probe makes a node `Active`, anything else
//! (error, timeout) makes it `Inactive`. Inactive nodes drop out of
//! role-filtered views and so out of failover, until a later sweep brings
//! them back.
//!
//! ## Design Decisions
//!
//! - **Independent timer.** Sweeps run on their own task and never block
//!   request handling. A request may see a node flip mid-flight; that is
//!   fine.
//! - **Isolated failures.** Probes run concurrently, each under its own
//!   timeout. One hung or failing node never delays or aborts the others.
//! - **Jitter.** Each sleep adds a random `[0, jitter]` so a fleet of
//!   gateways does not probe in lockstep.
//! - **Pluggable probe.** [`LivenessProbe`] is the seam; the default is an
//!   HTTP `GET /status` with a bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{NodeCallError, NodeClient};
use crate::config::LivenessConfig;
use crate::metrics::SharedMetrics;
use crate::registry::{Node, NodeRegistry, NodeRole, NodeStatus, NodeUpdate};

/// Node path probed by [`HttpStatusProbe`].
pub const STATUS_PATH: &str = "/status";

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// What a successful probe learned about the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Software version the node reported, if any.
    pub version: Option<String>,
}

/// A single reachability check against one node.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, node: &Node) -> Result<ProbeReport, NodeCallError>;
}

/// `GET {url}/status`; any 2xx JSON answer counts as alive.
pub struct HttpStatusProbe {
    client: Arc<dyn NodeClient>,
}

impl HttpStatusProbe {
    pub fn new(client: Arc<dyn NodeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LivenessProbe for HttpStatusProbe {
    async fn probe(&self, node: &Node) -> Result<ProbeReport, NodeCallError> {
        let body = self.client.get(node, STATUS_PATH).await?;
        Ok(ProbeReport {
            version: body
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Nodes probed and updated. Nodes removed mid-sweep are not counted.
    pub probed: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Drives periodic probes and applies the results to the registry.
pub struct LivenessChecker {
    registry: Arc<NodeRegistry>,
    probe: Arc<dyn LivenessProbe>,
    metrics: SharedMetrics,
    config: LivenessConfig,
}

impl LivenessChecker {
    pub fn new(
        registry: Arc<NodeRegistry>,
        probe: Arc<dyn LivenessProbe>,
        metrics: SharedMetrics,
        config: LivenessConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            metrics,
            config,
        }
    }

    /// Probes every registered node once, whatever its role or status.
    pub async fn sweep(&self) -> SweepReport {
        let nodes = self.registry.all();
        let timeout = self.config.probe_timeout();

        let outcomes = join_all(nodes.iter().map(|node| async move {
            let outcome = tokio::time::timeout(timeout, self.probe.probe(node))
                .await
                .unwrap_or(Err(NodeCallError::Timeout));
            (node, outcome)
        }))
        .await;

        let mut report = SweepReport::default();
        for (node, outcome) in outcomes {
            let update = match outcome {
                Ok(probe) => NodeUpdate {
                    status: Some(NodeStatus::Active),
                    version: probe.version,
                    ..NodeUpdate::default()
                },
                Err(e) => {
                    warn!(node_id = %node.id, url = %node.url, error = %e, "liveness probe failed");
                    NodeUpdate::status(NodeStatus::Inactive)
                }
            };

            match self.registry.update_status(&node.id, update) {
                Ok(updated) => {
                    report.probed += 1;
                    if updated.status == NodeStatus::Active {
                        report.active += 1;
                    } else {
                        report.inactive += 1;
                    }
                    if updated.status != node.status {
                        info!(
                            node_id = %node.id,
                            from = ?node.status,
                            to = ?updated.status,
                            "node status changed"
                        );
                    }
                }
                Err(_) => debug!(node_id = %node.id, "node removed during sweep"),
            }
        }

        self.record(&report);
        report
    }

    fn record(&self, report: &SweepReport) {
        let active: usize = NodeRole::ALL
            .iter()
            .map(|role| self.registry.count_by_role(*role))
            .sum();
        self.metrics.liveness_sweeps_total.inc();
        self.metrics.registered_nodes.set(self.registry.len() as i64);
        self.metrics.active_nodes.set(active as i64);
        debug!(
            probed = report.probed,
            active = report.active,
            inactive = report.inactive,
            "liveness sweep finished"
        );
    }

    fn next_delay(&self) -> Duration {
        let max = self.config.jitter();
        let jitter = if max.is_zero() {
            Duration::ZERO
        } else {
            max.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
        };
        self.config.interval() + jitter
    }

    /// Sweeps immediately, then every interval (plus jitter), until
    /// `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            probe_timeout_ms = self.config.probe_timeout_ms,
            "liveness checker starting"
        );

        loop {
            if *shutdown.borrow() {
                info!("liveness checker received shutdown signal, exiting");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.next_delay()) => {}
                _ = shutdown.changed() => {
                    info!("liveness checker shutting down during sleep");
                    return;
                }
            }
        }
    }

    /// Runs [`run`](Self::run) on its own task.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
