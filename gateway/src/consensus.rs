//! # Height Consensus
//!
//! Estimates the network's chain height by asking every active full node and
//! validator for its own height and taking the most common answer.
//!
//! This is a statistical read, not agreement: nodes are not authenticated,
//! nothing is voted on, and the result is only as good as the nodes we can
//! reach. The confidence figure makes that visible. It is the share of
//! *attempted* nodes that reported the winning height, so an unreachable
//! node drags confidence down the same way a dissenting one does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{bounded, NodeCallError, NodeClient};
use crate::metrics::SharedMetrics;
use crate::registry::{Node, NodeRegistry, NodeRole};

/// Node path that reports a node's own height as `{"height": n}`.
pub const HEIGHT_PATH: &str = "/blocks/height";

/// Majority height and how much of the queried network agreed with it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusHeight {
    pub height: u64,
    /// `agreeing / attempted * 100`, in `[0, 100]`.
    pub confidence_percentage: f64,
}

impl ConsensusHeight {
    /// The estimate when nobody answered.
    pub const UNKNOWN: ConsensusHeight = ConsensusHeight {
        height: 0,
        confidence_percentage: 0.0,
    };
}

/// Picks the most frequently reported height.
///
/// `samples` are streamed in scan order and the leader only changes when a
/// height's running count strictly exceeds the leader's, so among tied
/// heights the one that reached the top count first wins. `total` is the
/// number of nodes attempted, including those that did not answer, and is
/// the confidence denominator.
pub fn tally_majority(samples: &[u64], total: usize) -> ConsensusHeight {
    if total == 0 || samples.is_empty() {
        return ConsensusHeight::UNKNOWN;
    }

    let mut counts: HashMap<u64, usize> = HashMap::with_capacity(samples.len());
    let mut best = (0u64, 0usize);
    for &height in samples {
        let n = counts.entry(height).or_insert(0);
        *n += 1;
        if *n > best.1 {
            best = (height, *n);
        }
    }

    ConsensusHeight {
        height: best.0,
        confidence_percentage: best.1 as f64 / total as f64 * 100.0,
    }
}

/// Queries node heights and reduces them with [`tally_majority`].
pub struct ConsensusEstimator {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    metrics: SharedMetrics,
    call_timeout: Duration,
}

impl ConsensusEstimator {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        metrics: SharedMetrics,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            metrics,
            call_timeout,
        }
    }

    /// Asks every active full node and validator, concurrently, for its height.
    pub async fn compute_height(&self) -> ConsensusHeight {
        let candidates: Vec<Node> = [NodeRole::Full, NodeRole::Validator]
            .into_iter()
            .flat_map(|role| self.registry.list_by_role(role))
            .collect();
        let total = candidates.len();

        // join_all keeps input order, so samples stay in scan order.
        let results = join_all(candidates.iter().map(|node| async move {
            self.metrics.upstream_requests_total.inc();
            let result = bounded(self.call_timeout, self.client.get(node, HEIGHT_PATH)).await;
            (node, result.and_then(|body| reported_height(&body)))
        }))
        .await;

        let mut samples = Vec::with_capacity(total);
        for (node, result) in results {
            match result {
                Ok(height) => samples.push(height),
                Err(e) => {
                    self.metrics.node_request_failures_total.inc();
                    warn!(node_id = %node.id, error = %e, "height query failed");
                }
            }
        }

        let estimate = tally_majority(&samples, total);
        self.metrics
            .consensus_height
            .set(i64::try_from(estimate.height).unwrap_or(i64::MAX));
        self.metrics
            .consensus_confidence
            .set(estimate.confidence_percentage.round() as i64);
        debug!(
            height = estimate.height,
            confidence = estimate.confidence_percentage,
            responded = samples.len(),
            attempted = total,
            "consensus height computed"
        );
        estimate
    }
}

fn reported_height(body: &Value) -> Result<u64, NodeCallError> {
    body.get("height")
        .and_then(Value::as_u64)
        .ok_or_else(|| NodeCallError::Decode("missing or non-integer 'height'".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use crate::test_support::{registry_with, unreachable, ScriptedClient};
    use serde_json::json;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.01,
            "expected ~{}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn majority_of_three() {
        let result = tally_majority(&[10, 10, 12], 3);
        assert_eq!(result.height, 10);
        assert_close(result.confidence_percentage, 66.67);
    }

    #[test]
    fn ties_go_to_first_height_reaching_top_count() {
        // 10 reaches two votes before 12 does.
        let result = tally_majority(&[12, 10, 10, 12], 4);
        assert_eq!(result.height, 10);
        assert_close(result.confidence_percentage, 50.0);

        let result = tally_majority(&[12, 10, 12, 10], 4);
        assert_eq!(result.height, 12);
        assert_close(result.confidence_percentage, 50.0);
    }

    #[test]
    fn no_samples_or_no_nodes_is_zero() {
        assert_eq!(tally_majority(&[], 3), ConsensusHeight::UNKNOWN);
        assert_eq!(tally_majority(&[], 0), ConsensusHeight::UNKNOWN);
        assert!(!tally_majority(&[], 3).confidence_percentage.is_nan());
    }

    #[test]
    fn silent_nodes_lower_confidence() {
        let result = tally_majority(&[7], 4);
        assert_eq!(result.height, 7);
        assert_close(result.confidence_percentage, 25.0);
    }

    fn estimator(client: Arc<ScriptedClient>, nodes: &[(&str, NodeRole)]) -> (ConsensusEstimator, SharedMetrics) {
        let metrics = GatewayMetrics::shared();
        let est = ConsensusEstimator::new(
            registry_with(nodes),
            client,
            metrics.clone(),
            Duration::from_secs(1),
        );
        (est, metrics)
    }

    #[tokio::test]
    async fn compute_height_counts_unreachable_nodes_in_total() {
        let client = ScriptedClient::new();
        client.on_get("full-1", HEIGHT_PATH, Ok(json!({ "height": 10 })));
        client.on_get("full-2", HEIGHT_PATH, Ok(json!({ "height": 10 })));
        client.on_get("val-1", HEIGHT_PATH, Ok(json!({ "height": 12 })));
        client.on_get("val-2", HEIGHT_PATH, unreachable());
        let (est, metrics) = estimator(
            client.clone(),
            &[
                ("val-1", NodeRole::Validator),
                ("full-1", NodeRole::Full),
                ("val-2", NodeRole::Validator),
                ("full-2", NodeRole::Full),
                ("seed-1", NodeRole::Seed),
            ],
        );

        let result = est.compute_height().await;
        assert_eq!(result.height, 10);
        assert_close(result.confidence_percentage, 50.0);
        assert_eq!(client.call_count(), 4, "seed nodes are not asked");
        assert_eq!(metrics.consensus_height.get(), 10);
        assert_eq!(metrics.consensus_confidence.get(), 50);
    }

    #[tokio::test]
    async fn no_responses_yields_zero() {
        let client = ScriptedClient::new();
        client.on_get("full-1", HEIGHT_PATH, Ok(json!({ "height": "tall" })));
        let (est, _) = estimator(
            client,
            &[
                ("full-1", NodeRole::Full),
                ("full-2", NodeRole::Full),
                ("val-1", NodeRole::Validator),
            ],
        );

        assert_eq!(est.compute_height().await, ConsensusHeight::UNKNOWN);
    }

    #[tokio::test]
    async fn empty_registry_yields_zero_without_calls() {
        let client = ScriptedClient::new();
        let (est, _) = estimator(client.clone(), &[]);
        assert_eq!(est.compute_height().await, ConsensusHeight::UNKNOWN);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn scan_order_is_full_nodes_then_validators() {
        let client = ScriptedClient::new();
        // One vote each: the first node scanned decides the tie.
        client.on_get("val-1", HEIGHT_PATH, Ok(json!({ "height": 5 })));
        client.on_get("full-1", HEIGHT_PATH, Ok(json!({ "height": 6 })));
        let (est, _) = estimator(
            client,
            &[("val-1", NodeRole::Validator), ("full-1", NodeRole::Full)],
        );

        assert_eq!(est.compute_height().await.height, 6);
    }
}
