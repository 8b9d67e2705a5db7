//! # Chain Service
//!
//! One method per inbound API operation. This is the only type the HTTP
//! layer talks to; it owns the read engine, the consensus estimator and the
//! broadcaster, and decides per operation which node roles to ask, which
//! path to call, how to key the cache and for how long.
//!
//! | Operation | Tiers | Node path | Cache key |
//! |---|---|---|---|
//! | [`latest_blocks`](ChainService::latest_blocks) | full → validator | `/blocks/latest?limit=N` | `latest_blocks:N` |
//! | [`block_by_hash`](ChainService::block_by_hash) | full → validator | `/blocks/{hash}` | `block:{hash}` |
//! | [`blocks_by_type`](ChainService::blocks_by_type) | full → validator | `/blocks/type/{type}` | `blocks_by_type:{type}` |
//! | [`transaction_by_hash`](ChainService::transaction_by_hash) | full → validator | `/transactions/{hash}` | `transaction:{hash}` |
//! | [`chain_height`](ChainService::chain_height) | consensus | `/blocks/height` | not cached |
//! | [`validators`](ChainService::validators) | validator | `/status` | not cached |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::aggregation::{AggregationGateway, ResourceQuery};
use crate::broadcaster::{SubmitReceipt, Transaction, TransactionBroadcaster};
use crate::cache::CacheLayer;
use crate::client::{bounded, NodeClient};
use crate::config::{
    CacheTtlConfig, GatewayConfig, DEFAULT_LATEST_BLOCKS_LIMIT, MAX_LATEST_BLOCKS_LIMIT,
    SUBMISSION_COUNTER_KEY,
};
use crate::consensus::{ConsensusEstimator, ConsensusHeight};
use crate::error::GatewayError;
use crate::liveness::STATUS_PATH;
use crate::metrics::SharedMetrics;
use crate::registry::{Node, NodeRegistry, NodeRole};
use crate::throughput::ThroughputMeter;

/// Role preference for every read that is not validator-specific.
const READ_TIERS: &[NodeRole] = &[NodeRole::Full, NodeRole::Validator];

/// Keys of [`ValidatorView`] the gateway sets itself after the merge.
const GATEWAY_VIEW_KEYS: &[&str] = &["is_active", "last_error"];

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// A validator as the registry knows it, enriched with what the validator
/// just reported about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatorView {
    /// Registry record the view was built from.
    #[serde(skip)]
    pub node: Node,
    /// Registry fields with the validator's `/status` answer laid over them.
    /// Where both name a field, the validator's value wins.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Whether the validator answered its status query just now.
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Active node counts per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub validators: usize,
    pub full_nodes: usize,
    pub seed_nodes: usize,
    pub total: usize,
}

/// Network overview served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub block_height: u64,
    pub consensus_percentage: f64,
    pub nodes: NodeCounts,
    /// Accepted submissions per second through this gateway.
    pub tps: f64,
    /// Accepted submissions across every gateway sharing the cache, or
    /// through this one when the shared counter is unavailable.
    pub transactions_submitted: u64,
    pub timestamp: DateTime<Utc>,
    pub network_version: String,
}

// ---------------------------------------------------------------------------
// ChainService
// ---------------------------------------------------------------------------

pub struct ChainService {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    cache: CacheLayer,
    reads: AggregationGateway,
    consensus: ConsensusEstimator,
    broadcaster: TransactionBroadcaster,
    meter: Arc<ThroughputMeter>,
    metrics: SharedMetrics,
    ttl: CacheTtlConfig,
    network_version: String,
    call_timeout: Duration,
}

impl ChainService {
    /// Wires every component from `config` around the shared handles.
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        cache: CacheLayer,
        metrics: SharedMetrics,
    ) -> Self {
        let call_timeout = config.node_timeout();
        let meter = Arc::new(ThroughputMeter::new(config.throughput_window()));

        Self {
            reads: AggregationGateway::new(
                Arc::clone(&registry),
                Arc::clone(&client),
                cache.clone(),
                Arc::clone(&metrics),
                call_timeout,
            ),
            consensus: ConsensusEstimator::new(
                Arc::clone(&registry),
                Arc::clone(&client),
                Arc::clone(&metrics),
                call_timeout,
            ),
            broadcaster: TransactionBroadcaster::new(
                Arc::clone(&registry),
                Arc::clone(&client),
                cache.clone(),
                Arc::clone(&meter),
                Arc::clone(&metrics),
                call_timeout,
            ),
            registry,
            client,
            cache,
            meter,
            metrics,
            ttl: config.ttl.clone(),
            network_version: config.network_version.clone(),
            call_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Name of the active cache backend.
    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend()
    }

    // -- reads ----------------------------------------------------------------

    /// Most recent blocks. Always an array; empty when no node answered.
    pub async fn latest_blocks(&self, limit: Option<usize>) -> Value {
        let limit = clamp_limit(limit);
        let query = ResourceQuery::new(
            READ_TIERS,
            format!("/blocks/latest?limit={}", limit),
            format!("latest_blocks:{}", limit),
            self.ttl.latest_blocks_secs,
        )
        .project("blocks");
        self.reads.fetch_resource(&query).await.unwrap_or_else(|| json!([]))
    }

    /// A block by hash, or `None` if no node had it (or none answered).
    pub async fn block_by_hash(&self, hash: &str) -> Option<Value> {
        let query = ResourceQuery::new(
            READ_TIERS,
            format!("/blocks/{}", encode_segment(hash)),
            format!("block:{}", hash),
            self.ttl.block_secs,
        );
        self.reads.fetch_resource(&query).await.filter(|v| !v.is_null())
    }

    /// Blocks of one type. Always an array; empty when no node answered.
    pub async fn blocks_by_type(&self, block_type: &str) -> Value {
        let query = ResourceQuery::new(
            READ_TIERS,
            format!("/blocks/type/{}", encode_segment(block_type)),
            format!("blocks_by_type:{}", block_type),
            self.ttl.blocks_by_type_secs,
        )
        .project("blocks");
        self.reads.fetch_resource(&query).await.unwrap_or_else(|| json!([]))
    }

    /// A transaction by hash, or `None` if no node had it.
    pub async fn transaction_by_hash(&self, hash: &str) -> Option<Value> {
        let query = ResourceQuery::new(
            READ_TIERS,
            format!("/transactions/{}", encode_segment(hash)),
            format!("transaction:{}", hash),
            self.ttl.transaction_secs,
        );
        self.reads.fetch_resource(&query).await.filter(|v| !v.is_null())
    }

    pub async fn chain_height(&self) -> ConsensusHeight {
        self.consensus.compute_height().await
    }

    /// Every active validator with a fresh status report. Validators that do
    /// not answer are listed with `is_active: false` and the reason.
    pub async fn validators(&self) -> Vec<ValidatorView> {
        let validators = self.registry.list_by_role(NodeRole::Validator);
        let reports = join_all(validators.iter().map(|node| {
            bounded(self.call_timeout, self.client.get(node, STATUS_PATH))
        }))
        .await;

        validators
            .into_iter()
            .zip(reports)
            .map(|(node, report)| match report {
                Ok(body) => ValidatorView {
                    fields: merge_report(&node, body),
                    node,
                    is_active: true,
                    last_error: None,
                },
                Err(e) => {
                    warn!(node_id = %node.id, error = %e, "validator status query failed");
                    ValidatorView {
                        fields: merge_report(&node, Value::Null),
                        node,
                        is_active: false,
                        last_error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    /// Consensus height, node counts and throughput in one view.
    pub async fn network_status(&self) -> NetworkStatus {
        let height = self.chain_height().await;
        let nodes = self.node_counts();

        let shared_total = self
            .cache
            .get(SUBMISSION_COUNTER_KEY)
            .await
            .and_then(|raw| raw.parse::<u64>().ok());

        NetworkStatus {
            block_height: height.height,
            consensus_percentage: height.confidence_percentage,
            nodes,
            tps: self.meter.tps(),
            transactions_submitted: shared_total.unwrap_or_else(|| self.meter.total()),
            timestamp: Utc::now(),
            network_version: self.network_version.clone(),
        }
    }

    /// Active node counts per role. Also refreshes the node gauges.
    pub fn node_counts(&self) -> NodeCounts {
        let validators = self.registry.count_by_role(NodeRole::Validator);
        let full_nodes = self.registry.count_by_role(NodeRole::Full);
        let seed_nodes = self.registry.count_by_role(NodeRole::Seed);
        let total = validators + full_nodes + seed_nodes;

        self.metrics.active_nodes.set(total as i64);
        self.metrics.registered_nodes.set(self.registry.len() as i64);

        NodeCounts {
            validators,
            full_nodes,
            seed_nodes,
            total,
        }
    }

    // -- writes ---------------------------------------------------------------

    pub async fn submit_transaction(&self, tx: &Transaction) -> Result<SubmitReceipt, GatewayError> {
        self.broadcaster.submit(tx).await
    }

    // -- cache ----------------------------------------------------------------

    pub async fn cache_healthy(&self) -> bool {
        self.cache.health_check().await
    }

    /// Drops every cached entry. Returns `false` if the backend refused.
    pub async fn flush_cache(&self) -> bool {
        self.cache.flush_all().await
    }
}

/// Applies the default and bounds to a requested block-list size.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_LATEST_BLOCKS_LIMIT)
        .clamp(1, MAX_LATEST_BLOCKS_LIMIT)
}

/// Registry record overlaid with a validator's report. Non-object reports
/// add nothing.
fn merge_report(node: &Node, report: Value) -> Map<String, Value> {
    let mut fields = match serde_json::to_value(node) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Value::Object(reported) = report {
        fields.extend(reported);
    }
    fields.retain(|key, _| !GATEWAY_VIEW_KEYS.contains(&key.as_str()));
    fields
}

/// Percent-encodes a client-supplied value for use as one URL path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NodeCallError;
    use crate::consensus::HEIGHT_PATH;
    use crate::registry::NodeStatus;
    use crate::test_support::{memory_cache, registry_with, unreachable, ScriptedClient};

    fn service(nodes: &[(&str, NodeRole)]) -> (ChainService, Arc<ScriptedClient>) {
        let client = ScriptedClient::new();
        let (cache, metrics) = memory_cache();
        let config = GatewayConfig {
            network_version: "2.0.0".into(),
            ..GatewayConfig::default()
        };
        let svc = ChainService::new(&config, registry_with(nodes), client.clone(), cache, metrics);
        (svc, client)
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(25)), 25);
        assert_eq!(clamp_limit(Some(50_000)), 1_000);
    }

    #[tokio::test]
    async fn latest_blocks_projects_and_caches_per_limit() {
        let (svc, client) = service(&[("full-1", NodeRole::Full)]);
        client.on_get(
            "full-1",
            "/blocks/latest?limit=2",
            Ok(json!({ "blocks": [{ "height": 2 }, { "height": 1 }] })),
        );

        let blocks = svc.latest_blocks(Some(2)).await;
        assert_eq!(blocks, json!([{ "height": 2 }, { "height": 1 }]));
        svc.latest_blocks(Some(2)).await;
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn latest_blocks_is_empty_array_when_exhausted() {
        let (svc, _) = service(&[("full-1", NodeRole::Full)]);
        assert_eq!(svc.latest_blocks(None).await, json!([]));
    }

    #[tokio::test]
    async fn block_lookup_absent_when_exhausted_or_null() {
        let (svc, client) = service(&[("full-1", NodeRole::Full), ("val-1", NodeRole::Validator)]);
        assert_eq!(svc.block_by_hash("abc").await, None);
        assert_eq!(client.nodes_called("GET", "/blocks/abc"), vec!["full-1", "val-1"]);

        client.on_get("full-1", "/blocks/nil", Ok(Value::Null));
        assert_eq!(svc.block_by_hash("nil").await, None);
    }

    #[tokio::test]
    async fn path_segments_are_encoded() {
        let (svc, client) = service(&[("full-1", NodeRole::Full)]);
        client.on_get("full-1", "/transactions/a%2Fb%20c", Ok(json!({ "hash": "a/b c" })));

        let tx = svc.transaction_by_hash("a/b c").await.unwrap();
        assert_eq!(tx["hash"], "a/b c");
    }

    #[tokio::test]
    async fn blocks_by_type_falls_back_to_whole_body() {
        let (svc, client) = service(&[("full-1", NodeRole::Full)]);
        client.on_get("full-1", "/blocks/type/genesis", Ok(json!([{ "height": 0 }])));

        assert_eq!(svc.blocks_by_type("genesis").await, json!([{ "height": 0 }]));
    }

    #[tokio::test]
    async fn validators_merge_reports_and_flag_failures() {
        let (svc, client) = service(&[
            ("val-1", NodeRole::Validator),
            ("val-2", NodeRole::Validator),
            ("full-1", NodeRole::Full),
        ]);
        client.on_get(
            "val-1",
            STATUS_PATH,
            Ok(json!({ "peers": 12, "status": "syncing", "is_active": false })),
        );
        client.on_get("val-2", STATUS_PATH, Err(NodeCallError::Timeout));

        let views = svc.validators().await;
        assert_eq!(views.len(), 2);

        let first = serde_json::to_value(&views[0]).unwrap();
        assert_eq!(first["id"], "val-1");
        assert_eq!(first["url"], "http://val-1.test");
        assert_eq!(first["status"], "syncing", "reported fields win over the registry");
        assert_eq!(first["peers"], 12);
        assert_eq!(first["is_active"], true, "liveness flag is always the gateway's");
        assert!(first.get("last_error").is_none());
        assert_eq!(views[0].node.status, NodeStatus::Active);

        let second = serde_json::to_value(&views[1]).unwrap();
        assert_eq!(second["id"], "val-2");
        assert_eq!(second["status"], "active");
        assert_eq!(second["is_active"], false);
        assert_eq!(second["last_error"], "request timed out");
    }

    #[tokio::test]
    async fn network_status_combines_consensus_counts_and_throughput() {
        let (svc, client) = service(&[
            ("val-1", NodeRole::Validator),
            ("full-1", NodeRole::Full),
            ("full-2", NodeRole::Full),
            ("seed-1", NodeRole::Seed),
        ]);
        client.on_get("full-1", HEIGHT_PATH, Ok(json!({ "height": 100 })));
        client.on_get("full-2", HEIGHT_PATH, Ok(json!({ "height": 100 })));
        client.on_get("val-1", HEIGHT_PATH, unreachable());
        client.on_post("val-1", "/transactions", Ok(json!({ "hash": "H" })));

        let tx = Transaction {
            from: "a".into(),
            to: "b".into(),
            amount: 1.into(),
            signature: "s".into(),
            nonce: 0.into(),
            data: None,
            fee: None,
            extra: Map::new(),
        };
        svc.submit_transaction(&tx).await.unwrap();

        let status = svc.network_status().await;
        assert_eq!(status.block_height, 100);
        assert!((status.consensus_percentage - 66.666).abs() < 0.01);
        assert_eq!(
            status.nodes,
            NodeCounts {
                validators: 1,
                full_nodes: 2,
                seed_nodes: 1,
                total: 4
            }
        );
        assert_eq!(status.transactions_submitted, 1);
        assert!(status.tps > 0.0);
        assert_eq!(status.network_version, "2.0.0");
    }

    #[tokio::test]
    async fn cache_health_and_flush() {
        let (svc, client) = service(&[("full-1", NodeRole::Full)]);
        client.on_get("full-1", "/blocks/abc", Ok(json!({ "hash": "abc" })));

        svc.block_by_hash("abc").await;
        assert!(svc.cache_healthy().await);
        assert!(svc.flush_cache().await);

        svc.block_by_hash("abc").await;
        assert_eq!(client.call_count(), 2, "flushed entry is fetched again");
    }
}
