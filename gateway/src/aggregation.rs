//! # Failover Reads
//!
//! [`AggregationGateway::fetch_resource`] is the read path every query
//! endpoint goes through:
//!
//! ```text
//! cache hit?  ──yes──▶ return cached value (no outbound call)
//!     │ no
//!     ▼
//! candidates = list_by_role(tier₁) ++ list_by_role(tier₂) ++ …   (captured once)
//!     │
//!     ▼
//! for node in candidates:
//!     GET node.url + path   (bounded)
//!     ok  → project field, write through cache, return
//!     err → log, next
//!     │
//!     ▼
//! None
//! ```
//!
//! ## Design Decisions
//!
//! - **Absence over error.** Exhausting every candidate returns `None`. The
//!   caller cannot tell "no node reachable" from "resource not on chain".
//! - **Snapshot candidates.** The candidate list is taken once per call. A
//!   liveness sweep flipping a node mid-request does not reshuffle it.
//! - **No retries.** Each node gets at most one call per request; the next
//!   node is the retry.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::CacheLayer;
use crate::client::{bounded, NodeCallError, NodeClient};
use crate::metrics::SharedMetrics;
use crate::registry::{Node, NodeRegistry, NodeRole};

/// One cacheable upstream read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    /// Roles to try, most preferred first.
    pub tiers: Vec<NodeRole>,
    /// Node API path, including any query string.
    pub path: String,
    pub cache_key: String,
    pub ttl_secs: u64,
    /// When set, a response object carrying this (non-null) field is replaced
    /// by the field's value. Any other response is kept whole.
    pub field: Option<&'static str>,
}

impl ResourceQuery {
    pub fn new(
        tiers: &[NodeRole],
        path: impl Into<String>,
        cache_key: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            tiers: tiers.to_vec(),
            path: path.into(),
            cache_key: cache_key.into(),
            ttl_secs,
            field: None,
        }
    }

    /// Unwraps `field` from the upstream response when present.
    pub fn project(mut self, field: &'static str) -> Self {
        self.field = Some(field);
        self
    }
}

/// Cache-aside, role-tiered failover reader.
pub struct AggregationGateway {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    cache: CacheLayer,
    metrics: SharedMetrics,
    call_timeout: Duration,
}

impl AggregationGateway {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        cache: CacheLayer,
        metrics: SharedMetrics,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            cache,
            metrics,
            call_timeout,
        }
    }

    /// Returns the resource from cache or the first node that serves it.
    pub async fn fetch_resource(&self, query: &ResourceQuery) -> Option<Value> {
        if let Some(hit) = self.cache.get_json::<Value>(&query.cache_key).await {
            debug!(key = %query.cache_key, "cache hit");
            return Some(hit);
        }

        let candidates = self.candidates(&query.tiers);
        for node in &candidates {
            match self.call(node, &query.path).await {
                Ok(body) => {
                    let value = project(body, query.field);
                    self.cache
                        .set_json(&query.cache_key, &value, Some(query.ttl_secs))
                        .await;
                    debug!(node_id = %node.id, path = %query.path, "served by node");
                    return Some(value);
                }
                Err(e) => {
                    warn!(
                        node_id = %node.id,
                        url = %node.url,
                        path = %query.path,
                        error = %e,
                        "node request failed, trying next candidate"
                    );
                }
            }
        }

        self.metrics.reads_exhausted_total.inc();
        warn!(
            path = %query.path,
            candidates = candidates.len(),
            "all candidate nodes exhausted"
        );
        None
    }

    /// Active nodes for every tier, in tier order, each node at most once.
    fn candidates(&self, tiers: &[NodeRole]) -> Vec<Node> {
        let mut seen = HashSet::new();
        tiers
            .iter()
            .flat_map(|role| self.registry.list_by_role(*role))
            .filter(|node| seen.insert(node.id.clone()))
            .collect()
    }

    async fn call(&self, node: &Node, path: &str) -> Result<Value, NodeCallError> {
        self.metrics.upstream_requests_total.inc();
        let timer = self.metrics.upstream_latency_seconds.start_timer();
        let result = bounded(self.call_timeout, self.client.get(node, path)).await;
        timer.observe_duration();
        if result.is_err() {
            self.metrics.node_request_failures_total.inc();
        }
        result
    }
}

fn project(body: Value, field: Option<&str>) -> Value {
    let Some(field) = field else {
        return body;
    };
    match body {
        Value::Object(mut map) if map.get(field).is_some_and(|v| !v.is_null()) => {
            map.remove(field).unwrap_or(Value::Null)
        }
        other => other,
    }
}
