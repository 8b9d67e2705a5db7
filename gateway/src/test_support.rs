//! Deterministic test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::{CacheLayer, MemoryCache};
use crate::client::{NodeCallError, NodeClient};
use crate::metrics::{GatewayMetrics, SharedMetrics};
use crate::registry::{Node, NodeRegistration, NodeRegistry, NodeRole};

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub method: &'static str,
    pub node_id: String,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Clone)]
struct Scripted {
    result: Result<Value, NodeCallError>,
    delay: Option<Duration>,
}

/// A [`NodeClient`] that answers from a script keyed by
/// `(method, node id, path)` and records every call it receives.
/// Unscripted calls fail with a transport error.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    script: Mutex<HashMap<(&'static str, String, String), Scripted>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(
        &self,
        method: &'static str,
        node_id: &str,
        path: &str,
        result: Result<Value, NodeCallError>,
        delay: Option<Duration>,
    ) {
        self.script.lock().insert(
            (method, node_id.to_string(), path.to_string()),
            Scripted { result, delay },
        );
    }

    pub fn on_get(&self, node_id: &str, path: &str, result: Result<Value, NodeCallError>) {
        self.script("GET", node_id, path, result, None);
    }

    pub fn on_post(&self, node_id: &str, path: &str, result: Result<Value, NodeCallError>) {
        self.script("POST", node_id, path, result, None);
    }

    /// Scripts a GET that answers only after `delay`.
    pub fn on_get_delayed(&self, node_id: &str, path: &str, delay: Duration, result: Value) {
        self.script("GET", node_id, path, Ok(result), Some(delay));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Node ids called with `method` on `path`, in call order.
    pub fn nodes_called(&self, method: &str, path: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .map(|c| c.node_id.clone())
            .collect()
    }

    async fn answer(
        &self,
        method: &'static str,
        node: &Node,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, NodeCallError> {
        self.calls.lock().push(Call {
            method,
            node_id: node.id.clone(),
            path: path.to_string(),
            body,
        });
        let scripted = self
            .script
            .lock()
            .get(&(method, node.id.clone(), path.to_string()))
            .cloned();
        match scripted {
            Some(Scripted { result, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Err(NodeCallError::Transport(format!(
                "unscripted {} {} on {}",
                method, path, node.id
            ))),
        }
    }
}

#[async_trait]
impl NodeClient for ScriptedClient {
    async fn get(&self, node: &Node, path: &str) -> Result<Value, NodeCallError> {
        self.answer("GET", node, path, None).await
    }

    async fn post(&self, node: &Node, path: &str, body: &Value) -> Result<Value, NodeCallError> {
        self.answer("POST", node, path, Some(body.clone())).await
    }
}

pub(crate) fn registration(id: &str, role: NodeRole) -> NodeRegistration {
    NodeRegistration {
        id: id.to_string(),
        url: format!("http://{}.test", id),
        role,
        version: None,
        location: None,
    }
}

/// A registry holding the given nodes, all active, in order.
pub(crate) fn registry_with(nodes: &[(&str, NodeRole)]) -> Arc<NodeRegistry> {
    Arc::new(NodeRegistry::with_nodes(
        nodes.iter().map(|(id, role)| registration(id, *role)),
    ))
}

/// A fresh in-memory cache plus the metrics it reports into.
pub(crate) fn memory_cache() -> (CacheLayer, SharedMetrics) {
    let metrics = GatewayMetrics::shared();
    let cache = CacheLayer::new(Arc::new(MemoryCache::new()), metrics.clone());
    (cache, metrics)
}

pub(crate) fn unreachable() -> Result<Value, NodeCallError> {
    Err(NodeCallError::Transport("connection refused".into()))
}
