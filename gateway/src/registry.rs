//! # Node Registry
//!
//! The in-memory catalog of every node the gateway knows about. One
//! registry is constructed per process and handed out as `Arc<NodeRegistry>`
//! to whoever needs it; there is no global instance.
//!
//! ## Guarantees
//!
//! - Ids are unique. Registering an existing id overwrites it
//!   (last-write-wins) but keeps its original position in the ordering.
//! - Role-filtered views ([`NodeRegistry::list_by_role`]) only ever contain
//!   `Active` nodes, in registration order.
//! - Readers get owned snapshots. A mutation builds a whole new [`Node`] and
//!   swaps it in under the write lock, so nobody observes a half-updated
//!   record.
//!
//! Ordering is plain insertion order. There is no reliability scoring yet;
//! [`NodeRegistry::select_preferred`] is a prefix slice and is the place a
//! ranking would go.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Roles & Status
// ---------------------------------------------------------------------------

/// What a node is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts new transactions. The only role the write path talks to.
    Validator,
    /// Holds full chain history. Preferred for reads.
    Full,
    /// Discovery node. Rarely queried directly.
    Seed,
}

impl NodeRole {
    /// Every role, in the order status reports list them.
    pub const ALL: [NodeRole; 3] = [NodeRole::Validator, NodeRole::Full, NodeRole::Seed];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Validator => "validator",
            NodeRole::Full => "full",
            NodeRole::Seed => "seed",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "validator" => Ok(NodeRole::Validator),
            "full" => Ok(NodeRole::Full),
            "seed" => Ok(NodeRole::Seed),
            other => Err(format!("unknown node role '{}'", other)),
        }
    }
}

/// Reachability as last observed by registration, an operator, or a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    Syncing,
}

// ---------------------------------------------------------------------------
// Node Records
// ---------------------------------------------------------------------------

/// A registered node, as seen at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique registry key.
    pub id: String,
    /// Base URL; protocol paths are appended to it.
    pub url: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    /// Last time the node was registered, updated, or probed.
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Everything a caller supplies to register a node. Status and `last_seen`
/// are owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub id: String,
    pub url: String,
    pub role: NodeRole,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Partial update. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl NodeUpdate {
    /// Shorthand for a status-only update.
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("node not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    /// Ids in registration order.
    order: Vec<String>,
    nodes: HashMap<String, Node>,
}

impl Inner {
    fn ordered(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }
}

/// Thread-safe node catalog. All operations are synchronous and do no I/O.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    inner: RwLock<Inner>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with `nodes`, in iteration order.
    pub fn with_nodes<I>(nodes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<NodeRegistration>,
    {
        let registry = Self::new();
        for node in nodes {
            registry.register(node.into());
        }
        registry
    }

    /// Registers a node, overwriting any existing record with the same id.
    ///
    /// The stored record is forced to `Active` with `last_seen = now`.
    pub fn register(&self, registration: NodeRegistration) -> Node {
        let node = Node {
            id: registration.id,
            url: registration.url,
            role: registration.role,
            status: NodeStatus::Active,
            last_seen: Utc::now(),
            version: registration.version,
            location: registration.location,
        };

        let mut inner = self.inner.write();
        if inner.nodes.insert(node.id.clone(), node.clone()).is_none() {
            inner.order.push(node.id.clone());
        }
        drop(inner);

        info!(node_id = %node.id, role = %node.role, url = %node.url, "registered node");
        node
    }

    /// Applies a partial update and refreshes `last_seen`.
    pub fn update_status(&self, id: &str, update: NodeUpdate) -> Result<Node, RegistryError> {
        let mut inner = self.inner.write();
        let Some(current) = inner.nodes.get(id) else {
            drop(inner);
            warn!(node_id = %id, "attempted to update unknown node");
            return Err(RegistryError::NotFound(id.to_string()));
        };

        let updated = Node {
            url: update.url.clone().unwrap_or_else(|| current.url.clone()),
            status: update.status.unwrap_or(current.status),
            version: update.version.clone().or_else(|| current.version.clone()),
            location: update.location.clone().or_else(|| current.location.clone()),
            last_seen: Utc::now(),
            ..current.clone()
        };
        inner.nodes.insert(id.to_string(), updated.clone());
        drop(inner);

        debug!(node_id = %id, update = ?update, "updated node");
        Ok(updated)
    }

    /// Marks a node inactive. `last_seen` is left alone — we did not see it.
    ///
    /// Returns `false` if the id is unknown.
    pub fn mark_inactive(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(current) = inner.nodes.get(id) else {
            return false;
        };
        let updated = Node {
            status: NodeStatus::Inactive,
            ..current.clone()
        };
        inner.nodes.insert(id.to_string(), updated);
        drop(inner);

        warn!(node_id = %id, "marked node inactive");
        true
    }

    /// Removes a node. Returns `false` if the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let existed = inner.nodes.remove(id).is_some();
        if existed {
            inner.order.retain(|known| known != id);
        }
        drop(inner);

        if existed {
            info!(node_id = %id, "removed node");
        }
        existed
    }

    /// Snapshot of one node.
    pub fn get(&self, id: &str) -> Option<Node> {
        self.inner.read().nodes.get(id).cloned()
    }

    /// Snapshot of every node, any role and status, in registration order.
    pub fn all(&self) -> Vec<Node> {
        self.inner.read().ordered().cloned().collect()
    }

    /// Active nodes with the given role, in registration order.
    pub fn list_by_role(&self, role: NodeRole) -> Vec<Node> {
        self.inner
            .read()
            .ordered()
            .filter(|n| n.role == role && n.status == NodeStatus::Active)
            .cloned()
            .collect()
    }

    /// Up to `count` active nodes of `role`.
    ///
    /// Currently the first `count` entries of [`list_by_role`](Self::list_by_role):
    /// no reliability ranking is applied.
    pub fn select_preferred(&self, role: NodeRole, count: usize) -> Vec<Node> {
        let mut nodes = self.list_by_role(role);
        nodes.truncate(count);
        nodes
    }

    /// Number of active nodes with the given role.
    pub fn count_by_role(&self, role: NodeRole) -> usize {
        self.inner
            .read()
            .ordered()
            .filter(|n| n.role == role && n.status == NodeStatus::Active)
            .count()
    }

    /// Total number of registered nodes, any status.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reg(id: &str, role: NodeRole) -> NodeRegistration {
        NodeRegistration {
            id: id.into(),
            url: format!("http://{}.test", id),
            role,
            version: None,
            location: None,
        }
    }

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn register_forces_active_and_stamps_last_seen() {
        let registry = NodeRegistry::new();
        let before = Utc::now();
        let node = registry.register(reg("val-1", NodeRole::Validator));

        assert_eq!(node.status, NodeStatus::Active);
        assert!(node.last_seen >= before);
        assert_eq!(registry.get("val-1"), Some(node));
    }

    #[test]
    fn list_by_role_filters_role_and_status_in_insertion_order() {
        let registry = NodeRegistry::new();
        registry.register(reg("val-1", NodeRole::Validator));
        registry.register(reg("full-1", NodeRole::Full));
        registry.register(reg("val-2", NodeRole::Validator));
        registry.register(reg("val-3", NodeRole::Validator));
        registry.register(reg("seed-1", NodeRole::Seed));

        registry
            .update_status("val-2", NodeUpdate::status(NodeStatus::Syncing))
            .unwrap();

        assert_eq!(
            ids(&registry.list_by_role(NodeRole::Validator)),
            vec!["val-1", "val-3"]
        );
        assert_eq!(ids(&registry.list_by_role(NodeRole::Full)), vec!["full-1"]);
        assert_eq!(ids(&registry.list_by_role(NodeRole::Seed)), vec!["seed-1"]);
        assert_eq!(registry.count_by_role(NodeRole::Validator), 2);
    }

    #[test]
    fn reregistration_overwrites_and_keeps_position() {
        let registry = NodeRegistry::new();
        let first = registry.register(reg("val-1", NodeRole::Validator));
        registry.register(reg("val-2", NodeRole::Validator));
        registry.mark_inactive("val-1");

        std::thread::sleep(Duration::from_millis(5));
        let second = registry.register(NodeRegistration {
            url: "http://moved.test".into(),
            version: Some("2.0".into()),
            ..reg("val-1", NodeRole::Validator)
        });

        assert_eq!(registry.len(), 2);
        assert_eq!(second.url, "http://moved.test");
        assert_eq!(second.status, NodeStatus::Active);
        assert!(second.last_seen > first.last_seen);
        assert_eq!(
            ids(&registry.list_by_role(NodeRole::Validator)),
            vec!["val-1", "val-2"]
        );
    }

    #[test]
    fn reregistration_can_change_role() {
        let registry = NodeRegistry::new();
        registry.register(reg("n-1", NodeRole::Full));
        registry.register(reg("n-1", NodeRole::Validator));

        assert!(registry.list_by_role(NodeRole::Full).is_empty());
        assert_eq!(ids(&registry.list_by_role(NodeRole::Validator)), vec!["n-1"]);
    }

    #[test]
    fn update_status_merges_and_refreshes_last_seen() {
        let registry = NodeRegistry::new();
        let original = registry.register(NodeRegistration {
            location: Some("us-east".into()),
            ..reg("full-1", NodeRole::Full)
        });

        std::thread::sleep(Duration::from_millis(5));
        let updated = registry
            .update_status(
                "full-1",
                NodeUpdate {
                    status: Some(NodeStatus::Inactive),
                    version: Some("1.4.2".into()),
                    ..NodeUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, NodeStatus::Inactive);
        assert_eq!(updated.version.as_deref(), Some("1.4.2"));
        assert_eq!(updated.location.as_deref(), Some("us-east"));
        assert_eq!(updated.url, original.url);
        assert!(updated.last_seen > original.last_seen);
        assert!(registry.list_by_role(NodeRole::Full).is_empty());
    }

    #[test]
    fn update_unknown_node_is_not_found() {
        let registry = NodeRegistry::new();
        let err = registry
            .update_status("ghost", NodeUpdate::status(NodeStatus::Active))
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound("ghost".into()));
    }

    #[test]
    fn mark_inactive_keeps_last_seen() {
        let registry = NodeRegistry::new();
        let node = registry.register(reg("full-1", NodeRole::Full));

        assert!(registry.mark_inactive("full-1"));
        assert!(!registry.mark_inactive("ghost"));

        let after = registry.get("full-1").unwrap();
        assert_eq!(after.status, NodeStatus::Inactive);
        assert_eq!(after.last_seen, node.last_seen);
    }

    #[test]
    fn remove_then_register_appends_at_end() {
        let registry = NodeRegistry::new();
        registry.register(reg("a", NodeRole::Full));
        registry.register(reg("b", NodeRole::Full));

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        registry.register(reg("a", NodeRole::Full));

        assert_eq!(ids(&registry.all()), vec!["b", "a"]);
    }

    #[test]
    fn select_preferred_is_prefix_of_list_by_role() {
        let registry = NodeRegistry::new();
        for i in 0..5 {
            registry.register(reg(&format!("full-{}", i), NodeRole::Full));
        }

        let picked = registry.select_preferred(NodeRole::Full, 3);
        assert_eq!(ids(&picked), vec!["full-0", "full-1", "full-2"]);
        assert_eq!(registry.select_preferred(NodeRole::Full, 10).len(), 5);
        assert!(registry.select_preferred(NodeRole::Seed, 3).is_empty());
    }

    #[test]
    fn with_nodes_preserves_order() {
        let registry = NodeRegistry::with_nodes(vec![
            reg("val-1", NodeRole::Validator),
            reg("full-1", NodeRole::Full),
        ]);
        assert_eq!(ids(&registry.all()), vec!["val-1", "full-1"]);
        assert!(!registry.is_empty());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in NodeRole::ALL {
            assert_eq!(role.as_str().parse::<NodeRole>(), Ok(role));
        }
        assert!("miner".parse::<NodeRole>().is_err());
    }

    #[test]
    fn node_serializes_lowercase_enums() {
        let registry = NodeRegistry::new();
        let node = registry.register(reg("seed-1", NodeRole::Seed));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["role"], "seed");
        assert_eq!(json["status"], "active");
        assert!(json.get("version").is_none());
    }
}
