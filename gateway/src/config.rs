//! # Gateway Configuration & Constants
//!
//! Every default and limit the gateway uses lives here, followed by the
//! TOML-loadable [`GatewayConfig`]. The binary layers CLI flags and
//! environment variables on top of whatever the file says.
//!
//! ## Example
//!
//! ```toml
//! network_version = "1.0.0"
//! node_timeout_ms = 5000
//!
//! [liveness]
//! interval_secs = 30
//! probe_timeout_ms = 3000
//! jitter_ms = 2000
//!
//! [cache]
//! backend = "redis"
//! redis_url = "redis://localhost:6379"
//! fallback = "memory"
//!
//! [[nodes]]
//! id = "val-1"
//! url = "https://validator1.example.com"
//! role = "validator"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{NodeRegistration, NodeRole};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Default port for the public HTTP API.
pub const DEFAULT_API_PORT: u16 = 3000;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

// ---------------------------------------------------------------------------
// Outbound Calls
// ---------------------------------------------------------------------------

/// Upper bound on any single call to a node. The failover loop only makes
/// progress if every call is bounded, so there is no "no timeout" option.
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Time between liveness sweeps.
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 30;

/// Upper bound on a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Maximum random delay added to each sweep so that several gateway
/// replicas do not probe the same nodes in lockstep.
pub const DEFAULT_PROBE_JITTER_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Redis URL used when the config selects Redis without naming one.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Upper bound on any single cache operation.
pub const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 500;

/// Blocks addressed by hash never change. A minute is plenty.
pub const BLOCK_CACHE_TTL_SECS: u64 = 60;

/// Same reasoning as blocks: a transaction by hash is immutable once mined.
pub const TRANSACTION_CACHE_TTL_SECS: u64 = 60;

/// "Latest" listings go stale with every new block.
pub const LATEST_BLOCKS_CACHE_TTL_SECS: u64 = 10;

/// Type-filtered listings grow with the chain, so they get the short TTL too.
pub const BLOCKS_BY_TYPE_CACHE_TTL_SECS: u64 = 10;

/// Cache key of the cross-replica counter of accepted submissions.
pub const SUBMISSION_COUNTER_KEY: &str = "stats:transactions_submitted";

// ---------------------------------------------------------------------------
// Request Limits
// ---------------------------------------------------------------------------

/// Number of blocks returned by `blocks/latest` when no limit is given.
pub const DEFAULT_LATEST_BLOCKS_LIMIT: usize = 10;

/// Hard ceiling on `blocks/latest?limit=`.
pub const MAX_LATEST_BLOCKS_LIMIT: usize = 1_000;

// ---------------------------------------------------------------------------
// Network Status
// ---------------------------------------------------------------------------

/// Window over which accepted submissions are averaged into TPS.
pub const DEFAULT_THROUGHPUT_WINDOW_SECS: u64 = 60;

/// Reported in the network status document when nothing else is configured.
pub const DEFAULT_NETWORK_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but contains values the gateway cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Cache Backend
// ---------------------------------------------------------------------------

/// Which implementation of the cache contract to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// External Redis server.
    Redis,
    /// Process-local map with TTL enforcement. Not shared across replicas.
    Memory,
    /// Stores nothing; every read is a miss.
    Null,
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheBackend::Redis => "redis",
            CacheBackend::Memory => "memory",
            CacheBackend::Null => "null",
        };
        f.write_str(s)
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            "null" | "none" => Ok(CacheBackend::Null),
            other => Err(format!(
                "unknown cache backend '{}' (expected redis, memory or null)",
                other
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[liveness]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Whether the background sweep runs at all.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Per-probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Maximum random delay added to each sweep, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_LIVENESS_INTERVAL_SECS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            jitter_ms: DEFAULT_PROBE_JITTER_MS,
        }
    }
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Primary backend.
    pub backend: CacheBackend,
    /// Connection URL, only used by the Redis backend.
    pub redis_url: String,
    /// Backend to run with if the primary cannot be reached at startup.
    /// `None` means startup fails instead.
    pub fallback: Option<CacheBackend>,
    /// Per-operation timeout in milliseconds.
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            fallback: None,
            op_timeout_ms: DEFAULT_CACHE_OP_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// `[ttl]` section. All values in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub block_secs: u64,
    pub transaction_secs: u64,
    pub latest_blocks_secs: u64,
    pub blocks_by_type_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            block_secs: BLOCK_CACHE_TTL_SECS,
            transaction_secs: TRANSACTION_CACHE_TTL_SECS,
            latest_blocks_secs: LATEST_BLOCKS_CACHE_TTL_SECS,
            blocks_by_type_secs: BLOCKS_BY_TYPE_CACHE_TTL_SECS,
        }
    }
}

/// One `[[nodes]]` entry: a node registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapNode {
    pub id: String,
    pub url: String,
    pub role: NodeRole,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl From<BootstrapNode> for NodeRegistration {
    fn from(node: BootstrapNode) -> Self {
        NodeRegistration {
            id: node.id,
            url: node.url,
            role: node.role,
            version: node.version,
            location: node.location,
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Version string reported by the network status endpoint.
    pub network_version: String,
    /// Per-call timeout for reads, submissions and broadcasts, in ms.
    pub node_timeout_ms: u64,
    /// Sliding window for the TPS figure, in seconds.
    pub throughput_window_secs: u64,
    pub liveness: LivenessConfig,
    pub cache: CacheConfig,
    pub ttl: CacheTtlConfig,
    /// Nodes registered at startup, in order.
    pub nodes: Vec<BootstrapNode>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            network_version: DEFAULT_NETWORK_VERSION.to_string(),
            node_timeout_ms: DEFAULT_NODE_TIMEOUT_MS,
            throughput_window_secs: DEFAULT_THROUGHPUT_WINDOW_SECS,
            liveness: LivenessConfig::default(),
            cache: CacheConfig::default(),
            ttl: CacheTtlConfig::default(),
            nodes: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Parses a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads from `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_secs)
    }

    /// Rejects values the gateway cannot run with.
    ///
    /// Zero timeouts would make every call fail instantly, and a zero TTL
    /// would expire entries as they are written. A zero liveness
    /// interval would spin. Duplicate bootstrap ids would silently collapse
    /// into one registry entry, which is never what the operator meant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_timeout_ms == 0 {
            return Err(ConfigError::Invalid("node_timeout_ms must be > 0".into()));
        }
        if self.throughput_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "throughput_window_secs must be > 0".into(),
            ));
        }
        if self.liveness.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "liveness.interval_secs must be > 0".into(),
            ));
        }
        if self.liveness.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "liveness.probe_timeout_ms must be > 0".into(),
            ));
        }
        if self.cache.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid("cache.op_timeout_ms must be > 0".into()));
        }
        let ttls = [
            ("ttl.block_secs", self.ttl.block_secs),
            ("ttl.transaction_secs", self.ttl.transaction_secs),
            ("ttl.latest_blocks_secs", self.ttl.latest_blocks_secs),
            ("ttl.blocks_by_type_secs", self.ttl.blocks_by_type_secs),
        ];
        for (name, secs) in ttls {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        let uses_redis = self.cache.backend == CacheBackend::Redis
            || self.cache.fallback == Some(CacheBackend::Redis);
        if uses_redis && self.cache.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache.redis_url is required for the redis backend".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(ConfigError::Invalid("bootstrap node with empty id".into()));
            }
            if node.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "bootstrap node '{}' has an empty url",
                    node.id
                )));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate bootstrap node id '{}'",
                    node.id
                )));
            }
        }
        Ok(())
    }
}
