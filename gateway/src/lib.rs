// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Gateway — Core Library
//!
//! Strata sits in front of a set of independently operated chain nodes and
//! gives clients one API instead of many flaky ones. The nodes are
//! semi-trusted: we relay what they say, we never validate chain data
//! ourselves, and we assume any one of them can vanish at any moment.
//!
//! ## Architecture
//!
//! ```text
//! registry.rs     — In-memory catalog of known nodes, role-filtered views
//! liveness.rs     — Periodic bounded-timeout probes that flip node status
//! cache/          — Cache-aside store contract: Redis, in-memory, null
//! client.rs       — Outbound HTTP calls to nodes (reqwest)
//! aggregation.rs  — Role-tiered failover reads with write-through caching
//! consensus.rs    — Majority-height estimate over node self-reports
//! broadcaster.rs  — First-accepting-validator submission + fan-out
//! throughput.rs   — Sliding-window counter of accepted submissions
//! service.rs      — One method per inbound API operation
//! config.rs       — Defaults, limits, and the TOML-loadable config
//! metrics.rs      — Prometheus handles shared by every component
//! error.rs        — Exhaustion-level errors surfaced to callers
//! ```
//!
//! ## Failure Philosophy
//!
//! 1. Per-node failures are absorbed and drive failover. Only exhaustion
//!    reaches the caller.
//! 2. Read exhaustion is absence (`None`), not an error.
//! 3. Write exhaustion is a hard error. Dropping a transaction silently is
//!    the one thing a gateway must never do.
//! 4. The cache can slow us down but can never fail a request.

pub mod aggregation;
pub mod broadcaster;
pub mod cache;
pub mod client;
pub mod config;
pub mod consensus;
pub mod error;
pub mod liveness;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod throughput;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregation::{AggregationGateway, ResourceQuery};
pub use broadcaster::{SubmitReceipt, Transaction, TransactionBroadcaster};
pub use cache::{CacheError, CacheLayer, CacheStore, MemoryCache, NullCache, RedisCache};
pub use client::{HttpNodeClient, NodeCallError, NodeClient};
pub use config::GatewayConfig;
pub use consensus::{ConsensusEstimator, ConsensusHeight};
pub use error::{GatewayError, ValidatorFailure};
pub use liveness::{HttpStatusProbe, LivenessChecker, LivenessProbe, ProbeReport, SweepReport};
pub use metrics::{GatewayMetrics, SharedMetrics};
pub use registry::{Node, NodeRegistration, NodeRegistry, NodeRole, NodeStatus, NodeUpdate};
pub use service::{ChainService, NetworkStatus, NodeCounts, ValidatorView};
pub use throughput::ThroughputMeter;
