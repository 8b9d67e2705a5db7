//! # Prometheus Metrics
//!
//! Operational counters and gauges for the gateway. Every component takes a
//! [`SharedMetrics`] handle at construction; the binary scrapes the same
//! handle at `/metrics`.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] prefixed with
//! `strata`, so several gateways can be built in one process (as the tests
//! do) without colliding in the default global registry.

use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Shared handle passed to components and HTTP handlers.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// All Prometheus handles for one gateway instance.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    // -- cache --------------------------------------------------------------
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    /// Backend failures absorbed by the cache facade.
    pub cache_errors_total: IntCounter,

    // -- read path ----------------------------------------------------------
    pub upstream_requests_total: IntCounter,
    /// Per-node call failures (timeouts, transport errors, bad responses).
    pub node_request_failures_total: IntCounter,
    /// Reads where every candidate failed and `None` was returned.
    pub reads_exhausted_total: IntCounter,
    pub upstream_latency_seconds: Histogram,

    // -- write path ---------------------------------------------------------
    pub transactions_submitted_total: IntCounter,
    pub transactions_rejected_total: IntCounter,
    pub broadcast_failures_total: IntCounter,

    // -- registry & liveness ------------------------------------------------
    pub liveness_sweeps_total: IntCounter,
    pub registered_nodes: IntGauge,
    pub active_nodes: IntGauge,

    // -- consensus ----------------------------------------------------------
    pub consensus_height: IntGauge,
    /// Confidence of the last estimate, in whole percent.
    pub consensus_confidence: IntGauge,

    // -- inbound ------------------------------------------------------------
    /// Inbound API requests, labelled by method and response status.
    pub http_requests_total: IntCounterVec,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registration");
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::new(name, help).expect("metric creation");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registration");
    metric
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once per gateway instance.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("strata".into()), None)
            .expect("failed to create prometheus registry");

        let upstream_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "upstream_latency_seconds",
                "Latency of individual calls to upstream nodes in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(upstream_latency_seconds.clone()))
            .expect("metric registration");

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Inbound API requests"),
            &["method", "status"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric registration");

        Self {
            cache_hits_total: counter(&registry, "cache_hits_total", "Cache lookups that hit"),
            cache_misses_total: counter(&registry, "cache_misses_total", "Cache lookups that missed"),
            cache_errors_total: counter(
                &registry,
                "cache_errors_total",
                "Cache backend errors absorbed as misses or no-ops",
            ),
            upstream_requests_total: counter(
                &registry,
                "upstream_requests_total",
                "Calls issued to upstream nodes",
            ),
            node_request_failures_total: counter(
                &registry,
                "node_request_failures_total",
                "Upstream node calls that failed and triggered failover",
            ),
            reads_exhausted_total: counter(
                &registry,
                "reads_exhausted_total",
                "Reads that exhausted every candidate node",
            ),
            upstream_latency_seconds,
            transactions_submitted_total: counter(
                &registry,
                "transactions_submitted_total",
                "Transactions accepted by a validator",
            ),
            transactions_rejected_total: counter(
                &registry,
                "transactions_rejected_total",
                "Transactions rejected by every validator",
            ),
            broadcast_failures_total: counter(
                &registry,
                "broadcast_failures_total",
                "Best-effort re-broadcast calls that failed",
            ),
            liveness_sweeps_total: counter(
                &registry,
                "liveness_sweeps_total",
                "Completed liveness sweeps",
            ),
            registered_nodes: gauge(&registry, "registered_nodes", "Nodes in the registry"),
            active_nodes: gauge(&registry, "active_nodes", "Registered nodes currently active"),
            consensus_height: gauge(
                &registry,
                "consensus_height",
                "Majority chain height from the last estimate",
            ),
            consensus_confidence: gauge(
                &registry,
                "consensus_confidence",
                "Percentage of attempted nodes agreeing with the last estimate",
            ),
            http_requests_total,
            registry,
        }
    }

    /// Convenience constructor for the common `Arc` case.
    pub fn shared() -> SharedMetrics {
        Arc::new(Self::new())
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
