//! # Transaction Submission
//!
//! The gateway's only write path.
//!
//! 1. Validators are tried one at a time, in registry order.
//! 2. The first one to accept (answer 2xx with a transaction `hash`) is the
//!    authoritative result and the loop stops.
//! 3. The same transaction is then re-broadcast to every validator captured
//!    for this submission, acceptor included, on a detached task. That
//!    fan-out is best effort: failures are logged and counted, nothing waits
//!    for it, and the caller never hears about it.
//!
//! Exhaustion is a hard error here, unlike on the read path. A transaction
//! that silently goes nowhere is worse than a failed request.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::client::{bounded, NodeCallError, NodeClient};
use crate::config::SUBMISSION_COUNTER_KEY;
use crate::error::{GatewayError, ValidatorFailure};
use crate::metrics::SharedMetrics;
use crate::registry::{Node, NodeRegistry, NodeRole};
use crate::throughput::ThroughputMeter;

/// Node path transactions are posted to.
pub const TRANSACTIONS_PATH: &str = "/transactions";

/// A client-signed transaction. Relayed as submitted; the gateway checks
/// neither the signature nor the balance, and numbers keep whatever form the
/// client sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: Number,
    pub signature: String,
    pub nonce: Number,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<Number>,
    /// Any other fields (public key, timestamp, ...), forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the accepting validator answered. Only `hash` is required; anything
/// else the validator sent is passed back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub hash: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Submits transactions to validators and fans them out afterwards.
pub struct TransactionBroadcaster {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    cache: CacheLayer,
    meter: Arc<ThroughputMeter>,
    metrics: SharedMetrics,
    call_timeout: Duration,
}

impl TransactionBroadcaster {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        cache: CacheLayer,
        meter: Arc<ThroughputMeter>,
        metrics: SharedMetrics,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            cache,
            meter,
            metrics,
            call_timeout,
        }
    }

    /// Submits `tx` to the first validator that accepts it.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ValidatorUnavailable`] if no validator is active.
    ///   No call is made.
    /// - [`GatewayError::SubmissionRejectedByAll`] if every validator failed,
    ///   with one reason per validator in the order they were tried.
    pub async fn submit(&self, tx: &Transaction) -> Result<SubmitReceipt, GatewayError> {
        let validators = self.registry.list_by_role(NodeRole::Validator);
        if validators.is_empty() {
            self.metrics.transactions_rejected_total.inc();
            warn!(from = %tx.from, nonce = %tx.nonce, "no active validators for transaction");
            return Err(GatewayError::ValidatorUnavailable);
        }

        let body = serde_json::to_value(tx).map_err(|e| GatewayError::Encode(e.to_string()))?;
        let mut failures = Vec::new();

        for node in &validators {
            self.metrics.upstream_requests_total.inc();
            let attempt = bounded(
                self.call_timeout,
                self.client.post(node, TRANSACTIONS_PATH, &body),
            )
            .await
            .and_then(decode_receipt);

            match attempt {
                Ok(receipt) => {
                    info!(node_id = %node.id, hash = %receipt.hash, "transaction accepted");
                    self.on_accepted();
                    self.spawn_broadcast(validators.clone(), body);
                    return Ok(receipt);
                }
                Err(e) => {
                    self.metrics.node_request_failures_total.inc();
                    warn!(node_id = %node.id, url = %node.url, error = %e, "validator did not accept transaction");
                    failures.push(ValidatorFailure {
                        node_id: node.id.clone(),
                        url: node.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.metrics.transactions_rejected_total.inc();
        warn!(validators = failures.len(), "transaction rejected by every validator");
        Err(GatewayError::SubmissionRejectedByAll { failures })
    }

    fn on_accepted(&self) {
        self.meter.record();
        self.metrics.transactions_submitted_total.inc();
    }

    /// Bumps the shared submission counter, then re-sends `body` to every
    /// node in `validators`, all on a detached task. The handle resolves to
    /// the number of failed sends.
    fn spawn_broadcast(&self, validators: Vec<Node>, body: Value) -> JoinHandle<usize> {
        let client = Arc::clone(&self.client);
        let cache = self.cache.clone();
        let metrics = Arc::clone(&self.metrics);
        let call_timeout = self.call_timeout;

        tokio::spawn(async move {
            cache.incr(SUBMISSION_COUNTER_KEY, 1).await;

            let results = join_all(validators.iter().map(|node| {
                let client = &client;
                let body = &body;
                async move {
                    let result =
                        bounded(call_timeout, client.post(node, TRANSACTIONS_PATH, body)).await;
                    (node, result)
                }
            }))
            .await;

            let mut failed = 0;
            for (node, result) in results {
                if let Err(e) = result {
                    failed += 1;
                    metrics.broadcast_failures_total.inc();
                    warn!(node_id = %node.id, error = %e, "transaction broadcast failed");
                }
            }
            debug!(
                validators = validators.len(),
                failed, "transaction broadcast finished"
            );
            failed
        })
    }
}

fn decode_receipt(body: Value) -> Result<SubmitReceipt, NodeCallError> {
    serde_json::from_value(body)
        .map_err(|e| NodeCallError::Decode(format!("no transaction receipt in response: {}", e)))
}
