//! Errors that reach callers of the gateway.
//!
//! Per-node failures never show up here — they are absorbed by the failover
//! loops and only logged. What remains is the write path's exhaustion: a
//! transaction that no validator would take.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One validator's reason for not accepting a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorFailure {
    /// Registry id of the validator.
    pub node_id: String,
    /// Base URL the submission was sent to.
    pub url: String,
    /// Human-readable failure reason (timeout, HTTP status, etc.).
    pub reason: String,
}

impl fmt::Display for ValidatorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.node_id, self.url, self.reason)
    }
}

/// Exhaustion-level failures of the transaction submission path.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No active validator is registered. No network call was made.
    #[error("no validator nodes available to process transaction")]
    ValidatorUnavailable,

    /// Every validator was tried and none accepted the transaction.
    #[error("failed to submit transaction on any validator: {}", join_failures(.failures))]
    SubmissionRejectedByAll {
        /// Per-validator reasons, in the order the validators were tried.
        failures: Vec<ValidatorFailure>,
    },

    /// The transaction could not be encoded for the wire.
    #[error("failed to encode transaction: {0}")]
    Encode(String),
}

fn join_failures(failures: &[ValidatorFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
