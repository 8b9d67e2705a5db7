//! # Node Client
//!
//! Outbound calls from the gateway to a node's HTTP API. The trait is the
//! seam the failover engine, consensus estimator, and broadcaster are written
//! against; [`HttpNodeClient`] is the only production implementation.
//!
//! Every call is bounded by the client's timeout. An unbounded call would
//! stall a failover loop behind a single hung node.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::registry::Node;

/// Longest slice of an error body kept in [`NodeCallError::Status`].
const MAX_ERROR_BODY: usize = 256;

/// Why a single call to a single node failed. The `Display` form is what ends
/// up in logs and in per-validator failure reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeCallError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Outbound calls to a node. `path` is appended to the node's base URL and
/// must start with `/`.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get(&self, node: &Node, path: &str) -> Result<Value, NodeCallError>;

    async fn post(&self, node: &Node, path: &str, body: &Value) -> Result<Value, NodeCallError>;
}

/// reqwest-backed [`NodeClient`].
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    client: Client,
}

impl HttpNodeClient {
    /// Builds a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("strata-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn endpoint(node: &Node, path: &str) -> String {
        format!("{}{}", node.url.trim_end_matches('/'), path)
    }

    async fn read(response: reqwest::Response) -> Result<Value, NodeCallError> {
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(NodeCallError::Status {
                code: status.as_u16(),
                body,
            });
        }
        response.json::<Value>().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn get(&self, node: &Node, path: &str) -> Result<Value, NodeCallError> {
        let response = self
            .client
            .get(Self::endpoint(node, path))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read(response).await
    }

    async fn post(&self, node: &Node, path: &str, body: &Value) -> Result<Value, NodeCallError> {
        let response = self
            .client
            .post(Self::endpoint(node, path))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read(response).await
    }
}

/// Bounds any node call by `limit`, whatever the client's own timeout.
pub async fn bounded<F>(limit: Duration, call: F) -> Result<Value, NodeCallError>
where
    F: Future<Output = Result<Value, NodeCallError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(NodeCallError::Timeout))
}

fn map_reqwest_error(e: reqwest::Error) -> NodeCallError {
    if e.is_timeout() {
        NodeCallError::Timeout
    } else if e.is_decode() {
        NodeCallError::Decode(e.to_string())
    } else {
        NodeCallError::Transport(e.to_string())
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeRole, NodeStatus};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn node_at(url: String) -> Node {
        Node {
            id: "n-1".into(),
            url,
            role: NodeRole::Full,
            status: NodeStatus::Active,
            last_seen: Utc::now(),
            version: None,
            location: None,
        }
    }

    fn client() -> HttpNodeClient {
        HttpNodeClient::new(Duration::from_millis(300)).unwrap()
    }

    #[tokio::test]
    async fn get_returns_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocks/height"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "height": 42 })))
            .mount(&server)
            .await;

        let body = client()
            .get(&node_at(server.uri()), "/blocks/height")
            .await
            .unwrap();
        assert_eq!(body["height"], 42);
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let node = node_at(format!("{}/", server.uri()));
        assert!(client().get(&node, "/status").await.is_ok());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such block"))
            .mount(&server)
            .await;

        let err = client()
            .get(&node_at(server.uri()), "/blocks/abc")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NodeCallError::Status {
                code: 404,
                body: "no such block".into()
            }
        );
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client()
            .get(&node_at(server.uri()), "/status")
            .await
            .unwrap_err();
        assert_eq!(err, NodeCallError::Timeout);
    }

    #[tokio::test]
    async fn non_json_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client()
            .get(&node_at(server.uri()), "/status")
            .await
            .unwrap_err();
        assert!(matches!(err, NodeCallError::Decode(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        let tx = json!({ "from": "a", "to": "b", "amount": 5 });
        Mock::given(method("POST"))
            .and(path("/transactions"))
            .and(body_json(tx.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hash": "H" })))
            .expect(1)
            .mount(&server)
            .await;

        let body = client()
            .post(&node_at(server.uri()), "/transactions", &tx)
            .await
            .unwrap();
        assert_eq!(body["hash"], "H");
    }

    #[tokio::test]
    async fn unreachable_node_is_transport_error() {
        // Port 9 (discard) on localhost is closed in any sane test environment.
        let err = client()
            .get(&node_at("http://127.0.0.1:9".into()), "/status")
            .await
            .unwrap_err();
        assert!(
            matches!(err, NodeCallError::Transport(_) | NodeCallError::Timeout),
            "got {:?}",
            err
        );
    }

    #[test]
    fn truncation_respects_utf8() {
        let mut s = "é".repeat(200);
        truncate_on_char_boundary(&mut s, 255);
        assert!(s.len() <= 255);
        assert!(s.is_char_boundary(s.len()));
    }
}
