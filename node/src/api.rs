//! # REST API
//!
//! Builds the axum router for the gateway's public interface. Every handler
//! is a thin adapter over [`ChainService`]: extract, call, map the outcome to
//! a status code.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                        |
//! |--------|-----------------------------------|------------------------------------|
//! | GET    | `/health`                         | Liveness + cache health            |
//! | GET    | `/blockchain/blocks/latest`       | Latest blocks (`?limit=N`)         |
//! | GET    | `/blockchain/blocks/height`       | Consensus chain height             |
//! | GET    | `/blockchain/blocks/type/:type`   | Blocks of one type                 |
//! | GET    | `/blockchain/blocks/:hash`        | Block by hash (404 if absent)      |
//! | POST   | `/blockchain/transactions`        | Submit a transaction               |
//! | GET    | `/blockchain/transactions/:hash`  | Transaction by hash (404 if absent)|
//! | GET    | `/blockchain/validators`          | Validators with live status        |
//! | GET    | `/blockchain/status`              | Network status                     |
//! | GET    | `/nodes`                          | Registry snapshot                  |
//! | POST   | `/nodes`                          | Register a node                    |
//! | PATCH  | `/nodes/:id`                      | Update a node                      |
//! | DELETE | `/nodes/:id`                      | Remove a node                      |
//! | DELETE | `/cache`                          | Flush the cache                    |
//!
//! Errors are `{"error": "<message>"}`.

use axum::{
    extract::{Path, Query, Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use strata_gateway::registry::RegistryError;
use strata_gateway::{ChainService, GatewayError, NodeRegistration, NodeUpdate, SharedMetrics, Transaction};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChainService>,
    pub metrics: SharedMetrics,
    /// Gateway build version, reported by `/health`.
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the public [`Router`] with every route, CORS, tracing, and request
/// counting.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let blockchain = Router::new()
        .route("/blocks/latest", get(latest_blocks_handler))
        .route("/blocks/height", get(chain_height_handler))
        .route("/blocks/type/:block_type", get(blocks_by_type_handler))
        .route("/blocks/:hash", get(block_by_hash_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/transactions/:hash", get(transaction_by_hash_handler))
        .route("/validators", get(validators_handler))
        .route("/status", get(network_status_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/blockchain", blockchain)
        .route("/nodes", get(list_nodes_handler).post(register_node_handler))
        .route("/nodes/:id", patch(update_node_handler).delete(remove_node_handler))
        .route("/cache", delete(flush_cache_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.metrics),
            count_requests,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Counts every response by method and status.
async fn count_requests(
    State(metrics): State<SharedMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    response
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler failures and the status code each maps to.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Gateway(GatewayError),
    CacheUnavailable,
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::NotFound(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Gateway(e) => {
                let status = match &e {
                    GatewayError::ValidatorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    GatewayError::SubmissionRejectedByAll { .. } => StatusCode::BAD_GATEWAY,
                    GatewayError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::CacheUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "cache backend unavailable".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers: Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache_backend: String,
    pub cache_healthy: bool,
}

/// `GET /health` — 200 whenever the process is serving. A sick cache is
/// reported, not treated as unhealthy: the gateway still works without it.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: state.version.clone(),
        cache_backend: state.service.cache_backend().to_string(),
        cache_healthy: state.service.cache_healthy().await,
    })
}

// ---------------------------------------------------------------------------
// Handlers: Chain Reads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LatestBlocksQuery {
    limit: Option<usize>,
}

/// `GET /blockchain/blocks/latest?limit=N`
async fn latest_blocks_handler(
    State(state): State<AppState>,
    Query(query): Query<LatestBlocksQuery>,
) -> impl IntoResponse {
    Json(state.service.latest_blocks(query.limit).await)
}

/// `GET /blockchain/blocks/height`
async fn chain_height_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.chain_height().await)
}

/// `GET /blockchain/blocks/type/:block_type`
async fn blocks_by_type_handler(
    State(state): State<AppState>,
    Path(block_type): Path<String>,
) -> impl IntoResponse {
    Json(state.service.blocks_by_type(&block_type).await)
}

/// `GET /blockchain/blocks/:hash` — 404 when no node could produce it.
async fn block_by_hash_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .block_by_hash(&hash)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("block {} not found", hash)))
}

/// `GET /blockchain/transactions/:hash` — 404 when no node could produce it.
async fn transaction_by_hash_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .transaction_by_hash(&hash)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("transaction {} not found", hash)))
}

/// `GET /blockchain/validators`
async fn validators_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.validators().await)
}

/// `GET /blockchain/status`
async fn network_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.network_status().await)
}

// ---------------------------------------------------------------------------
// Handlers: Transactions
// ---------------------------------------------------------------------------

/// `POST /blockchain/transactions` — 503 with no validators, 502 when every
/// validator refused.
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.service.submit_transaction(&tx).await?;
    Ok(Json(receipt))
}

// ---------------------------------------------------------------------------
// Handlers: Node Registry
// ---------------------------------------------------------------------------

/// `GET /nodes`
async fn list_nodes_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.registry().all())
}

/// `POST /nodes` — registers (or overwrites) a node.
async fn register_node_handler(
    State(state): State<AppState>,
    Json(registration): Json<NodeRegistration>,
) -> Result<impl IntoResponse, ApiError> {
    if registration.id.trim().is_empty() {
        return Err(ApiError::BadRequest("node id must not be empty".into()));
    }
    if !(registration.url.starts_with("http://") || registration.url.starts_with("https://")) {
        return Err(ApiError::BadRequest(format!(
            "node url '{}' must be http(s)",
            registration.url
        )));
    }

    let node = state.service.registry().register(registration);
    state.service.node_counts();
    Ok((StatusCode::CREATED, Json(node)))
}

/// `PATCH /nodes/:id`
async fn update_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<NodeUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.service.registry().update_status(&id, update)?;
    state.service.node_counts();
    Ok(Json(node))
}

/// `DELETE /nodes/:id`
async fn remove_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.service.registry().remove(&id) {
        state.service.node_counts();
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("node not found: {}", id)))
    }
}

// ---------------------------------------------------------------------------
// Handlers: Cache
// ---------------------------------------------------------------------------

/// `DELETE /cache`
async fn flush_cache_handler(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    if state.service.flush_cache().await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::CacheUnavailable)
    }
}
