//! HTTP service (`recall serve`).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/search` | Contextual or legacy search, per request body |
//! | `POST` | `/api/rag/query` | `{query, n_results, search_type}`; one entry per matched message |
//! | `GET`  | `/health` | Liveness (status and version) |
//! | `GET`  | `/api/rag/health` | Store counts and embedding model |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid parameter: query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408), `unavailable` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use chat_recall_core::api::{
    LegacyResult, SearchMode, SearchRequest, SearchResponse, SearchResults,
};
use chat_recall_core::embedding::Embedder;
use chat_recall_core::store::MessageStore;
use chat_recall_core::{RecallError, RecallPipeline};

use crate::config::Config;
use crate::db;
use crate::search::build_pipeline;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<RecallPipeline>,
}

/// Connect, build the pipeline, and serve on `[server].bind` until the
/// process is terminated.
///
/// An invalid retrieval configuration fails here, before the listener is
/// bound.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(pool));
    let pipeline = Arc::new(build_pipeline(config, store)?);

    let app = build_router(pipeline);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "recall server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes with CORS applied, ready to be served.
pub fn build_router(pipeline: Arc<RecallPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", post(handle_search))
        .route("/api/rag/query", post(handle_rag_query))
        .route("/health", get(handle_health))
        .route("/api/rag/health", get(handle_rag_health))
        .layer(cors)
        .with_state(AppState { pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RecallError> for AppError {
    fn from(err: RecallError) -> Self {
        let status = match &err {
            RecallError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            RecallError::RetrievalTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            RecallError::RetrievalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RecallError::InvalidConfig(_) | RecallError::InternalInvariantViolation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!(error = %err, "search failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Malformed bodies get the same envelope as validation failures.
fn bad_request(rejection: JsonRejection) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: rejection.body_text(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/rag/health ============

#[derive(Serialize)]
struct RagHealthResponse {
    status: String,
    version: String,
    conversations: i64,
    messages: i64,
    embedding_model: String,
}

/// Reports store counts; `503 unavailable` when the store cannot answer.
async fn handle_rag_health(
    State(state): State<AppState>,
) -> Result<Json<RagHealthResponse>, AppError> {
    let (conversations, messages) = state.pipeline.store().counts().await.map_err(|e| {
        AppError::from(RecallError::RetrievalUnavailable {
            source_kind: "store",
            message: e.to_string(),
        })
    })?;

    Ok(Json(RagHealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        conversations,
        messages,
        embedding_model: state.pipeline.embedder().model_name().to_string(),
    }))
}

// ============ POST /api/search ============

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(request) = body.map_err(bad_request)?;
    let response = state.pipeline.search(&request).await?;
    Ok(Json(response))
}

// ============ POST /api/rag/query ============

/// Body of `POST /api/rag/query`: the RAG integration's request shape.
#[derive(Debug, Deserialize)]
struct RagQueryRequest {
    #[serde(default)]
    query: String,
    #[serde(default = "default_rag_results")]
    n_results: usize,
    /// `semantic` (default) or `keyword`; `hybrid` is also accepted.
    #[serde(default = "default_search_type")]
    search_type: String,
}

fn default_rag_results() -> usize {
    5
}

fn default_search_type() -> String {
    "semantic".to_string()
}

impl RagQueryRequest {
    fn to_search_request(&self) -> Result<SearchRequest, RecallError> {
        let mode: SearchMode = self
            .search_type
            .parse()
            .map_err(RecallError::InvalidParameter)?;
        Ok(SearchRequest {
            n_results: Some(self.n_results),
            mode,
            ..SearchRequest::new(self.query.clone())
        })
    }
}

#[derive(Serialize)]
struct RagQueryResponse {
    query: String,
    search_type: String,
    results: Vec<LegacyResult>,
    total: usize,
}

/// Always answers in the legacy shape.
async fn handle_rag_query(
    State(state): State<AppState>,
    body: Result<Json<RagQueryRequest>, JsonRejection>,
) -> Result<Json<RagQueryResponse>, AppError> {
    let Json(request) = body.map_err(bad_request)?;

    let response = state.pipeline.search(&request.to_search_request()?).await?;
    let results = match response.results {
        SearchResults::Legacy(entries) => entries,
        SearchResults::Contextual(_) => {
            return Err(RecallError::InternalInvariantViolation(
                "legacy request produced contextual results".to_string(),
            )
            .into())
        }
    };

    Ok(Json(RagQueryResponse {
        query: response.query,
        search_type: request.search_type,
        total: results.len(),
        results,
    }))
}
