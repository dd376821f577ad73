//! HTTP query endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Resolve `{ "query": "..." }` |
//! | `POST` | `/preprocess` | Extract and cache every document |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/query` answers with exactly one of:
//!
//! ```json
//! { "results": [ { "identity": "geo.pdf", "page": 1, "snippet": "...", ... } ] }
//! { "reply": "generated answer" }
//! { "error": "user-safe message" }
//! ```
//!
//! # Authentication
//!
//! When `[server].api_key_env` names a variable that is set, `/query` and
//! `/preprocess` require an `Authorization` header equal to its value
//! (a `Bearer ` prefix is accepted). `/health` is always open.
//!
//! Dropping a request (client disconnect) cancels its in-flight OCR work.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::models::{MatchCandidate, QueryResult};
use crate::progress::NoProgress;
use crate::resolver::{PreprocessSummary, Resolver};

#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
    api_key: Option<Arc<str>>,
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(resolver: Arc<Resolver>) -> anyhow::Result<()> {
    let bind_addr = resolver.config().server.bind.clone();
    let api_key = resolver
        .config()
        .server
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|key| !key.is_empty());
    if api_key.is_some() {
        info!("API key required for /query and /preprocess");
    }

    let app = router(resolver, api_key);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "query server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Routes with CORS open to all origins.
pub fn router(resolver: Arc<Resolver>, api_key: Option<String>) -> Router {
    let state = AppState {
        resolver,
        api_key: api_key.map(Arc::from),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/preprocess", post(handle_preprocess))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        message: "missing or invalid API key".to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim());
    match provided {
        Some(key) if key == expected => Ok(()),
        _ => Err(unauthorized()),
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

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum QueryResponse {
    Results { results: Vec<MatchCandidate> },
    Reply { reply: String },
    Error { error: String },
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    authorize(&state, &headers)?;
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let query = request.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let response = match state.resolver.resolve_with_cancel(query, &cancel).await {
        QueryResult::Matches(results) => QueryResponse::Results { results },
        QueryResult::Generated(reply) => QueryResponse::Reply { reply },
        QueryResult::Failed(error) => QueryResponse::Error { error },
    };
    Ok(Json(response))
}

// ============ POST /preprocess ============

async fn handle_preprocess(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PreprocessSummary>, AppError> {
    authorize(&state, &headers)?;

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let summary = state
        .resolver
        .preprocess(&NoProgress, &cancel)
        .await
        .map_err(|e| internal(format!("preprocess failed: {:#}", e)))?;
    Ok(Json(summary))
}
