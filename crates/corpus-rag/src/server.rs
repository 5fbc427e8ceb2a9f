//! HTTP retrieval server.
//!
//! Exposes [`RetrievalEngine::retrieve`] as a JSON API for the chat and
//! answer-generation layers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/retrieve` | Run hybrid retrieval |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `POST /retrieve` accepts:
//!
//! ```json
//! { "query": "lightfield displays", "persona_id": "david", "limit": 5,
//!   "max_hops": 2, "tier_weights": { "lexical": 1.0, "vector": 1.0, "graph": 0.5 } }
//! ```
//!
//! and returns the [`RetrievalResponse`](crate::engine::RetrievalResponse)
//! as JSON. An empty `results` array with status 200 means "no relevant
//! sources"; a 503 means retrieval itself is unavailable.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: query must not be empty" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | Malformed body, empty query, unknown persona, bad option |
//! | `timeout` | 408 | `timeouts.request_ms` elapsed; all tiers are cancelled |
//! | `unavailable` | 503 | Store unreachable or no ranking tier completed |
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
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use corpus_rag_core::error::RetrievalError;

use crate::config::Config;
use crate::engine::{RetrievalEngine, RetrievalResponse, RetrieveOptions};

#[derive(Clone)]
struct AppState {
    engine: Arc<RetrievalEngine>,
    request_timeout: Duration,
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = RetrievalEngine::open(config).await?;
    let app = router(Arc::new(engine), config.timeouts.request());

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "retrieval server listening");
    println!("Retrieval server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over an engine. Each `/retrieve` call is bounded by
/// `request_timeout`.
pub fn router(engine: Arc<RetrievalEngine>, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/retrieve", post(handle_retrieve))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState {
            engine,
            request_timeout,
        })
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: message.into(),
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        if err.is_unavailable() {
            unavailable(err.to_string())
        } else {
            bad_request(err.to_string())
        }
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

// ============ POST /retrieve ============

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(flatten)]
    options: RetrieveOptions,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    body: Result<Json<RetrieveRequest>, JsonRejection>,
) -> Result<Json<RetrievalResponse>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;

    match tokio::time::timeout(
        state.request_timeout,
        state.engine.retrieve(&req.query, &req.options),
    )
    .await
    {
        Ok(result) => Ok(Json(result?)),
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.request_timeout.as_millis() as u64,
                "retrieve request timed out"
            );
            Err(timeout_error(format!(
                "retrieve timed out after {}ms",
                state.request_timeout.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let e: AppError = RetrievalError::InvalidQuery("empty".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        let e: AppError = RetrievalError::RetrievalFailed { reasons: vec![] }.into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.code, "unavailable");
        let e: AppError = RetrievalError::StoreUnavailable("down".into()).into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_request_body_flattens_options() {
        let req: RetrieveRequest =
            serde_json::from_str(r#"{"query": "q", "persona_id": "david", "max_hops": 2}"#).unwrap();
        assert_eq!(req.query, "q");
        assert_eq!(req.options.persona_id.as_deref(), Some("david"));
        assert_eq!(req.options.max_hops, Some(2));
    }
}
