//! Dispatcher service: accepts SQL over HTTP, splits eligible statements
//! into per-range sub-queries, fans them out to the worker fleet, and
//! merges the partial results into one response.
//!
//! Splitting is strictly opt-in by shape. Statements the planner cannot
//! prove safe go to a single worker verbatim, so the dispatcher never
//! changes what a query means, only where it runs.

pub mod api;
pub mod client;
pub mod config;
pub mod merge;
pub mod metrics;
pub mod plan;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::client::WorkerClient;
use crate::metrics::Metrics;

/// Shared state injected into request handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: WorkerClient,
    /// Upper bound on sub-queries per statement; the range width may cap
    /// it further.
    pub max_parts: usize,
    pub metrics: Metrics,
}

/// Builds the dispatcher router. Any origin may call it; CORS allows all
/// origins, methods, and headers.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/query", post(api::query_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(Extension(Arc::new(state)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Prometheus text exposition of the dispatcher counters.
async fn metrics(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "could not render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
