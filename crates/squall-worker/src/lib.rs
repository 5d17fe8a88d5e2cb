//! Worker service library logic.
//!
//! A worker exposes exactly one route, `POST /execute`, which runs the SQL
//! it is handed against the shared PostgreSQL pool and returns the rows as
//! JSON. Scheduling, splitting, and merging live in the dispatcher; the
//! worker stays a thin executor.

pub mod api;
pub mod config;

use axum::{extract::DefaultBodyLimit, routing::post, Extension, Router};
use squall_db::QueryGateway;
use std::sync::Arc;

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Query execution gateway (the shared pool in production).
    pub gateway: Arc<dyn QueryGateway>,
}

/// Builds the worker router.
///
/// The whole surface is `POST /execute`. Sub-queries can carry arbitrarily
/// large SQL text, so the default request body cap is lifted.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(api::execute_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(Extension(Arc::new(state)))
}
