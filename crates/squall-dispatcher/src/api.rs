//! HTTP handler for `/query`.
//!
//! Errors come back as a JSON envelope `{"error": "..."}`: 400 for bodies
//! that do not decode, 502 when any worker request fails, 500 when the
//! partial results cannot be merged.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use squall_types::{QueryRequest, QueryResponse};
use thiserror::Error;

use crate::client::WorkerError;
use crate::merge::{self, MergeError};
use crate::plan;
use crate::AppState;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("bad json")]
    BadJson,
    #[error("{0}")]
    Worker(#[from] WorkerError),
    #[error("{0}")]
    Merge(#[from] MergeError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::BadJson => StatusCode::BAD_REQUEST,
            QueryError::Worker(_) => StatusCode::BAD_GATEWAY,
            QueryError::Merge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Plans the statement, scatters the parts, and merges the responses.
///
/// All parts run concurrently; the first failure cancels the request.
pub async fn query_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<QueryResponse>, QueryError> {
    state.metrics.requests_total.inc();
    let request: QueryRequest =
        serde_json::from_slice(&body).map_err(|_| QueryError::BadJson)?;

    let started = Instant::now();
    let plan = plan::plan(&request.sql, state.max_parts);
    state.metrics.splits_total.inc_by(plan.subqueries.len() as u64);
    tracing::debug!(
        parts = plan.subqueries.len(),
        strategy = plan.merge.label(),
        "planned query"
    );

    let responses = futures::future::try_join_all(
        plan.subqueries
            .iter()
            .enumerate()
            .map(|(part, sql)| state.client.execute(part, sql)),
    )
    .await
    .map_err(|e| {
        tracing::warn!(error = %e, "worker request failed");
        QueryError::from(e)
    })?;

    let parts: Vec<_> = responses.into_iter().map(|response| response.rows).collect();
    let rows = merge::merge(&plan.merge, parts).map_err(|e| {
        tracing::error!(error = %e, "could not merge worker responses");
        QueryError::from(e)
    })?;

    tracing::info!(
        parts = plan.subqueries.len(),
        strategy = plan.merge.label(),
        rows = rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query dispatched"
    );
    Ok(Json(QueryResponse { rows }))
}
