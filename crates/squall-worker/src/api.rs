//! The `/execute` endpoint: raw SQL in, materialized rows out.

use crate::AppState;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use squall_db::GatewayError;
use squall_types::{QueryRequest, QueryResponse};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by `POST /execute`.
///
/// Bodies are plain text: callers of this endpoint are other services that
/// forward the message as-is, so there is no JSON envelope to unwrap.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The request body was not a JSON object with an `sql` string.
    #[error("bad json")]
    BadJson,

    /// The database layer failed; the message is the driver's own text.
    #[error("{0}")]
    Gateway(#[from] GatewayError),
}

impl IntoResponse for ExecuteError {
    fn into_response(self) -> Response {
        let status = match &self {
            ExecuteError::BadJson => StatusCode::BAD_REQUEST,
            ExecuteError::Gateway(GatewayError::Execute(_)) => StatusCode::BAD_GATEWAY,
            ExecuteError::Gateway(GatewayError::Decode { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// `POST /execute`
///
/// Decodes `{"sql": "..."}`, runs the statement through the gateway, and
/// answers `{"rows": [...]}`. The statement is never inspected, rewritten,
/// or retried here.
pub async fn execute_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<QueryResponse>, ExecuteError> {
    let request: QueryRequest =
        serde_json::from_slice(&body).map_err(|_| ExecuteError::BadJson)?;

    let rows = state.gateway.execute(&request.sql).await.map_err(|e| {
        tracing::warn!(error = %e, "query execution failed");
        ExecuteError::Gateway(e)
    })?;

    Ok(Json(QueryResponse { rows }))
}
