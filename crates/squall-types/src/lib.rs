//! Shared wire types for the squall services.
//!
//! Both the dispatcher and the workers speak the same tiny JSON protocol:
//! a request carries one SQL string, a response carries the materialized
//! rows. Keeping the types here means the dispatcher can deserialize a
//! worker response with the exact struct the worker used to produce it.
//!
//! No crate in the workspace depends on anything *except* `squall-types`
//! for these definitions, which keeps the dependency graph acyclic.

use serde::{Deserialize, Serialize};

/// One result row: column name to JSON value. Serialized key order follows
/// the map, not the SELECT list.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Request body accepted by `POST /execute` (worker) and `POST /query`
/// (dispatcher).
///
/// `sql` is required; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The SQL text to execute, passed to the engine untouched.
    pub sql: String,
}

/// Success response body shared by both services.
///
/// `rows` is always present and is `[]` when the statement returned no
/// rows, so clients never have to branch on a missing or null field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<Row>,
}
