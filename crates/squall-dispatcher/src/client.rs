//! HTTP client for worker execute endpoints.

use squall_types::{QueryRequest, QueryResponse};
use thiserror::Error;

/// Errors from a single worker call.
///
/// Worker error bodies are plain text (usually the database driver's own
/// message) and are carried here verbatim so the dispatcher can surface
/// them to its caller. An empty or unreadable body is replaced by the
/// upstream status code.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker could not be reached or the response body was unusable.
    #[error("worker error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The worker answered with a non-success status.
    #[error("worker error: {body}")]
    Upstream {
        /// The worker's response body, or `HTTP <code>` when the body was
        /// empty or unreadable.
        body: String,
    },
}

/// Client for scattering sub-queries across the worker fleet.
///
/// Part `i` of a plan always goes to `urls[i % urls.len()]`, so a fleet of
/// N workers sees an N-part plan spread evenly. Requests carry no timeout;
/// a long-running query holds its slot until the worker answers.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    urls: Vec<String>,
}

impl WorkerClient {
    /// Builds a client over the configured worker URLs.
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            urls,
        }
    }

    /// Number of configured workers.
    pub fn worker_count(&self) -> usize {
        self.urls.len()
    }

    /// POSTs one sub-query to the worker serving slot `part`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Upstream`] with the worker's body when it
    /// answers a non-2xx status, and [`WorkerError::Transport`] when the
    /// call itself fails.
    pub async fn execute(&self, part: usize, sql: &str) -> Result<QueryResponse, WorkerError> {
        let url = &self.urls[part % self.urls.len()];
        let response = self
            .http
            .post(url)
            .json(&QueryRequest {
                sql: sql.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = if text.trim().is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                text
            };
            return Err(WorkerError::Upstream { body });
        }

        Ok(response.json::<QueryResponse>().await?)
    }
}
