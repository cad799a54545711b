use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("rate limited; resets at {reset_time}")]
    RateLimit {
        reset_time: DateTime<Utc>,
        remaining: u32,
    },

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("unexpected response shape: {0}")]
    MalformedResponse(String),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl GitHubError {
    /// Transient failures are worth retrying; auth/validation failures are
    /// not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GitHubError::Network(_) | GitHubError::Timeout { .. } | GitHubError::RateLimit { .. } => {
                true
            }
            GitHubError::Api { status, .. } => *status >= 500,
            GitHubError::GraphQl(_)
            | GitHubError::MalformedResponse(_)
            | GitHubError::RetriesExhausted { .. } => false,
        }
    }
}
