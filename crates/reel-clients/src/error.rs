//! Client error types.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} task failed: {message}")]
    TaskFailed { service: &'static str, message: String },

    #[error("{service} did not finish within {timeout_secs}s")]
    Timeout {
        service: &'static str,
        timeout_secs: u64,
    },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn task_failed(service: &'static str, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            service,
            message: message.into(),
        }
    }

    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure is worth retrying.
    ///
    /// Network-level failures, timeouts, 429s and 5xx statuses are
    /// transient: the collaborator is expected to recover. Task-level
    /// failures reported by the collaborator are treated the same way —
    /// an unavailable model is indistinguishable from a flaky one from
    /// this side of the wire. Malformed responses are not retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => {
                if e.is_decode() || e.is_builder() {
                    return false;
                }
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                match e.status() {
                    Some(status) => status.is_server_error() || status.as_u16() == 429,
                    None => true,
                }
            }
            ClientError::Timeout { .. } => true,
            ClientError::TaskFailed { .. } => true,
            ClientError::InvalidResponse { .. } => false,
            ClientError::Config(_) => false,
        }
    }
}
