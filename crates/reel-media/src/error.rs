//! Media error types.

use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Client error: {0}")]
    Client(#[from] reel_clients::ClientError),

    #[error("Store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }
}
