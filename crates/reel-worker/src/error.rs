//! Worker error types.

use thiserror::Error;

use reel_models::{JobError, JobErrorKind};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("External service failed: {0}")]
    Microservice(String),

    #[error("Resource exhausted: {0}")]
    Resource(String),

    #[error("Recovery failed: {0}")]
    Recovery(String),

    #[error("Client error: {0}")]
    Client(#[from] reel_clients::ClientError),

    #[error("Store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn microservice(msg: impl Into<String>) -> Self {
        Self::Microservice(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn recovery(msg: impl Into<String>) -> Self {
        Self::Recovery(msg.into())
    }

    /// Classify into the terminal error taxonomy.
    pub fn kind(&self) -> JobErrorKind {
        match self {
            WorkerError::Validation(_) => JobErrorKind::Validation,
            WorkerError::Processing(_) => JobErrorKind::Processing,
            WorkerError::Microservice(_) | WorkerError::Client(_) => JobErrorKind::Microservice,
            WorkerError::Resource(_) | WorkerError::Io(_) => JobErrorKind::Resource,
            WorkerError::Recovery(_) => JobErrorKind::Recovery,
            WorkerError::Store(_) => JobErrorKind::Microservice,
            WorkerError::Media(e) => match e {
                reel_media::MediaError::Client(_) => JobErrorKind::Microservice,
                reel_media::MediaError::Store(_) => JobErrorKind::Microservice,
                reel_media::MediaError::Io(_) => JobErrorKind::Resource,
                reel_media::MediaError::InvalidPath(_) => JobErrorKind::Processing,
            },
        }
    }

    /// Whether retrying the operation could help.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Microservice(_) => true,
            WorkerError::Client(e) => e.is_transient(),
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::Media(reel_media::MediaError::Client(e)) => e.is_transient(),
            WorkerError::Media(reel_media::MediaError::Store(e)) => e.is_transient(),
            _ => false,
        }
    }

    /// Build the structured terminal payload for a failed job.
    pub fn to_job_error(&self, stage: reel_models::Stage) -> JobError {
        JobError::new(self.kind(), self.to_string())
            .with_details(serde_json::json!({ "stage": stage.as_str() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::Stage;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            WorkerError::validation("no candidates").kind(),
            JobErrorKind::Validation
        );
        assert_eq!(
            WorkerError::processing("duration deviates").kind(),
            JobErrorKind::Processing
        );
        assert_eq!(
            WorkerError::recovery("missing artifact").kind(),
            JobErrorKind::Recovery
        );
        assert_eq!(
            WorkerError::microservice("transcriber down").kind(),
            JobErrorKind::Microservice
        );
    }

    #[test]
    fn test_transience() {
        assert!(WorkerError::microservice("flaky").is_transient());
        assert!(!WorkerError::validation("bad input").is_transient());
        assert!(!WorkerError::processing("bad output").is_transient());
    }

    #[test]
    fn test_job_error_carries_stage_detail() {
        let err = WorkerError::processing("assembled duration deviates");
        let job_error = err.to_job_error(Stage::Assembling);
        assert_eq!(job_error.kind, JobErrorKind::Processing);
        assert_eq!(
            job_error.details.unwrap()["stage"],
            Stage::Assembling.as_str()
        );
    }
}
