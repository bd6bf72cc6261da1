//! Structured terminal job errors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a terminal job error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Bad request-level input; not retryable
    Validation,
    /// Transient external failure; retryable
    Microservice,
    /// Stage-internal fatal condition; not retryable
    Processing,
    /// Disk/memory exhaustion; not retryable
    Resource,
    /// Resume prerequisites missing; not retryable
    Recovery,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::Validation => "validation_error",
            JobErrorKind::Microservice => "microservice_error",
            JobErrorKind::Processing => "processing_error",
            JobErrorKind::Resource => "resource_error",
            JobErrorKind::Recovery => "recovery_error",
        }
    }

    /// Only microservice failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobErrorKind::Microservice)
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal error payload stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    /// Error classification
    pub kind: JobErrorKind,
    /// Human-readable message
    pub message: String,
    /// Machine-readable detail (stage name, missing artifact, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_microservice_is_retryable() {
        assert!(JobErrorKind::Microservice.is_retryable());
        for kind in [
            JobErrorKind::Validation,
            JobErrorKind::Processing,
            JobErrorKind::Resource,
            JobErrorKind::Recovery,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retryable");
        }
    }

    #[test]
    fn test_details_roundtrip() {
        let err = JobError::new(JobErrorKind::Recovery, "missing prerequisite")
            .with_details(serde_json::json!({"stage": "assembling", "artifact": "selection.json"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: JobError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
