//! Structured job logging.

use tracing::{error, info, warn};

use reel_models::{JobId, Stage};

/// Logger carrying job context through the stage pipeline.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }

    pub fn stage_start(&self, stage: Stage) {
        info!(job_id = %self.job_id, stage = %stage, "Stage started");
    }

    pub fn stage_skipped(&self, stage: Stage, reason: &str) {
        info!(job_id = %self.job_id, stage = %stage, "Stage skipped: {}", reason);
    }

    pub fn stage_done(&self, stage: Stage, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            elapsed_secs,
            "Stage completed"
        );
    }

    pub fn stage_failed(&self, stage: Stage, error: &crate::error::WorkerError) {
        error!(
            job_id = %self.job_id,
            stage = %stage,
            kind = %error.kind(),
            "Stage failed: {}", error
        );
    }

    pub fn warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "{}", message);
    }

    pub fn completed(&self) {
        info!(job_id = %self.job_id, "Job completed");
    }

    pub fn cancelled(&self) {
        info!(job_id = %self.job_id, "Job cancelled, stopping before next stage");
    }
}
