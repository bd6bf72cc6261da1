//! Job stage runner.
//!
//! Drives a job through the fixed stage pipeline: resume point from the
//! checkpoint, cancellation check between stages, stage record plus
//! checkpoint write after every transition. Stage bodies are memoized on
//! their output artifacts, so re-entering after a crash reuses what an
//! earlier run already produced.

use std::sync::Arc;

use reel_models::{JobId, JobStatus, StageInfo};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Executes the stage pipeline for one job at a time.
pub struct StageRunner {
    ctx: Arc<WorkerContext>,
}

impl StageRunner {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub(crate) fn ctx(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Run the job from its checkpointed resume point to a terminal status.
    ///
    /// Terminal jobs are returned untouched. A fatal stage error marks the
    /// job failed and is also returned to the caller; infrastructure errors
    /// (store unavailable) are returned without failing the job, leaving it
    /// to orphan recovery.
    pub async fn run(&self, job_id: &JobId) -> WorkerResult<()> {
        let mut job = self
            .ctx
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| WorkerError::recovery(format!("job {job_id} not found")))?;

        if job.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "Job already terminal");
            return Ok(());
        }

        let logger = JobLogger::new(job_id);
        tokio::fs::create_dir_all(self.ctx.job_work_dir(job_id)).await?;

        let checkpoint = self
            .ctx
            .checkpoints
            .load(job_id)
            .await?
            .unwrap_or_default();
        let mut next = checkpoint.resume_stage();

        while let Some(stage) = next {
            // Cancellation is checked between stages, never mid-stage.
            if let Some(latest) = self.ctx.jobs.get(job_id).await? {
                if latest.status == JobStatus::Cancelled {
                    logger.cancelled();
                    return Ok(());
                }
                job = latest;
            }

            logger.stage_start(stage);
            job.begin_stage(stage);
            self.ctx.jobs.save(&job).await?;

            let started = std::time::Instant::now();
            match self.execute_stage(&mut job, stage).await {
                Ok(metadata) => {
                    // A cancellation written while the stage ran must not be
                    // clobbered by the completion save.
                    if let Some(latest) = self.ctx.jobs.get(job_id).await? {
                        if latest.status == JobStatus::Cancelled {
                            logger.cancelled();
                            return Ok(());
                        }
                    }

                    let elapsed = started.elapsed().as_secs_f64();
                    job.complete_stage(stage, StageInfo::completed(elapsed, metadata));
                    self.ctx.jobs.save(&job).await?;
                    self.ctx.checkpoints.save(&job.id, stage).await?;
                    logger.stage_done(stage, elapsed);
                    next = stage.next();
                }
                Err(e) => {
                    logger.stage_failed(stage, &e);
                    job.set_stage_info(stage, StageInfo::failed(e.to_string()));
                    job.fail(e.to_job_error(stage));
                    self.ctx.jobs.save(&job).await?;
                    metrics::counter!("reel_jobs_failed_total").increment(1);
                    return Err(e);
                }
            }
        }

        job.complete();
        self.ctx.jobs.save(&job).await?;
        // The checkpoint is only removed once the job record says completed.
        self.ctx.checkpoints.delete(&job.id).await?;
        logger.completed();
        metrics::counter!("reel_jobs_completed_total").increment(1);
        Ok(())
    }
}
