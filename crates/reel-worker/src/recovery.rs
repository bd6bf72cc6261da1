//! Orphan job recovery.
//!
//! Periodic sweep over the job store for jobs stuck mid-pipeline: status
//! non-terminal, `updated_at` past the staleness threshold, and no live
//! processing lease. Elapsed time alone never triggers a resume — the lease
//! is what distinguishes a crashed worker from a merely slow one, so a
//! slow-but-alive worker is never double-dispatched.
//!
//! A recoverable job is reset to `queued` at the resume stage's baseline
//! progress and re-dispatched; a job whose resume prerequisites are gone is
//! failed permanently with a recovery error naming what is missing.

use std::path::Path;
use std::sync::Arc;

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use reel_models::{Job, JobError, JobErrorKind, Stage};
use reel_store::{Dispatch, JobDispatcher};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::stages::JobArtifacts;

/// Counters from one recovery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stale jobs examined
    pub examined: usize,
    /// Jobs reset and re-dispatched
    pub resumed: usize,
    /// Jobs failed for missing prerequisites
    pub failed: usize,
    /// Jobs skipped because a worker still holds the lease
    pub leased: usize,
}

/// Periodic orphan recovery scanner.
pub struct OrphanRecoveryScanner {
    ctx: Arc<WorkerContext>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl OrphanRecoveryScanner {
    pub fn new(ctx: Arc<WorkerContext>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { ctx, dispatcher }
    }

    /// Run the scan loop forever. Spawn as a background task.
    pub async fn run(&self) {
        let period = self.ctx.config.recovery_interval;
        info!("Starting orphan recovery scanner (interval: {:?})", period);

        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            match self.scan_once().await {
                Ok(report) if report.examined > 0 => {
                    info!(
                        examined = report.examined,
                        resumed = report.resumed,
                        failed = report.failed,
                        leased = report.leased,
                        "Orphan recovery pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Orphan recovery error: {}", e),
            }
        }
    }

    /// Run a single recovery pass.
    pub async fn scan_once(&self) -> WorkerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let stale = self
            .ctx
            .jobs
            .find_stale(self.ctx.staleness_threshold())
            .await?;

        for job in stale {
            // find_stale never returns terminal jobs, but recovery must not
            // touch one even if the store is behind.
            if job.is_terminal() {
                continue;
            }
            report.examined += 1;

            if self.ctx.jobs.lease_held(&job.id).await? {
                debug!(job_id = %job.id, "Worker lease still live, not an orphan");
                report.leased += 1;
                continue;
            }

            // Per-job isolation: one bad record must not stall the pass.
            match self.recover(job).await {
                Ok(true) => report.resumed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => error!("Failed to recover job: {}", e),
            }
        }

        Ok(report)
    }

    /// Recover one orphaned job. Returns true when re-dispatched, false
    /// when permanently failed.
    async fn recover(&self, mut job: Job) -> WorkerResult<bool> {
        let checkpoint = self
            .ctx
            .checkpoints
            .load(&job.id)
            .await?
            .unwrap_or_default();

        let Some(next_stage) = checkpoint.resume_stage() else {
            // Every stage checkpointed but the job never flipped to
            // completed: re-dispatch and let the runner finish it.
            info!(job_id = %job.id, "All stages checkpointed, re-dispatching for completion");
            job.requeue_at(Stage::Trimming);
            self.ctx.jobs.save(&job).await?;
            self.dispatcher
                .dispatch(Dispatch::resumed(job.id.clone()))
                .await?;
            return Ok(true);
        };

        let artifacts = JobArtifacts::new(self.ctx.job_work_dir(&job.id));
        if let Err(missing) = prerequisites_for(&job, next_stage, &artifacts).await {
            warn!(
                job_id = %job.id,
                stage = %next_stage,
                missing, "Resume prerequisite missing, failing job"
            );
            job.fail(
                JobError::new(
                    JobErrorKind::Recovery,
                    format!("cannot resume at {next_stage}: missing prerequisite"),
                )
                .with_details(serde_json::json!({
                    "stage": next_stage.as_str(),
                    "missing": missing,
                })),
            );
            self.ctx.jobs.save(&job).await?;
            metrics::counter!("reel_recovery_failed_total").increment(1);
            return Ok(false);
        }

        info!(
            job_id = %job.id,
            stage = %next_stage,
            idle_secs = job.idle_secs(chrono::Utc::now()),
            "Resuming orphaned job"
        );
        job.requeue_at(next_stage);
        self.ctx.jobs.save(&job).await?;
        self.dispatcher
            .dispatch(Dispatch::resumed(job.id.clone()))
            .await?;
        metrics::counter!("reel_recovery_resumed_total").increment(1);
        Ok(true)
    }
}

/// Check that the artifacts `stage` consumes still exist.
///
/// Returns the missing prerequisite's description on failure.
async fn prerequisites_for(
    job: &Job,
    stage: Stage,
    artifacts: &JobArtifacts,
) -> Result<(), String> {
    let mut required: Vec<(&'static str, std::path::PathBuf)> = Vec::new();

    match stage {
        Stage::AnalyzingAudio => {
            required.push(("audio file", job.audio_path.clone()));
        }
        Stage::FetchingCandidates => {
            if job.audio_duration.is_none() {
                return Err("audio duration on the job record".to_string());
            }
        }
        Stage::DownloadingCandidates => {
            required.push(("candidate list", artifacts.candidates()));
        }
        Stage::SelectingCandidates => {
            if job.target_duration.is_none() {
                return Err("target duration on the job record".to_string());
            }
            required.push(("validated downloads", artifacts.downloads()));
        }
        Stage::Assembling => {
            required.push(("selection plan", artifacts.selection()));
        }
        Stage::GeneratingSubtitles => {
            required.push(("assembly output", artifacts.assembly()));
        }
        Stage::FinalComposition => {
            required.push(("assembly output", artifacts.assembly()));
            required.push(("subtitle track", artifacts.subtitles_srt()));
        }
        Stage::Trimming => {
            required.push(("composition output", artifacts.composed()));
        }
    }

    for (what, path) in required {
        if !file_exists(&path).await {
            return Err(format!("{what} ({})", path.display()));
        }
    }
    Ok(())
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
