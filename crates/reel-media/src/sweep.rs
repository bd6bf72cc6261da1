//! Stale-artifact sweep over the shared pool.
//!
//! Crash recovery for the validation pipeline: any validating-tagged file
//! older than the age threshold whose owning job is no longer active gets
//! removed, as does any raw/transform file past the threshold with no
//! ledger entry (an orphaned intermediate). Approved files are never
//! touched.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use reel_store::{AssetLedger, JobStore};

use crate::error::MediaResult;
use crate::fs_utils::remove_if_exists;
use crate::layout::PoolLayout;

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Abandoned validating files removed
    pub validating_removed: usize,
    /// Orphaned raw/transform intermediates removed
    pub orphans_removed: usize,
    /// Files left alone because a live job still claims them
    pub claimed_kept: usize,
}

/// Periodic pool sweeper.
pub struct ArtifactSweeper {
    layout: PoolLayout,
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn AssetLedger>,
    /// Minimum age before an artifact is eligible for removal
    max_age: Duration,
    /// Delay between sweep passes
    sweep_interval: Duration,
}

impl ArtifactSweeper {
    pub fn new(
        layout: PoolLayout,
        jobs: Arc<dyn JobStore>,
        ledger: Arc<dyn AssetLedger>,
        max_age: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            layout,
            jobs,
            ledger,
            max_age,
            sweep_interval,
        }
    }

    /// Run the sweep loop forever. Spawn as a background task.
    pub async fn run(&self) {
        info!(
            "Starting artifact sweeper (interval: {:?}, max age: {:?})",
            self.sweep_interval, self.max_age
        );
        let mut ticker = interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report)
                    if report.validating_removed > 0 || report.orphans_removed > 0 =>
                {
                    info!(
                        validating = report.validating_removed,
                        orphans = report.orphans_removed,
                        kept = report.claimed_kept,
                        "Sweep pass removed stale artifacts"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Artifact sweep error: {}", e),
            }
        }
    }

    /// Run a single sweep pass.
    pub async fn sweep_once(&self) -> MediaResult<SweepReport> {
        let mut report = SweepReport::default();

        self.sweep_validating(&mut report).await?;
        self.sweep_intermediates(&self.layout.raw_dir(), &mut report)
            .await?;
        self.sweep_intermediates(&self.layout.transform_dir(), &mut report)
            .await?;

        Ok(report)
    }

    async fn sweep_validating(&self, report: &mut SweepReport) -> MediaResult<()> {
        let dir = self.layout.validating_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !self.is_expired(&path).await {
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            match PoolLayout::parse_validating_name(&name) {
                Ok((job_id, clip_id)) => {
                    let claimed = match self.jobs.get(&job_id).await {
                        Ok(Some(job)) => !job.is_terminal(),
                        Ok(None) => false,
                        Err(e) => {
                            // Store unavailable: assume claimed rather than
                            // destroy a live job's work file.
                            warn!(job_id = %job_id, "Claim check failed, keeping file: {}", e);
                            true
                        }
                    };
                    if claimed {
                        report.claimed_kept += 1;
                        continue;
                    }
                    debug!(job_id = %job_id, clip_id, "Removing abandoned validating file");
                    if remove_if_exists(&path).await? {
                        report.validating_removed += 1;
                    }
                }
                Err(_) => {
                    warn!("Removing untagged file from validating dir: {}", name);
                    if remove_if_exists(&path).await? {
                        report.validating_removed += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn sweep_intermediates(
        &self,
        dir: &Path,
        report: &mut SweepReport,
    ) -> MediaResult<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !self.is_expired(&path).await {
                continue;
            }

            let clip_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            // A ledger entry means the decision (and cleanup) is owned by
            // finalize; only undecided leftovers are orphans.
            if self.ledger.get(&clip_id).await?.is_some() {
                continue;
            }

            debug!(clip_id, path = %path.display(), "Removing orphaned intermediate");
            if remove_if_exists(&path).await? {
                report.orphans_removed += 1;
            }
        }
        Ok(())
    }

    async fn is_expired(&self, path: &Path) -> bool {
        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        modified
            .elapsed()
            .map(|age| age >= self.max_age)
            .unwrap_or(false)
    }
}
