//! Store traits.
//!
//! The worker context holds these as trait objects so that the runner,
//! recovery scanner and validation pipeline can be exercised against the
//! in-memory implementations in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reel_models::{AssetRecord, Job, JobId, JobStatus, Stage};

use crate::error::StoreResult;

/// Durable ledger of stages a job has completed.
///
/// Persisted under its own TTL, longer than the job's, so recovery can
/// compute a resume point even across transient job unavailability. Deleted
/// only on job success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Completed stages, in completion order
    pub completed_stages: Vec<Stage>,
    /// When the last stage was appended
    pub last_updated: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// The stage the job should resume at, or `None` when every stage is
    /// already checkpointed.
    pub fn resume_stage(&self) -> Option<Stage> {
        Stage::resume_after(&self.completed_stages)
    }

    /// Append a stage, ignoring duplicates.
    pub fn record(&mut self, stage: Stage) {
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
        }
        self.last_updated = Some(Utc::now());
    }
}

/// Durable, TTL'd storage of job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job record, replacing any previous version.
    async fn save(&self, job: &Job) -> StoreResult<()>;

    /// Load a job by id.
    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// List jobs, optionally filtered by status, newest first.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> StoreResult<Vec<Job>>;

    /// Delete a job record. Returns whether it existed.
    async fn delete(&self, id: &JobId) -> StoreResult<bool>;

    /// Jobs in a non-terminal status whose `updated_at` is older than
    /// `max_age`. Lease state is NOT consulted here; callers that resume
    /// work must additionally check `lease_held`.
    async fn find_stale(&self, max_age: Duration) -> StoreResult<Vec<Job>>;

    /// Try to take the processing lease for a job. Returns false when
    /// another worker already holds it.
    async fn acquire_lease(&self, id: &JobId, ttl: Duration) -> StoreResult<bool>;

    /// Extend a held lease.
    async fn renew_lease(&self, id: &JobId, ttl: Duration) -> StoreResult<()>;

    /// Drop the lease.
    async fn release_lease(&self, id: &JobId) -> StoreResult<()>;

    /// Whether a live (unexpired) lease exists for the job.
    async fn lease_held(&self, id: &JobId) -> StoreResult<bool>;
}

/// Durable stage-completion checkpoints, keyed by job id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a completed stage to the job's checkpoint.
    async fn save(&self, id: &JobId, stage: Stage) -> StoreResult<()>;

    /// Load the checkpoint, if one exists.
    async fn load(&self, id: &JobId) -> StoreResult<Option<Checkpoint>>;

    /// Remove the checkpoint (on job success).
    async fn delete(&self, id: &JobId) -> StoreResult<()>;
}

/// Permanent approved/rejected registry for clip ids.
///
/// Invariants enforced by implementations:
/// - a clip id is in at most one of the two sets;
/// - rejection is permanent: `add_approved` refuses a rejected id, while
///   `add_rejected` evicts any existing approval.
#[async_trait]
pub trait AssetLedger: Send + Sync {
    /// Whether the clip id is blacklisted. Consulted before every download.
    async fn is_rejected(&self, clip_id: &str) -> StoreResult<bool>;

    /// Whether the clip id has an approval entry.
    async fn is_approved(&self, clip_id: &str) -> StoreResult<bool>;

    /// Record an approval.
    async fn add_approved(&self, clip_id: &str, confidence: Option<f64>) -> StoreResult<()>;

    /// Record a rejection with its reason and detector confidence.
    async fn add_rejected(
        &self,
        clip_id: &str,
        reason: &str,
        confidence: Option<f64>,
    ) -> StoreResult<()>;

    /// Fetch the decision record for a clip id, if any.
    async fn get(&self, clip_id: &str) -> StoreResult<Option<AssetRecord>>;
}
