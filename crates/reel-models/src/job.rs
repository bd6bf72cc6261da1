//! Job definitions for the assembly pipeline.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::JobError;
use crate::stage::{Stage, StageInfo};

/// Unique identifier for a job.
///
/// Always a UUID, so it never contains `_` — the validating-file naming
/// scheme depends on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status.
///
/// Working statuses mirror the pipeline stages in fixed order; `Failed` and
/// `Cancelled` are terminal from any non-terminal status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    #[default]
    Queued,
    AnalyzingAudio,
    FetchingCandidates,
    DownloadingCandidates,
    SelectingCandidates,
    Assembling,
    GeneratingSubtitles,
    FinalComposition,
    Trimming,
    /// Finished successfully
    Completed,
    /// Failed with a structured error
    Failed,
    /// Cancelled by the client
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::AnalyzingAudio => "analyzing_audio",
            JobStatus::FetchingCandidates => "fetching_candidates",
            JobStatus::DownloadingCandidates => "downloading_candidates",
            JobStatus::SelectingCandidates => "selecting_candidates",
            JobStatus::Assembling => "assembling",
            JobStatus::GeneratingSubtitles => "generating_subtitles",
            JobStatus::FinalComposition => "final_composition",
            JobStatus::Trimming => "trimming",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The stage currently executing, if this is a working status.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobStatus::AnalyzingAudio => Some(Stage::AnalyzingAudio),
            JobStatus::FetchingCandidates => Some(Stage::FetchingCandidates),
            JobStatus::DownloadingCandidates => Some(Stage::DownloadingCandidates),
            JobStatus::SelectingCandidates => Some(Stage::SelectingCandidates),
            JobStatus::Assembling => Some(Stage::Assembling),
            JobStatus::GeneratingSubtitles => Some(Stage::GeneratingSubtitles),
            JobStatus::FinalComposition => Some(Stage::FinalComposition),
            JobStatus::Trimming => Some(Stage::Trimming),
            _ => None,
        }
    }
}

impl From<Stage> for JobStatus {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::AnalyzingAudio => JobStatus::AnalyzingAudio,
            Stage::FetchingCandidates => JobStatus::FetchingCandidates,
            Stage::DownloadingCandidates => JobStatus::DownloadingCandidates,
            Stage::SelectingCandidates => JobStatus::SelectingCandidates,
            Stage::Assembling => JobStatus::Assembling,
            Stage::GeneratingSubtitles => JobStatus::GeneratingSubtitles,
            Stage::FinalComposition => JobStatus::FinalComposition,
            Stage::Trimming => JobStatus::Trimming,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One end-to-end request to assemble a video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Job status
    #[serde(default)]
    pub status: JobStatus,

    /// Candidate search terms
    pub query: String,

    /// Uploaded audio track
    pub audio_path: PathBuf,

    /// Probed audio duration in seconds (set by the analysis stage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,

    /// audio_duration + trailing padding (set by the analysis stage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_duration: Option<f64>,

    /// Per-stage progress records, in pipeline order
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageInfo>,

    /// Overall progress (0-100), per the fixed stage table
    #[serde(default)]
    pub progress: u8,

    /// Terminal error (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Completed at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Record expiry timestamp
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(query: impl Into<String>, audio_path: impl Into<PathBuf>, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            query: query.into(),
            audio_path: audio_path.into(),
            audio_duration: None,
            target_duration: None,
            stages: BTreeMap::new(),
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: now + ChronoDuration::seconds(ttl_secs),
        }
    }

    /// Check if the job reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Bump the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Enter a stage: set the working status and an in-progress record.
    pub fn begin_stage(&mut self, stage: Stage) {
        self.status = JobStatus::from(stage);
        self.stages.insert(stage, StageInfo::in_progress());
        self.touch();
    }

    /// Complete a stage: replace its record and advance overall progress.
    pub fn complete_stage(&mut self, stage: Stage, info: StageInfo) {
        self.stages.insert(stage, info);
        self.progress = stage.progress_complete();
        self.touch();
    }

    /// Replace a stage record without touching overall progress.
    pub fn set_stage_info(&mut self, stage: Stage, info: StageInfo) {
        self.stages.insert(stage, info);
        self.touch();
    }

    /// Look up a stage record.
    pub fn stage_info(&self, stage: Stage) -> Option<&StageInfo> {
        self.stages.get(&stage)
    }

    /// Mark the job completed.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// Mark the job failed with a structured error.
    pub fn fail(&mut self, error: JobError) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.touch();
    }

    /// Mark the job cancelled.
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.touch();
    }

    /// Reset a recovered job to the queue at a stage's baseline progress.
    pub fn requeue_at(&mut self, stage: Stage) {
        self.status = JobStatus::Queued;
        self.progress = stage.progress_baseline();
        self.touch();
    }

    /// Seconds since the last update.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }
}
