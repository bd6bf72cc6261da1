//! Pipeline stages and per-stage progress records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage of the assembly pipeline.
///
/// Declaration order is pipeline order; `Ord` on this enum reflects the
/// execution sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Probe the uploaded audio and detect speech segments
    AnalyzingAudio,
    /// Search the shorts provider for candidate clips
    FetchingCandidates,
    /// Download candidates and run them through content validation
    DownloadingCandidates,
    /// Pick a subset of validated clips covering the target duration
    SelectingCandidates,
    /// Concatenate the selected clips
    Assembling,
    /// Transcribe the audio track into subtitle segments
    GeneratingSubtitles,
    /// Combine assembly, audio track and subtitles
    FinalComposition,
    /// Trim the composition to the target duration
    Trimming,
}

impl Stage {
    /// All stages in execution order.
    pub const PIPELINE: [Stage; 8] = [
        Stage::AnalyzingAudio,
        Stage::FetchingCandidates,
        Stage::DownloadingCandidates,
        Stage::SelectingCandidates,
        Stage::Assembling,
        Stage::GeneratingSubtitles,
        Stage::FinalComposition,
        Stage::Trimming,
    ];

    /// The first stage of the pipeline.
    pub fn first() -> Stage {
        Stage::PIPELINE[0]
    }

    /// The stage following this one, if any.
    pub fn next(&self) -> Option<Stage> {
        Stage::PIPELINE.get(*self as usize + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AnalyzingAudio => "analyzing_audio",
            Stage::FetchingCandidates => "fetching_candidates",
            Stage::DownloadingCandidates => "downloading_candidates",
            Stage::SelectingCandidates => "selecting_candidates",
            Stage::Assembling => "assembling",
            Stage::GeneratingSubtitles => "generating_subtitles",
            Stage::FinalComposition => "final_composition",
            Stage::Trimming => "trimming",
        }
    }

    /// Job progress (percent) once this stage has completed.
    ///
    /// Fixed table; clients rely on these values being stable across releases.
    pub fn progress_complete(&self) -> u8 {
        match self {
            Stage::AnalyzingAudio => 10,
            Stage::FetchingCandidates => 25,
            Stage::DownloadingCandidates => 45,
            Stage::SelectingCandidates => 55,
            Stage::Assembling => 70,
            Stage::GeneratingSubtitles => 80,
            Stage::FinalComposition => 90,
            Stage::Trimming => 100,
        }
    }

    /// Job progress (percent) when this stage begins.
    ///
    /// Equal to the completion percentage of the preceding stage, 0 for the
    /// first. Recovery resets a resumed job to this baseline.
    pub fn progress_baseline(&self) -> u8 {
        match (*self as usize).checked_sub(1) {
            Some(prev) => Stage::PIPELINE[prev].progress_complete(),
            None => 0,
        }
    }

    /// Compute the stage a job should resume at, given the set of
    /// checkpointed stages: the stage immediately following the last
    /// completed one in pipeline order, or the first stage if none are
    /// completed. `None` means every stage has already completed.
    pub fn resume_after(completed: &[Stage]) -> Option<Stage> {
        match completed.iter().max() {
            None => Some(Stage::first()),
            Some(last) => last.next(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started
    #[default]
    Pending,
    /// Stage body is executing
    InProgress,
    /// Stage finished successfully
    Completed,
    /// Stage failed with a fatal error
    Failed,
    /// Stage is sleeping between retry attempts
    WaitingRetry,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::WaitingRetry => "waiting_retry",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed metadata a stage can attach to its progress record.
///
/// One variant per stage, carrying only the fields that stage produces.
/// Updates replace the whole variant; there is no field-level merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageMetadata {
    AudioAnalysis {
        audio_duration: f64,
        speech_segments: usize,
        vad_ok: bool,
    },
    CandidateFetch {
        found: usize,
    },
    Download {
        downloaded: usize,
        reused: usize,
        rejected: usize,
        failed: usize,
    },
    Selection {
        selected: usize,
        total_duration: f64,
        shortfall: bool,
    },
    Assembly {
        clip_count: usize,
        duration: f64,
    },
    /// Written between backoff attempts so pollers can observe liveness.
    Retry {
        attempt: u32,
        last_error: String,
        next_retry_at: DateTime<Utc>,
    },
    Subtitles {
        segments: usize,
        attempts: u32,
    },
    Composition {
        duration: f64,
    },
    Trim {
        final_duration: f64,
    },
}

/// Progress record for one stage of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct StageInfo {
    /// Stage status
    #[serde(default)]
    pub status: StageStatus,

    /// Progress within the stage (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Wall-clock seconds the stage body took
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Stage-specific metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StageMetadata>,
}

impl StageInfo {
    /// Record for a stage that has just started executing.
    pub fn in_progress() -> Self {
        Self {
            status: StageStatus::InProgress,
            ..Default::default()
        }
    }

    /// Record for a completed stage.
    pub fn completed(duration_secs: f64, metadata: Option<StageMetadata>) -> Self {
        Self {
            status: StageStatus::Completed,
            progress: 100,
            duration_secs: Some(duration_secs),
            error: None,
            metadata,
        }
    }

    /// Record for a failed stage.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Record for a stage waiting between retry attempts.
    pub fn waiting_retry(metadata: StageMetadata) -> Self {
        Self {
            status: StageStatus::WaitingRetry,
            metadata: Some(metadata),
            ..Default::default()
        }
    }
}
