//! Stage bodies.
//!
//! Each body is idempotent: it first looks for its own output artifact and
//! reuses it instead of recomputing, so a crashed run can re-enter any
//! stage safely. Expected failures come back as `WorkerError` values; the
//! runner classifies them into the terminal taxonomy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reel_models::{
    Candidate, Job, JobId, SpeechSegment, Stage, StageInfo, StageMetadata, SubtitleSegment,
};

use crate::backoff::{BackoffExecutor, RetryAttempt, RetryObserver};
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::planner::{plan_selection, SelectionPlan};
use crate::runner::StageRunner;

/// Per-job artifact paths inside the work directory.
pub struct JobArtifacts {
    dir: PathBuf,
}

impl JobArtifacts {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn analysis(&self) -> PathBuf {
        self.dir.join("analysis.json")
    }

    pub fn candidates(&self) -> PathBuf {
        self.dir.join("candidates.json")
    }

    pub fn downloads(&self) -> PathBuf {
        self.dir.join("downloads.json")
    }

    pub fn selection(&self) -> PathBuf {
        self.dir.join("selection.json")
    }

    pub fn assembly(&self) -> PathBuf {
        self.dir.join("assembly.mp4")
    }

    pub fn subtitles_json(&self) -> PathBuf {
        self.dir.join("subtitles.json")
    }

    pub fn subtitles_srt(&self) -> PathBuf {
        self.dir.join("subtitles.srt")
    }

    pub fn composed(&self) -> PathBuf {
        self.dir.join("composed.mp4")
    }

    pub fn final_output(&self) -> PathBuf {
        self.dir.join("final.mp4")
    }
}

/// Audio analysis artifact.
#[derive(Debug, Serialize, Deserialize)]
struct AudioAnalysis {
    audio_duration: f64,
    target_duration: f64,
    speech_segments: Vec<SpeechSegment>,
    vad_ok: bool,
}

/// Subtitles artifact (the .srt render is derived from this).
#[derive(Debug, Serialize, Deserialize)]
struct SubtitlesArtifact {
    segments: Vec<SubtitleSegment>,
    attempts: u32,
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn read_artifact<T: DeserializeOwned>(path: &Path) -> WorkerResult<T> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        WorkerError::recovery(format!("missing artifact {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WorkerError::recovery(format!("corrupt artifact {}: {e}", path.display())))
}

async fn write_artifact<T: Serialize>(path: &Path, value: &T) -> WorkerResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| WorkerError::processing(format!("artifact encoding failed: {e}")))?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Observer that surfaces retry state on the running stage record.
struct StageRetryObserver<'a> {
    ctx: &'a WorkerContext,
    job_id: JobId,
    stage: Stage,
    attempts: AtomicU32,
}

impl<'a> StageRetryObserver<'a> {
    fn new(ctx: &'a WorkerContext, job_id: JobId, stage: Stage) -> Self {
        Self {
            ctx,
            job_id,
            stage,
            attempts: AtomicU32::new(0),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetryObserver for StageRetryObserver<'_> {
    async fn on_retry(&self, attempt: &RetryAttempt) {
        self.attempts.store(attempt.attempt, Ordering::SeqCst);
        match self.ctx.jobs.get(&self.job_id).await {
            Ok(Some(mut job)) => {
                job.set_stage_info(
                    self.stage,
                    StageInfo::waiting_retry(StageMetadata::Retry {
                        attempt: attempt.attempt,
                        last_error: attempt.last_error.clone(),
                        next_retry_at: attempt.next_retry_at,
                    }),
                );
                if let Err(e) = self.ctx.jobs.save(&job).await {
                    warn!(job_id = %self.job_id, "Failed to persist retry state: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %self.job_id, "Failed to load job for retry state: {}", e),
        }
    }
}

impl StageRunner {
    fn artifacts(&self, job_id: &JobId) -> JobArtifacts {
        JobArtifacts::new(self.ctx().job_work_dir(job_id))
    }

    pub(crate) async fn execute_stage(
        &self,
        job: &mut Job,
        stage: Stage,
    ) -> WorkerResult<Option<StageMetadata>> {
        let metadata = match stage {
            Stage::AnalyzingAudio => self.stage_analyzing_audio(job).await?,
            Stage::FetchingCandidates => self.stage_fetching_candidates(job).await?,
            Stage::DownloadingCandidates => self.stage_downloading_candidates(job).await?,
            Stage::SelectingCandidates => self.stage_selecting_candidates(job).await?,
            Stage::Assembling => self.stage_assembling(job).await?,
            Stage::GeneratingSubtitles => self.stage_generating_subtitles(job).await?,
            Stage::FinalComposition => self.stage_final_composition(job).await?,
            Stage::Trimming => self.stage_trimming(job).await?,
        };
        Ok(Some(metadata))
    }

    async fn stage_analyzing_audio(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let artifact = artifacts.analysis();

        if exists(&artifact).await {
            let analysis: AudioAnalysis = read_artifact(&artifact).await?;
            job.audio_duration = Some(analysis.audio_duration);
            job.target_duration = Some(analysis.target_duration);
            debug!(job_id = %job.id, "Reusing audio analysis artifact");
            return Ok(StageMetadata::AudioAnalysis {
                audio_duration: analysis.audio_duration,
                speech_segments: analysis.speech_segments.len(),
                vad_ok: analysis.vad_ok,
            });
        }

        if !exists(&job.audio_path).await {
            return Err(WorkerError::validation(format!(
                "audio file missing: {}",
                job.audio_path.display()
            )));
        }

        let info = self.ctx().toolkit.probe(&job.audio_path).await?;
        if info.duration <= 0.0 {
            return Err(WorkerError::validation("audio track has zero duration"));
        }

        // Tiered speech detection: fall back to one full-length segment when
        // the detector is degraded or unreachable.
        let (speech_segments, vad_ok) = match self.ctx().vad.detect_speech(&job.audio_path).await {
            Ok(outcome) if outcome.vad_ok => (outcome.segments, true),
            Ok(outcome) => {
                warn!(job_id = %job.id, "Speech detector degraded, using fallback segmentation");
                if outcome.segments.is_empty() {
                    (full_track_segment(info.duration), false)
                } else {
                    (outcome.segments, false)
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, "Speech detection unavailable ({}), using full track", e);
                (full_track_segment(info.duration), false)
            }
        };

        let analysis = AudioAnalysis {
            audio_duration: info.duration,
            target_duration: info.duration + self.ctx().config.padding_secs,
            speech_segments,
            vad_ok,
        };
        job.audio_duration = Some(analysis.audio_duration);
        job.target_duration = Some(analysis.target_duration);
        write_artifact(&artifact, &analysis).await?;

        Ok(StageMetadata::AudioAnalysis {
            audio_duration: analysis.audio_duration,
            speech_segments: analysis.speech_segments.len(),
            vad_ok: analysis.vad_ok,
        })
    }

    async fn stage_fetching_candidates(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifact = self.artifacts(&job.id).candidates();

        if exists(&artifact).await {
            let candidates: Vec<Candidate> = read_artifact(&artifact).await?;
            debug!(job_id = %job.id, "Reusing candidate list artifact");
            return Ok(StageMetadata::CandidateFetch {
                found: candidates.len(),
            });
        }

        let candidates = self
            .ctx()
            .shorts
            .search(&job.query, self.ctx().config.max_candidates)
            .await?;

        if candidates.is_empty() {
            return Err(WorkerError::validation(format!(
                "no candidates found for query \"{}\"",
                job.query
            )));
        }

        write_artifact(&artifact, &candidates).await?;
        Ok(StageMetadata::CandidateFetch {
            found: candidates.len(),
        })
    }

    async fn stage_downloading_candidates(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let artifact = artifacts.downloads();

        if exists(&artifact).await {
            let validated: Vec<Candidate> = read_artifact(&artifact).await?;
            debug!(job_id = %job.id, "Reusing validated download artifact");
            return Ok(StageMetadata::Download {
                downloaded: 0,
                reused: validated.len(),
                rejected: 0,
                failed: 0,
            });
        }

        let candidates: Vec<Candidate> = read_artifact(&artifacts.candidates()).await?;
        let pipeline = self.ctx().validation_pipeline();
        let layout = &self.ctx().layout;

        let mut validated: Vec<Candidate> = Vec::new();
        let mut downloaded = 0usize;
        let mut reused = 0usize;
        let mut rejected = 0usize;
        let mut failed = 0usize;

        for candidate in candidates {
            // The ledger is the permanent negative cache: a rejected clip id
            // is never fetched again.
            if self.ctx().ledger.is_rejected(&candidate.clip_id).await? {
                debug!(clip_id = %candidate.clip_id, "Skipping blacklisted clip");
                rejected += 1;
                continue;
            }

            let approved_path = layout.approved_path(&candidate.clip_id);
            if exists(&approved_path).await {
                let info = self.ctx().toolkit.probe(&approved_path).await?;
                validated.push(Candidate {
                    duration: info.duration,
                    ..candidate.clone()
                }
                .with_path(approved_path));
                reused += 1;
                continue;
            }

            let clip = match self
                .ctx()
                .downloader
                .download(&candidate.clip_id, &layout.raw_dir())
                .await
            {
                Ok(clip) => clip,
                Err(e) => {
                    warn!(clip_id = %candidate.clip_id, "Download failed, skipping clip: {}", e);
                    failed += 1;
                    continue;
                }
            };

            match pipeline
                .validate_clip(&job.id, &candidate.clip_id, &clip.path)
                .await
            {
                Ok(reel_media::ValidationVerdict::Approved { path }) => {
                    validated.push(
                        Candidate {
                            duration: clip.duration,
                            width: clip.width,
                            height: clip.height,
                            fps: clip.fps,
                            ..candidate.clone()
                        }
                        .with_path(path),
                    );
                    downloaded += 1;
                }
                Ok(reel_media::ValidationVerdict::Rejected { .. }) => {
                    rejected += 1;
                }
                Err(e) => {
                    warn!(clip_id = %candidate.clip_id, "Validation failed, skipping clip: {}", e);
                    failed += 1;
                }
            }
        }

        if validated.is_empty() {
            return Err(WorkerError::validation(
                "no clips survived download and validation",
            ));
        }

        write_artifact(&artifact, &validated).await?;
        info!(
            job_id = %job.id,
            downloaded, reused, rejected, failed,
            "Download stage finished with {} usable clips", validated.len()
        );
        Ok(StageMetadata::Download {
            downloaded,
            reused,
            rejected,
            failed,
        })
    }

    async fn stage_selecting_candidates(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let artifact = artifacts.selection();

        if exists(&artifact).await {
            let plan: SelectionPlan = read_artifact(&artifact).await?;
            debug!(job_id = %job.id, "Reusing selection artifact");
            return Ok(StageMetadata::Selection {
                selected: plan.selected.len(),
                total_duration: plan.total_duration,
                shortfall: plan.shortfall,
            });
        }

        let target = job
            .target_duration
            .ok_or_else(|| WorkerError::recovery("target duration missing; audio analysis lost"))?;
        let pool: Vec<Candidate> = read_artifact(&artifacts.downloads()).await?;

        let plan = plan_selection(&pool, target, &mut rand::rng())?;
        if plan.shortfall {
            warn!(
                job_id = %job.id,
                total = plan.total_duration,
                target_secs = target,
                "Selected pool falls short of target; trim stage will enforce the floor"
            );
        }

        write_artifact(&artifact, &plan).await?;
        Ok(StageMetadata::Selection {
            selected: plan.selected.len(),
            total_duration: plan.total_duration,
            shortfall: plan.shortfall,
        })
    }

    async fn stage_assembling(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let output = artifacts.assembly();
        let plan: SelectionPlan = read_artifact(&artifacts.selection()).await?;

        let info = if exists(&output).await {
            debug!(job_id = %job.id, "Reusing assembly artifact");
            self.ctx().toolkit.probe(&output).await?
        } else {
            let inputs: Vec<PathBuf> = plan
                .selected
                .iter()
                .map(|c| {
                    c.path.clone().ok_or_else(|| {
                        WorkerError::processing(format!(
                            "selected clip {} has no local file",
                            c.clip_id
                        ))
                    })
                })
                .collect::<WorkerResult<_>>()?;
            self.ctx().toolkit.concat(&inputs, &output).await?
        };

        // The concat output must match the sum of its parts; a deviation
        // means a clip was dropped or truncated.
        let deviation = (info.duration - plan.total_duration).abs();
        if deviation > self.ctx().config.duration_tolerance_secs {
            return Err(WorkerError::processing(format!(
                "assembled duration {:.2}s deviates from expected {:.2}s by {:.2}s",
                info.duration, plan.total_duration, deviation
            )));
        }

        Ok(StageMetadata::Assembly {
            clip_count: plan.selected.len(),
            duration: info.duration,
        })
    }

    async fn stage_generating_subtitles(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let artifact = artifacts.subtitles_json();
        let srt_path = artifacts.subtitles_srt();

        if exists(&artifact).await && exists(&srt_path).await {
            let subtitles: SubtitlesArtifact = read_artifact(&artifact).await?;
            debug!(job_id = %job.id, "Reusing subtitles artifact");
            return Ok(StageMetadata::Subtitles {
                segments: subtitles.segments.len(),
                attempts: subtitles.attempts,
            });
        }

        let observer =
            StageRetryObserver::new(self.ctx(), job.id.clone(), Stage::GeneratingSubtitles);
        let executor = BackoffExecutor::new(self.ctx().backoff_policy(), self.ctx().clock.clone());

        let audio_path = job.audio_path.clone();
        let language = self.ctx().config.language.clone();
        let segments = executor
            .execute("transcribe", &observer, || {
                let audio_path = audio_path.clone();
                let language = language.clone();
                async move {
                    self.ctx()
                        .transcriber
                        .transcribe(&audio_path, &language)
                        .await
                        .map_err(WorkerError::from)
                }
            })
            .await?;

        let subtitles = SubtitlesArtifact {
            attempts: observer.attempts() + 1,
            segments,
        };
        write_artifact(&artifact, &subtitles).await?;
        tokio::fs::write(&srt_path, render_srt(&subtitles.segments)).await?;

        Ok(StageMetadata::Subtitles {
            segments: subtitles.segments.len(),
            attempts: subtitles.attempts,
        })
    }

    async fn stage_final_composition(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let output = artifacts.composed();

        let info = if exists(&output).await {
            debug!(job_id = %job.id, "Reusing composition artifact");
            self.ctx().toolkit.probe(&output).await?
        } else {
            let assembly = artifacts.assembly();
            if !exists(&assembly).await {
                return Err(WorkerError::recovery("assembly artifact missing"));
            }
            self.ctx()
                .toolkit
                .compose(
                    &assembly,
                    &job.audio_path,
                    &artifacts.subtitles_srt(),
                    &output,
                )
                .await?
        };

        Ok(StageMetadata::Composition {
            duration: info.duration,
        })
    }

    async fn stage_trimming(&self, job: &mut Job) -> WorkerResult<StageMetadata> {
        let artifacts = self.artifacts(&job.id);
        let output = artifacts.final_output();
        let target = job
            .target_duration
            .ok_or_else(|| WorkerError::recovery("target duration missing; audio analysis lost"))?;

        let info = if exists(&output).await {
            debug!(job_id = %job.id, "Reusing final artifact");
            self.ctx().toolkit.probe(&output).await?
        } else {
            let composed = artifacts.composed();
            if !exists(&composed).await {
                return Err(WorkerError::recovery("composition artifact missing"));
            }
            self.ctx().toolkit.trim(&composed, &output, target).await?
        };

        self.check_final_duration(job, info.duration, target)?;

        Ok(StageMetadata::Trim {
            final_duration: info.duration,
        })
    }

    /// Final-asset invariant: never shorter than the audio (minus keyframe
    /// slack), and within tolerance of the target. A shortfall here is a
    /// fatal processing error, never a silent truncation.
    fn check_final_duration(&self, job: &Job, actual: f64, target: f64) -> WorkerResult<()> {
        let audio = job
            .audio_duration
            .ok_or_else(|| WorkerError::recovery("audio duration missing"))?;
        let config = &self.ctx().config;

        if actual + config.keyframe_tolerance_secs < audio {
            return Err(WorkerError::processing(format!(
                "final asset {:.2}s is shorter than the audio track {:.2}s",
                actual, audio
            )));
        }
        let deviation = (actual - target).abs();
        if deviation > config.duration_tolerance_secs {
            return Err(WorkerError::processing(format!(
                "final duration {:.2}s deviates from target {:.2}s by {:.2}s",
                actual, target, deviation
            )));
        }
        Ok(())
    }
}

fn full_track_segment(duration: f64) -> Vec<SpeechSegment> {
    vec![SpeechSegment {
        start: 0.0,
        end: duration,
        confidence: 0.0,
    }]
}

/// Render subtitle segments as SubRip text.
fn render_srt(segments: &[SubtitleSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(segment.start),
            srt_timestamp(segment.end),
            segment.text
        ));
    }
    out
}

fn srt_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let (h, rem) = (millis / 3_600_000, millis % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srt_timestamp() {
        assert_eq!(srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(srt_timestamp(1.5), "00:00:01,500");
        assert_eq!(srt_timestamp(3661.042), "01:01:01,042");
    }

    #[test]
    fn test_render_srt_numbering_and_arrows() {
        let segments = vec![
            SubtitleSegment {
                start: 0.0,
                end: 2.0,
                text: "hello".into(),
                words: None,
            },
            SubtitleSegment {
                start: 2.0,
                end: 4.5,
                text: "world".into(),
                words: None,
            },
        ];
        let srt = render_srt(&segments);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:02,000\nhello\n"));
        assert!(srt.contains("2\n00:00:02,000 --> 00:00:04,500\nworld\n"));
    }
}
