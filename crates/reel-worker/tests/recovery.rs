//! Orphan recovery tests.
//!
//! Drive the scanner against the in-memory store with a recording
//! dispatcher. External collaborators are never reached by recovery, so
//! the fakes here only have to exist.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use reel_clients::{
    ClientError, ClientResult, ContentDetector, Detection, Downloader, MediaInfo, MediaToolkit,
    ShortsProvider, Transcriber, VadOutcome, VoiceActivityDetector,
};
use reel_media::PoolLayout;
use reel_models::{
    Candidate, DownloadedClip, Job, JobErrorKind, JobStatus, Stage, SubtitleSegment,
};
use reel_store::{
    CheckpointStore, Dispatch, JobDispatcher, JobStore, MemoryStore, StoreResult,
};
use reel_worker::{OrphanRecoveryScanner, SystemClock, WorkerConfig, WorkerContext};

struct UnreachableCollaborators;

#[async_trait]
impl ShortsProvider for UnreachableCollaborators {
    async fn search(&self, _q: &str, _n: usize) -> ClientResult<Vec<Candidate>> {
        Err(ClientError::config("not wired in recovery tests"))
    }
}

#[async_trait]
impl Downloader for UnreachableCollaborators {
    async fn download(&self, _c: &str, _d: &Path) -> ClientResult<DownloadedClip> {
        Err(ClientError::config("not wired in recovery tests"))
    }
}

#[async_trait]
impl Transcriber for UnreachableCollaborators {
    async fn transcribe(&self, _a: &Path, _l: &str) -> ClientResult<Vec<SubtitleSegment>> {
        Err(ClientError::config("not wired in recovery tests"))
    }
}

#[async_trait]
impl ContentDetector for UnreachableCollaborators {
    async fn detect(&self, _v: &Path) -> ClientResult<Detection> {
        Err(ClientError::config("not wired in recovery tests"))
    }
}

#[async_trait]
impl VoiceActivityDetector for UnreachableCollaborators {
    async fn detect_speech(&self, _a: &Path) -> ClientResult<VadOutcome> {
        Err(ClientError::config("not wired in recovery tests"))
    }
}

#[async_trait]
impl MediaToolkit for UnreachableCollaborators {
    async fn probe(&self, _p: &Path) -> ClientResult<MediaInfo> {
        Err(ClientError::config("not wired in recovery tests"))
    }
    async fn normalize(&self, _s: &Path, _d: &Path) -> ClientResult<MediaInfo> {
        Err(ClientError::config("not wired in recovery tests"))
    }
    async fn crop(&self, _p: &Path, _a: &str) -> ClientResult<MediaInfo> {
        Err(ClientError::config("not wired in recovery tests"))
    }
    async fn concat(&self, _i: &[std::path::PathBuf], _d: &Path) -> ClientResult<MediaInfo> {
        Err(ClientError::config("not wired in recovery tests"))
    }
    async fn compose(
        &self,
        _v: &Path,
        _a: &Path,
        _s: &Path,
        _d: &Path,
    ) -> ClientResult<MediaInfo> {
        Err(ClientError::config("not wired in recovery tests"))
    }
    async fn trim(&self, _s: &Path, _d: &Path, _t: f64) -> ClientResult<MediaInfo> {
        Err(ClientError::config("not wired in recovery tests"))
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    dispatched: Mutex<Vec<Dispatch>>,
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, dispatch: Dispatch) -> StoreResult<()> {
        self.dispatched.lock().unwrap().push(dispatch);
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    store: MemoryStore,
    ctx: Arc<WorkerContext>,
    dispatcher: Arc<RecordingDispatcher>,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();

        let layout = PoolLayout::new(dir.path().join("pool"));
        layout.ensure_dirs().await.unwrap();
        let work_dir = dir.path().join("work");
        tokio::fs::create_dir_all(&work_dir).await.unwrap();

        let collaborators = Arc::new(UnreachableCollaborators);
        let ctx = Arc::new(WorkerContext {
            config: WorkerConfig {
                work_dir: work_dir.to_string_lossy().into_owned(),
                pool_dir: layout.root().to_string_lossy().into_owned(),
                staleness_threshold: Duration::from_secs(300),
                ..Default::default()
            },
            jobs: Arc::new(store.clone()),
            checkpoints: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            shorts: collaborators.clone(),
            downloader: collaborators.clone(),
            transcriber: collaborators.clone(),
            detector: collaborators.clone(),
            vad: collaborators.clone(),
            toolkit: collaborators,
            clock: Arc::new(SystemClock),
            layout,
        });

        Self {
            _dir: dir,
            store,
            dispatcher: Arc::new(RecordingDispatcher::default()),
            ctx,
        }
    }

    fn scanner(&self) -> OrphanRecoveryScanner {
        OrphanRecoveryScanner::new(self.ctx.clone(), self.dispatcher.clone())
    }

    /// A job stuck in `status` whose last update is `idle_secs` ago.
    async fn stuck_job(&self, status: JobStatus, idle_secs: i64) -> Job {
        let mut job = Job::new("stuck", self._dir.path().join("audio.wav"), 3600);
        job.audio_duration = Some(42.0);
        job.target_duration = Some(43.0);
        job.status = status;
        job.updated_at = Utc::now() - chrono::Duration::seconds(idle_secs);
        JobStore::save(&self.store, &job).await.unwrap();
        job
    }

    async fn checkpoint(&self, job: &Job, stages: &[Stage]) {
        for stage in stages {
            CheckpointStore::save(&self.store, &job.id, *stage)
                .await
                .unwrap();
        }
    }

    /// Write the artifact file a resume at `stage` requires.
    async fn write_artifact(&self, job: &Job, name: &str) {
        let dir = self.ctx.job_work_dir(&job.id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(name), b"{}").await.unwrap();
    }
}

#[tokio::test]
async fn test_stale_job_is_requeued_at_exact_resume_stage() {
    let harness = Harness::new().await;
    let job = harness
        .stuck_job(JobStatus::DownloadingCandidates, 600)
        .await;
    harness
        .checkpoint(&job, &[Stage::AnalyzingAudio, Stage::FetchingCandidates])
        .await;
    harness.write_artifact(&job, "candidates.json").await;

    let report = harness.scanner().scan_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.resumed, 1);
    assert_eq!(report.failed, 0);

    let recovered = JobStore::get(&harness.store, &job.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Queued);
    // Baseline of downloading_candidates = completion of fetching.
    assert_eq!(
        recovered.progress,
        Stage::FetchingCandidates.progress_complete()
    );

    let dispatched = harness.dispatcher.dispatched.lock().unwrap();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].job_id, job.id);
    assert!(dispatched[0].resumed);
}

#[tokio::test]
async fn test_missing_prerequisite_fails_job_permanently() {
    let harness = Harness::new().await;
    let job = harness
        .stuck_job(JobStatus::DownloadingCandidates, 600)
        .await;
    harness
        .checkpoint(&job, &[Stage::AnalyzingAudio, Stage::FetchingCandidates])
        .await;
    // candidates.json deliberately absent

    let report = harness.scanner().scan_once().await.unwrap();
    assert_eq!(report.resumed, 0);
    assert_eq!(report.failed, 1);

    let failed = JobStore::get(&harness.store, &job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Recovery);
    let details = error.details.unwrap();
    assert_eq!(details["stage"], Stage::DownloadingCandidates.as_str());
    assert!(details["missing"]
        .as_str()
        .unwrap()
        .contains("candidate list"));

    assert!(harness.dispatcher.dispatched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_leased_job_is_never_double_dispatched() {
    let harness = Harness::new().await;
    let job = harness.stuck_job(JobStatus::Assembling, 600).await;
    harness
        .checkpoint(
            &job,
            &[
                Stage::AnalyzingAudio,
                Stage::FetchingCandidates,
                Stage::DownloadingCandidates,
                Stage::SelectingCandidates,
            ],
        )
        .await;

    // A slow worker still holds the lease: stale timestamps alone must not
    // trigger a resume.
    harness
        .store
        .acquire_lease(&job.id, Duration::from_secs(60))
        .await
        .unwrap();

    let report = harness.scanner().scan_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.leased, 1);
    assert_eq!(report.resumed, 0);

    let untouched = JobStore::get(&harness.store, &job.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, JobStatus::Assembling);
    assert!(harness.dispatcher.dispatched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fresh_and_terminal_jobs_are_ignored() {
    let harness = Harness::new().await;

    // Fresh in-flight job: under the staleness threshold.
    harness.stuck_job(JobStatus::Assembling, 10).await;

    // Old but terminal jobs.
    let mut done = harness.stuck_job(JobStatus::Trimming, 600).await;
    done.complete();
    done.updated_at = Utc::now() - chrono::Duration::seconds(600);
    JobStore::save(&harness.store, &done).await.unwrap();

    let mut cancelled = harness.stuck_job(JobStatus::Queued, 600).await;
    cancelled.cancel();
    cancelled.updated_at = Utc::now() - chrono::Duration::seconds(600);
    JobStore::save(&harness.store, &cancelled).await.unwrap();

    let report = harness.scanner().scan_once().await.unwrap();
    assert_eq!(report.examined, 0);
    assert!(harness.dispatcher.dispatched.lock().unwrap().is_empty());

    assert_eq!(
        JobStore::get(&harness.store, &done.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(
        harness
            .store
            .get(&cancelled.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_job_with_no_checkpoint_resumes_from_first_stage() {
    let harness = Harness::new().await;
    let job = harness.stuck_job(JobStatus::AnalyzingAudio, 600).await;
    // Resume at analyzing_audio needs the audio file itself.
    tokio::fs::write(&job.audio_path, b"pcm").await.unwrap();

    let report = harness.scanner().scan_once().await.unwrap();
    assert_eq!(report.resumed, 1);

    let recovered = JobStore::get(&harness.store, &job.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Queued);
    assert_eq!(recovered.progress, 0);
}

#[tokio::test]
async fn test_fully_checkpointed_job_is_redispatched_for_completion() {
    let harness = Harness::new().await;
    let job = harness.stuck_job(JobStatus::Trimming, 600).await;
    harness.checkpoint(&job, &Stage::PIPELINE).await;

    let report = harness.scanner().scan_once().await.unwrap();
    assert_eq!(report.resumed, 1);

    let dispatched = harness.dispatcher.dispatched.lock().unwrap();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].job_id, job.id);
}
