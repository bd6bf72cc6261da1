//! Worker context.
//!
//! One explicit context object built at startup and passed by reference
//! into every stage function. Nothing in this crate reaches for
//! process-wide state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reel_clients::{
    ContentDetector, Downloader, HttpContentDetector, HttpDownloader, HttpMediaToolkit,
    HttpShortsProvider, HttpTranscriber, HttpVoiceActivityDetector, MediaToolkit, ShortsProvider,
    Transcriber, VoiceActivityDetector,
};
use reel_media::{PoolLayout, ValidationConfig, ValidationPipeline};
use reel_models::JobId;
use reel_store::{AssetLedger, CheckpointStore, JobStore, RedisStore};

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};
use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Everything a stage needs to run.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub jobs: Arc<dyn JobStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub ledger: Arc<dyn AssetLedger>,
    pub shorts: Arc<dyn ShortsProvider>,
    pub downloader: Arc<dyn Downloader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub detector: Arc<dyn ContentDetector>,
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub toolkit: Arc<dyn MediaToolkit>,
    pub clock: Arc<dyn Clock>,
    pub layout: PoolLayout,
}

impl WorkerContext {
    /// Build a production context from the environment.
    pub async fn from_env(config: WorkerConfig) -> WorkerResult<Self> {
        let store = Arc::new(RedisStore::from_env()?);
        let layout = PoolLayout::new(&config.pool_dir);
        layout.ensure_dirs().await?;
        tokio::fs::create_dir_all(&config.work_dir).await?;

        Ok(Self {
            jobs: store.clone(),
            checkpoints: store.clone(),
            ledger: store,
            shorts: Arc::new(HttpShortsProvider::from_env()?),
            downloader: Arc::new(HttpDownloader::from_env()?),
            transcriber: Arc::new(HttpTranscriber::from_env()?),
            detector: Arc::new(HttpContentDetector::from_env()?),
            vad: Arc::new(HttpVoiceActivityDetector::from_env()?),
            toolkit: Arc::new(HttpMediaToolkit::from_env()?),
            clock: Arc::new(SystemClock),
            layout,
            config,
        })
    }

    /// Per-job artifact directory.
    pub fn job_work_dir(&self, job_id: &JobId) -> PathBuf {
        PathBuf::from(&self.config.work_dir).join(job_id.as_str())
    }

    /// Backoff policy for flaky collaborators, from config.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: self.config.backoff_base,
            max_delay: self.config.backoff_cap,
            ceiling: self.config.retry_ceiling,
        }
    }

    /// The per-clip validation pipeline over this context's collaborators.
    pub fn validation_pipeline(&self) -> ValidationPipeline {
        ValidationPipeline::new(
            self.toolkit.clone(),
            self.detector.clone(),
            self.ledger.clone(),
            self.layout.clone(),
            ValidationConfig {
                confidence_threshold: self.config.confidence_threshold,
                ..ValidationConfig::default()
            },
        )
    }

    /// Staleness threshold used by orphan recovery.
    pub fn staleness_threshold(&self) -> Duration {
        self.config.staleness_threshold
    }
}
