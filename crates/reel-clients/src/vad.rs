//! Voice activity detector client.
//!
//! Tiered collaborator: when its primary model is unavailable it still
//! answers, with `vad_ok == false`, and callers fall back to coarser
//! segmentation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reel_models::SpeechSegment;

use crate::error::{ClientError, ClientResult};

/// Speech segmentation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadOutcome {
    pub segments: Vec<SpeechSegment>,
    /// False when the detector fell back below its primary tier
    pub vad_ok: bool,
}

/// Detects speech spans in an audio file.
#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    async fn detect_speech(&self, audio_path: &Path) -> ClientResult<VadOutcome>;
}

#[derive(Debug, Serialize)]
struct VadRequest<'a> {
    audio_path: &'a Path,
}

/// HTTP voice activity detector.
pub struct HttpVoiceActivityDetector {
    client: Client,
    base_url: String,
}

impl HttpVoiceActivityDetector {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_env() -> ClientResult<Self> {
        let base_url = std::env::var("VAD_URL")
            .map_err(|_| ClientError::config("VAD_URL not set"))?;
        Self::new(base_url)
    }
}

#[async_trait]
impl VoiceActivityDetector for HttpVoiceActivityDetector {
    async fn detect_speech(&self, audio_path: &Path) -> ClientResult<VadOutcome> {
        let outcome: VadOutcome = self
            .client
            .post(format!("{}/v1/speech-segments", self.base_url))
            .json(&VadRequest { audio_path })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(
            audio = %audio_path.display(),
            segments = outcome.segments.len(),
            vad_ok = outcome.vad_ok,
            "Speech detection finished"
        );
        Ok(outcome)
    }
}
