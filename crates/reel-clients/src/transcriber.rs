//! Transcriber client: speech-to-text over the uploaded audio track.
//!
//! The transcription collaborator is the flakiest of the set; callers wrap
//! this client in the worker's backoff executor rather than retrying here.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use reel_models::SubtitleSegment;

use crate::error::ClientResult;
use crate::poll::{submit_and_poll, TaskContract};

/// Transcribes an audio file into timed subtitle segments.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> ClientResult<Vec<SubtitleSegment>>;
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio_path: &'a Path,
    language: &'a str,
}

/// HTTP transcriber.
pub struct HttpTranscriber {
    client: Client,
    contract: TaskContract,
}

impl HttpTranscriber {
    pub fn new(contract: TaskContract) -> Self {
        Self {
            client: Client::new(),
            contract,
        }
    }

    pub fn from_env() -> ClientResult<Self> {
        Ok(Self::new(TaskContract::from_env(
            "TRANSCRIBER_URL",
            "transcriber",
        )?))
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> ClientResult<Vec<SubtitleSegment>> {
        let request = TranscribeRequest {
            audio_path,
            language,
        };
        let segments: Vec<SubtitleSegment> =
            submit_and_poll(&self.client, &self.contract, "/v1/transcribe", &request).await?;

        info!(
            audio = %audio_path.display(),
            segments = segments.len(),
            "Transcription finished"
        );
        Ok(segments)
    }
}
