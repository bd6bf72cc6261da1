//! Media toolkit client.
//!
//! All encode/decode work is delegated to this collaborator; the
//! orchestrator never touches codecs itself. The toolkit shares the
//! worker's filesystem and reads/writes the paths it is given.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientResult;
use crate::poll::{submit_and_poll, TaskContract};

/// Probed properties of a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

/// Media operations delegated to the toolkit collaborator.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Probe a media file's properties.
    async fn probe(&self, path: &Path) -> ClientResult<MediaInfo>;

    /// Normalize container and codec into `dst`.
    async fn normalize(&self, src: &Path, dst: &Path) -> ClientResult<MediaInfo>;

    /// Fix the aspect ratio in place, replacing `path`.
    async fn crop(&self, path: &Path, aspect: &str) -> ClientResult<MediaInfo>;

    /// Concatenate clips into `dst`.
    async fn concat(&self, inputs: &[PathBuf], dst: &Path) -> ClientResult<MediaInfo>;

    /// Mux video, audio track and burned subtitles into `dst`.
    async fn compose(
        &self,
        video: &Path,
        audio: &Path,
        subtitles: &Path,
        dst: &Path,
    ) -> ClientResult<MediaInfo>;

    /// Trim `src` to `duration` seconds, writing `dst`.
    async fn trim(&self, src: &Path, dst: &Path, duration: f64) -> ClientResult<MediaInfo>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ToolkitRequest<'a> {
    Probe {
        path: &'a Path,
    },
    Normalize {
        src: &'a Path,
        dst: &'a Path,
    },
    Crop {
        path: &'a Path,
        aspect: &'a str,
    },
    Concat {
        inputs: &'a [PathBuf],
        dst: &'a Path,
    },
    Compose {
        video: &'a Path,
        audio: &'a Path,
        subtitles: &'a Path,
        dst: &'a Path,
    },
    Trim {
        src: &'a Path,
        dst: &'a Path,
        duration: f64,
    },
}

/// HTTP media toolkit.
pub struct HttpMediaToolkit {
    client: Client,
    contract: TaskContract,
}

impl HttpMediaToolkit {
    pub fn new(contract: TaskContract) -> Self {
        Self {
            client: Client::new(),
            contract,
        }
    }

    pub fn from_env() -> ClientResult<Self> {
        Ok(Self::new(TaskContract::from_env(
            "MEDIA_TOOLKIT_URL",
            "media-toolkit",
        )?))
    }

    async fn run(&self, request: &ToolkitRequest<'_>) -> ClientResult<MediaInfo> {
        let info: MediaInfo =
            submit_and_poll(&self.client, &self.contract, "/v1/tasks", request).await?;
        debug!(duration = info.duration, "Toolkit task finished");
        Ok(info)
    }
}

#[async_trait]
impl MediaToolkit for HttpMediaToolkit {
    async fn probe(&self, path: &Path) -> ClientResult<MediaInfo> {
        self.run(&ToolkitRequest::Probe { path }).await
    }

    async fn normalize(&self, src: &Path, dst: &Path) -> ClientResult<MediaInfo> {
        self.run(&ToolkitRequest::Normalize { src, dst }).await
    }

    async fn crop(&self, path: &Path, aspect: &str) -> ClientResult<MediaInfo> {
        self.run(&ToolkitRequest::Crop { path, aspect }).await
    }

    async fn concat(&self, inputs: &[PathBuf], dst: &Path) -> ClientResult<MediaInfo> {
        self.run(&ToolkitRequest::Concat { inputs, dst }).await
    }

    async fn compose(
        &self,
        video: &Path,
        audio: &Path,
        subtitles: &Path,
        dst: &Path,
    ) -> ClientResult<MediaInfo> {
        self.run(&ToolkitRequest::Compose {
            video,
            audio,
            subtitles,
            dst,
        })
        .await
    }

    async fn trim(&self, src: &Path, dst: &Path, duration: f64) -> ClientResult<MediaInfo> {
        self.run(&ToolkitRequest::Trim { src, dst, duration }).await
    }
}
