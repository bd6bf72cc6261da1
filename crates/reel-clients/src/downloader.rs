//! Downloader client: fetches a clip into a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use reel_models::DownloadedClip;

use crate::error::ClientResult;
use crate::poll::{submit_and_poll, TaskContract};

/// Downloads clips by id. The collaborator shares the worker's filesystem
/// and writes into the requested destination directory.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, clip_id: &str, dest_dir: &Path) -> ClientResult<DownloadedClip>;
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    clip_id: &'a str,
    dest_dir: &'a Path,
}

#[derive(Debug, Deserialize)]
struct DownloadResult {
    path: PathBuf,
    duration: f64,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    fps: Option<f64>,
}

/// HTTP downloader.
pub struct HttpDownloader {
    client: Client,
    contract: TaskContract,
}

impl HttpDownloader {
    pub fn new(contract: TaskContract) -> Self {
        Self {
            client: Client::new(),
            contract,
        }
    }

    pub fn from_env() -> ClientResult<Self> {
        Ok(Self::new(TaskContract::from_env(
            "DOWNLOADER_URL",
            "downloader",
        )?))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, clip_id: &str, dest_dir: &Path) -> ClientResult<DownloadedClip> {
        let request = DownloadRequest { clip_id, dest_dir };
        let result: DownloadResult =
            submit_and_poll(&self.client, &self.contract, "/v1/download", &request).await?;

        info!(clip_id, path = %result.path.display(), "Clip downloaded");

        Ok(DownloadedClip {
            clip_id: clip_id.to_string(),
            path: result.path,
            duration: result.duration,
            width: result.width,
            height: result.height,
            fps: result.fps,
        })
    }
}
