//! Content detector client.
//!
//! Black-box detector answering whether a clip contains unwanted content.
//! Synchronous request/response; the caller decides what to do with the
//! verdict. A detection with `frames_processed == 0` means the detector
//! could not read the asset at all — the validation pipeline treats that as
//! a corrupt file, not as a clean one.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Detector verdict for one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Whether unwanted content was found
    pub has_content: bool,
    /// Detector confidence in the verdict (0.0 - 1.0)
    pub confidence: f64,
    /// Representative sample (frame timestamp or thumbnail reference)
    #[serde(default)]
    pub sample: Option<String>,
    /// Frames the detector actually decoded
    pub frames_processed: u64,
    /// Frames in which content was found
    pub frames_with_content: u64,
}

impl Detection {
    /// The asset could not be decoded at all.
    pub fn is_unreadable(&self) -> bool {
        self.frames_processed == 0
    }
}

/// Runs content detection on a local video file.
#[async_trait]
pub trait ContentDetector: Send + Sync {
    async fn detect(&self, video_path: &Path) -> ClientResult<Detection>;
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    video_path: &'a Path,
}

/// HTTP content detector.
pub struct HttpContentDetector {
    client: Client,
    base_url: String,
}

impl HttpContentDetector {
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
        let base_url = std::env::var("CONTENT_DETECTOR_URL")
            .map_err(|_| ClientError::config("CONTENT_DETECTOR_URL not set"))?;
        Self::new(base_url)
    }
}

#[async_trait]
impl ContentDetector for HttpContentDetector {
    async fn detect(&self, video_path: &Path) -> ClientResult<Detection> {
        let detection: Detection = self
            .client
            .post(format!("{}/v1/detect", self.base_url))
            .json(&DetectRequest { video_path })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(
            video = %video_path.display(),
            has_content = detection.has_content,
            confidence = detection.confidence,
            frames = detection.frames_processed,
            "Detection finished"
        );
        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_detect_parses_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "has_content": true,
                "confidence": 0.83,
                "sample": "frame_00041",
                "frames_processed": 120,
                "frames_with_content": 17,
            })))
            .mount(&server)
            .await;

        let detector = HttpContentDetector::new(server.uri()).unwrap();
        let detection = detector.detect(Path::new("/pool/validating/x.mp4")).await.unwrap();

        assert!(detection.has_content);
        assert!(!detection.is_unreadable());
        assert_eq!(detection.frames_with_content, 17);
    }

    #[tokio::test]
    async fn test_zero_frames_is_unreadable() {
        let detection = Detection {
            has_content: false,
            confidence: 0.99,
            sample: None,
            frames_processed: 0,
            frames_with_content: 0,
        };
        assert!(detection.is_unreadable());
    }
}
