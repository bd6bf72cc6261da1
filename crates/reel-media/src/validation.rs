//! Per-clip content validation pipeline.
//!
//! Drives one downloaded clip through
//! `raw -> transform -> crop -> validating -> finalize`. Cropping happens
//! before detection: detection accuracy is defined relative to the displayed
//! aspect ratio, so detecting on an uncropped frame would be meaningless.
//!
//! Every directory transition is an atomic rename, and the validating file
//! is tagged with the owning job id so two jobs racing on the same clip id
//! work on distinct files. The ledger write is the last step of finalize;
//! until then a crash leaves only files the sweep knows how to reclaim.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use reel_clients::{ContentDetector, MediaToolkit};
use reel_models::JobId;
use reel_store::AssetLedger;

use crate::error::MediaResult;
use crate::fs_utils::{atomic_move, remove_if_exists};
use crate::layout::PoolLayout;

/// Validation tuning.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Detector confidence at or above which content findings reject a clip
    pub confidence_threshold: f64,
    /// Aspect ratio the crop step enforces, e.g. "9:16"
    pub aspect: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            aspect: "9:16".to_string(),
        }
    }
}

/// Outcome of validating one clip.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationVerdict {
    /// Clip is reusable; file now lives in the approved store.
    Approved { path: PathBuf },
    /// Clip was rejected and blacklisted.
    Rejected { reason: String },
}

/// The validation pipeline for downloaded clips.
pub struct ValidationPipeline {
    toolkit: Arc<dyn MediaToolkit>,
    detector: Arc<dyn ContentDetector>,
    ledger: Arc<dyn AssetLedger>,
    layout: PoolLayout,
    config: ValidationConfig,
}

impl ValidationPipeline {
    pub fn new(
        toolkit: Arc<dyn MediaToolkit>,
        detector: Arc<dyn ContentDetector>,
        ledger: Arc<dyn AssetLedger>,
        layout: PoolLayout,
        config: ValidationConfig,
    ) -> Self {
        Self {
            toolkit,
            detector,
            ledger,
            layout,
            config,
        }
    }

    /// Validate a raw download end to end.
    ///
    /// On success the approved file is in place and the ledger updated; on
    /// rejection every copy of the clip is gone and the clip id is
    /// blacklisted.
    pub async fn validate_clip(
        &self,
        job_id: &JobId,
        clip_id: &str,
        raw_path: &Path,
    ) -> MediaResult<ValidationVerdict> {
        let transform_path = self.layout.transform_path(clip_id);
        self.toolkit.normalize(raw_path, &transform_path).await?;

        // Aspect fix replaces the transformed file in place.
        self.toolkit
            .crop(&transform_path, &self.config.aspect)
            .await?;

        let validating_path = self.layout.validating_path(job_id, clip_id);
        atomic_move(&transform_path, &validating_path).await?;

        let detection = match self.detector.detect(&validating_path).await {
            Ok(detection) => detection,
            Err(e) => {
                // Put the file back where a re-run will find it before
                // surfacing the error.
                atomic_move(&validating_path, &transform_path).await?;
                return Err(e.into());
            }
        };

        if detection.is_unreadable() {
            // No decodable frames means a corrupt asset, whatever the
            // reported confidence says.
            warn!(clip_id, "Detector decoded zero frames, blacklisting clip");
            return self
                .finalize_reject(
                    job_id,
                    clip_id,
                    &validating_path,
                    raw_path,
                    "unreadable asset: zero frames decoded",
                    Some(detection.confidence),
                )
                .await;
        }

        if detection.has_content && detection.confidence >= self.config.confidence_threshold {
            let reason = format!(
                "unwanted content in {}/{} frames",
                detection.frames_with_content, detection.frames_processed
            );
            return self
                .finalize_reject(
                    job_id,
                    clip_id,
                    &validating_path,
                    raw_path,
                    &reason,
                    Some(detection.confidence),
                )
                .await;
        }

        self.finalize_accept(clip_id, &validating_path, raw_path, detection.confidence)
            .await
    }

    async fn finalize_accept(
        &self,
        clip_id: &str,
        validating_path: &Path,
        raw_path: &Path,
        confidence: f64,
    ) -> MediaResult<ValidationVerdict> {
        let approved_path = self.layout.approved_path(clip_id);
        atomic_move(validating_path, &approved_path).await?;
        self.ledger.add_approved(clip_id, Some(confidence)).await?;
        self.cleanup_earlier_stages(clip_id, raw_path).await;

        info!(clip_id, path = %approved_path.display(), "Clip approved");
        metrics::counter!("reel_validation_approved_total").increment(1);
        Ok(ValidationVerdict::Approved {
            path: approved_path,
        })
    }

    async fn finalize_reject(
        &self,
        job_id: &JobId,
        clip_id: &str,
        validating_path: &Path,
        raw_path: &Path,
        reason: &str,
        confidence: Option<f64>,
    ) -> MediaResult<ValidationVerdict> {
        remove_if_exists(validating_path).await?;
        self.cleanup_earlier_stages(clip_id, raw_path).await;
        self.ledger
            .add_rejected(clip_id, reason, confidence)
            .await?;

        info!(job_id = %job_id, clip_id, reason, "Clip rejected and blacklisted");
        metrics::counter!("reel_validation_rejected_total").increment(1);
        Ok(ValidationVerdict::Rejected {
            reason: reason.to_string(),
        })
    }

    /// Remove raw and transform copies of a clip. Best effort; the sweep
    /// reclaims anything left behind.
    async fn cleanup_earlier_stages(&self, clip_id: &str, raw_path: &Path) {
        if let Err(e) = remove_if_exists(raw_path).await {
            warn!(clip_id, "Failed to remove raw file: {}", e);
        }
        if let Err(e) = remove_if_exists(self.layout.transform_path(clip_id)).await {
            warn!(clip_id, "Failed to remove transform file: {}", e);
        }
        // Downloads with a different extension than the recorded raw path
        match self.layout.raw_files_for(clip_id).await {
            Ok(leftovers) => {
                for path in leftovers {
                    if let Err(e) = remove_if_exists(&path).await {
                        warn!(clip_id, "Failed to remove raw leftover: {}", e);
                    }
                }
            }
            Err(e) => warn!(clip_id, "Failed to scan raw dir: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reel_clients::{ClientResult, Detection, MediaInfo};
    use reel_store::MemoryStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Toolkit fake that moves bytes around like the real collaborator.
    struct FakeToolkit;

    #[async_trait]
    impl MediaToolkit for FakeToolkit {
        async fn probe(&self, _path: &Path) -> ClientResult<MediaInfo> {
            Ok(MediaInfo {
                duration: 10.0,
                width: None,
                height: None,
                fps: None,
            })
        }

        async fn normalize(&self, src: &Path, dst: &Path) -> ClientResult<MediaInfo> {
            tokio::fs::copy(src, dst).await.unwrap();
            self.probe(dst).await
        }

        async fn crop(&self, path: &Path, _aspect: &str) -> ClientResult<MediaInfo> {
            self.probe(path).await
        }

        async fn concat(&self, _inputs: &[PathBuf], dst: &Path) -> ClientResult<MediaInfo> {
            tokio::fs::write(dst, b"concat").await.unwrap();
            self.probe(dst).await
        }

        async fn compose(
            &self,
            _video: &Path,
            _audio: &Path,
            _subtitles: &Path,
            dst: &Path,
        ) -> ClientResult<MediaInfo> {
            tokio::fs::write(dst, b"composed").await.unwrap();
            self.probe(dst).await
        }

        async fn trim(&self, _src: &Path, dst: &Path, _duration: f64) -> ClientResult<MediaInfo> {
            tokio::fs::write(dst, b"trimmed").await.unwrap();
            self.probe(dst).await
        }
    }

    /// Detector fake returning a scripted verdict.
    struct FakeDetector {
        detection: Mutex<Detection>,
    }

    impl FakeDetector {
        fn returning(detection: Detection) -> Self {
            Self {
                detection: Mutex::new(detection),
            }
        }
    }

    #[async_trait]
    impl ContentDetector for FakeDetector {
        async fn detect(&self, _video_path: &Path) -> ClientResult<Detection> {
            Ok(self.detection.lock().unwrap().clone())
        }
    }

    struct Fixture {
        _dir: TempDir,
        layout: PoolLayout,
        ledger: Arc<MemoryStore>,
        raw_path: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = PoolLayout::new(dir.path());
        layout.ensure_dirs().await.unwrap();

        let raw_path = layout.raw_dir().join("clip-1.webm");
        tokio::fs::write(&raw_path, b"raw bytes").await.unwrap();

        Fixture {
            _dir: dir,
            layout,
            ledger: Arc::new(MemoryStore::new()),
            raw_path,
        }
    }

    fn pipeline(fx: &Fixture, detection: Detection) -> ValidationPipeline {
        ValidationPipeline::new(
            Arc::new(FakeToolkit),
            Arc::new(FakeDetector::returning(detection)),
            fx.ledger.clone(),
            fx.layout.clone(),
            ValidationConfig::default(),
        )
    }

    fn clean_detection() -> Detection {
        Detection {
            has_content: false,
            confidence: 0.9,
            sample: None,
            frames_processed: 100,
            frames_with_content: 0,
        }
    }

    #[tokio::test]
    async fn test_accept_moves_to_approved_and_cleans_up() {
        let fx = fixture().await;
        let pipeline = pipeline(&fx, clean_detection());
        let job_id = JobId::new();

        let verdict = pipeline
            .validate_clip(&job_id, "clip-1", &fx.raw_path)
            .await
            .unwrap();

        let approved_path = fx.layout.approved_path("clip-1");
        assert_eq!(
            verdict,
            ValidationVerdict::Approved {
                path: approved_path.clone()
            }
        );
        assert!(approved_path.exists());
        assert!(fx.ledger.is_approved("clip-1").await.unwrap());

        // Exactly one copy remains, in approved/
        assert!(!fx.raw_path.exists());
        assert!(!fx.layout.transform_path("clip-1").exists());
        assert!(!fx.layout.validating_path(&job_id, "clip-1").exists());
    }

    #[tokio::test]
    async fn test_reject_deletes_everything_and_blacklists() {
        let fx = fixture().await;
        let pipeline = pipeline(
            &fx,
            Detection {
                has_content: true,
                confidence: 0.8,
                sample: Some("frame_3".into()),
                frames_processed: 50,
                frames_with_content: 12,
            },
        );
        let job_id = JobId::new();

        let verdict = pipeline
            .validate_clip(&job_id, "clip-1", &fx.raw_path)
            .await
            .unwrap();

        assert!(matches!(verdict, ValidationVerdict::Rejected { .. }));
        assert!(fx.ledger.is_rejected("clip-1").await.unwrap());
        assert!(!fx.ledger.is_approved("clip-1").await.unwrap());

        assert!(!fx.raw_path.exists());
        assert!(!fx.layout.transform_path("clip-1").exists());
        assert!(!fx.layout.validating_path(&job_id, "clip-1").exists());
        assert!(!fx.layout.approved_path("clip-1").exists());
    }

    #[tokio::test]
    async fn test_low_confidence_content_is_accepted() {
        let fx = fixture().await;
        let pipeline = pipeline(
            &fx,
            Detection {
                has_content: true,
                confidence: 0.3,
                sample: None,
                frames_processed: 50,
                frames_with_content: 2,
            },
        );

        let verdict = pipeline
            .validate_clip(&JobId::new(), "clip-1", &fx.raw_path)
            .await
            .unwrap();
        assert!(matches!(verdict, ValidationVerdict::Approved { .. }));
    }

    #[tokio::test]
    async fn test_zero_frames_rejects_regardless_of_confidence() {
        let fx = fixture().await;
        // has_content=false and sky-high confidence: still a rejection,
        // because nothing was actually decoded.
        let pipeline = pipeline(
            &fx,
            Detection {
                has_content: false,
                confidence: 0.99,
                sample: None,
                frames_processed: 0,
                frames_with_content: 0,
            },
        );

        let verdict = pipeline
            .validate_clip(&JobId::new(), "clip-1", &fx.raw_path)
            .await
            .unwrap();

        match verdict {
            ValidationVerdict::Rejected { reason } => {
                assert!(reason.contains("unreadable"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(fx.ledger.is_rejected("clip-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_use_distinct_validating_files() {
        let fx = fixture().await;
        let job_a = JobId::new();
        let job_b = JobId::new();

        let path_a = fx.layout.validating_path(&job_a, "clip-1");
        let path_b = fx.layout.validating_path(&job_b, "clip-1");
        assert_ne!(path_a, path_b);
    }
}
