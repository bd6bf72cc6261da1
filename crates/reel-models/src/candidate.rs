//! Candidate clips and audio/subtitle segments.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A reusable short clip considered for the final composition.
///
/// Produced by the fetch and download stages, consumed by selection and
/// assembly. Ephemeral: lives in job artifacts, not in durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    /// Provider clip id
    pub clip_id: String,

    /// Clip title, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Duration in seconds
    pub duration: f64,

    /// Local file path once downloaded and validated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

impl Candidate {
    pub fn new(clip_id: impl Into<String>, duration: f64) -> Self {
        Self {
            clip_id: clip_id.into(),
            title: None,
            duration,
            path: None,
            width: None,
            height: None,
            fps: None,
        }
    }

    /// Attach the validated local file path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A downloaded clip as reported by the downloader collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DownloadedClip {
    pub clip_id: String,
    pub path: PathBuf,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

/// A detected speech span in the audio track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// One transcribed subtitle segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubtitleSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Per-word timings, when the transcriber provides them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

/// Word-level timing within a subtitle segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordTiming {
    pub start: f64,
    pub end: f64,
    pub text: String,
}
