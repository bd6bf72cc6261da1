//! HTTP collaborator clients.
//!
//! Every external service the orchestrator talks to sits behind an
//! async trait here, with a reqwest implementation speaking the shared
//! submit-then-poll task contract:
//!
//! - `POST {base}/v1/{op}` returns `{"task_id": ...}`
//! - `GET {base}/v1/{op}/{task_id}` returns
//!   `{"status": "queued|running|completed|failed", "result": ..., "error": ...}`
//!
//! Detectors answer synchronously instead; their calls are single
//! request/response.

pub mod detector;
pub mod downloader;
pub mod error;
pub mod poll;
pub mod shorts;
pub mod toolkit;
pub mod transcriber;
pub mod vad;

pub use detector::{ContentDetector, Detection, HttpContentDetector};
pub use downloader::{Downloader, HttpDownloader};
pub use error::{ClientError, ClientResult};
pub use shorts::{HttpShortsProvider, ShortsProvider};
pub use toolkit::{HttpMediaToolkit, MediaInfo, MediaToolkit};
pub use transcriber::{HttpTranscriber, Transcriber};
pub use vad::{HttpVoiceActivityDetector, VadOutcome, VoiceActivityDetector};
