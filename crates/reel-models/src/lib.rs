//! Shared data models for the Reel video-assembly backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their fixed stage pipeline
//! - Per-stage progress records with typed metadata
//! - Candidate clips flowing through fetch, validation and selection
//! - Approved/rejected asset ledger entries
//! - Structured terminal job errors

pub mod candidate;
pub mod error;
pub mod job;
pub mod ledger;
pub mod stage;

// Re-export common types
pub use candidate::{Candidate, DownloadedClip, SpeechSegment, SubtitleSegment, WordTiming};
pub use error::{JobError, JobErrorKind};
pub use job::{Job, JobId, JobStatus};
pub use ledger::{AssetDecision, AssetRecord};
pub use stage::{Stage, StageInfo, StageMetadata, StageStatus};
