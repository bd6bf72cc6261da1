//! Clip pool management and content validation.
//!
//! This crate provides:
//! - The shared pool layout contract (raw/transform/validating/approved)
//! - Atomic file moves with cross-device fallback
//! - The per-clip content validation pipeline
//! - The stale-artifact sweep backing crash recovery

pub mod error;
pub mod fs_utils;
pub mod layout;
pub mod sweep;
pub mod validation;

pub use error::{MediaError, MediaResult};
pub use layout::PoolLayout;
pub use sweep::{ArtifactSweeper, SweepReport};
pub use validation::{ValidationConfig, ValidationPipeline, ValidationVerdict};
