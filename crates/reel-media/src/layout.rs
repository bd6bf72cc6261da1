//! Shared clip pool layout.
//!
//! A clip's working file lives in exactly one of these directories at any
//! instant:
//!
//! - `raw/{clip_id}.*` — as downloaded
//! - `transform/{clip_id}.mp4` — container/codec normalized, then cropped
//!   in place
//! - `validating/{job_id}_{clip_id}_PROCESSING_.mp4` — under detection,
//!   tagged with the owning job
//! - `approved/{clip_id}.mp4` — validated and reusable
//!
//! Transitions between directories are atomic renames. The validating tag
//! carries the job id so concurrent jobs working on the same clip id cannot
//! collide, and so the sweep can tell whose leftovers it is looking at.
//! Job ids are UUIDs and never contain `_`, which is what makes the tag
//! parseable.

use std::path::{Path, PathBuf};

use reel_models::JobId;

use crate::error::{MediaError, MediaResult};

/// Suffix marking an in-flight validation file.
pub const VALIDATING_SUFFIX: &str = "_PROCESSING_.mp4";

/// Paths of the shared candidate pool.
#[derive(Debug, Clone)]
pub struct PoolLayout {
    root: PathBuf,
}

impl PoolLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn transform_dir(&self) -> PathBuf {
        self.root.join("transform")
    }

    pub fn validating_dir(&self) -> PathBuf {
        self.root.join("validating")
    }

    pub fn approved_dir(&self) -> PathBuf {
        self.root.join("approved")
    }

    /// Create all pool directories.
    pub async fn ensure_dirs(&self) -> MediaResult<()> {
        for dir in [
            self.raw_dir(),
            self.transform_dir(),
            self.validating_dir(),
            self.approved_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn transform_path(&self, clip_id: &str) -> PathBuf {
        self.transform_dir().join(format!("{clip_id}.mp4"))
    }

    pub fn approved_path(&self, clip_id: &str) -> PathBuf {
        self.approved_dir().join(format!("{clip_id}.mp4"))
    }

    /// Tagged in-flight path for a clip being validated on behalf of a job.
    pub fn validating_path(&self, job_id: &JobId, clip_id: &str) -> PathBuf {
        self.validating_dir()
            .join(format!("{job_id}_{clip_id}{VALIDATING_SUFFIX}"))
    }

    /// Parse a validating file name back into (job_id, clip_id).
    pub fn parse_validating_name(file_name: &str) -> MediaResult<(JobId, String)> {
        let stem = file_name.strip_suffix(VALIDATING_SUFFIX).ok_or_else(|| {
            MediaError::invalid_path(format!("not a validating file: {file_name}"))
        })?;
        // Job ids are UUIDs, so the first underscore ends the job id.
        let (job_id, clip_id) = stem.split_once('_').ok_or_else(|| {
            MediaError::invalid_path(format!("untagged validating file: {file_name}"))
        })?;
        if job_id.is_empty() || clip_id.is_empty() {
            return Err(MediaError::invalid_path(format!(
                "malformed validating tag: {file_name}"
            )));
        }
        Ok((JobId::from_string(job_id), clip_id.to_string()))
    }

    /// All raw-directory files belonging to a clip id, any extension.
    pub async fn raw_files_for(&self, clip_id: &str) -> MediaResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.raw_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(clip_id) {
                found.push(path);
            }
        }
        Ok(found)
    }
}
