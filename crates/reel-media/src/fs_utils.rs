//! Atomic file moves across the pool directories.
//!
//! Pool transitions must be single renames so other workers never observe a
//! partially written file. When source and destination sit on different
//! filesystems, rename fails with EXDEV; the fallback copies to a temp file
//! next to the destination and renames that, keeping the destination-side
//! transition atomic.

use std::path::Path;

use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move `src` to `dst` with a single visible transition on the destination.
pub async fn atomic_move(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, falling back to copy+rename: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_then_rename(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Delete a file, tolerating it already being gone.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// EXDEV is error code 18 on Linux/macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_then_rename(src: &Path, dst: &Path) -> MediaResult<()> {
    // Stage next to dst so the final rename stays on one filesystem.
    let staged = dst.with_extension("tmp");

    fs::copy(src, &staged).await?;

    if let Err(e) = fs::rename(&staged, dst).await {
        let _ = std::fs::remove_file(&staged);
        return Err(e.into());
    }

    // Source removal is best effort; the sweep catches leftovers.
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source after cross-device move {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_move() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.mp4");
        let dst = dir.path().join("approved").join("a.mp4");

        fs::write(&src, b"clip bytes").await.unwrap();
        atomic_move(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"clip bytes");
    }

    #[tokio::test]
    async fn test_atomic_move_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("old.mp4");

        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();

        atomic_move(&src, &dst).await.unwrap();
        assert_eq!(fs::read(&dst).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.mp4");

        assert!(!remove_if_exists(&path).await.unwrap());
        fs::write(&path, b"x").await.unwrap();
        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
