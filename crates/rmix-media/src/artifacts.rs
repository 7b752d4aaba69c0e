//! Per-job temp artifact namespace and output promotion.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

/// Normalized reaction segment.
pub const REACTION_SEGMENT: &str = "reaction.mp4";
/// Normalized demo segment.
pub const DEMO_SEGMENT: &str = "demo.mp4";
/// Concat demuxer manifest.
pub const SEGMENT_LIST: &str = "segments.txt";
/// Wrapped hook text read by drawtext.
pub const HOOK_TEXT: &str = "hook.txt";
/// Concatenated program before music is mixed in.
pub const PROGRAM: &str = "program.mp4";
/// Finished output, moved into place on success.
pub const FINAL: &str = "final.mp4";

/// A private directory under the work dir holding one job's intermediates.
///
/// Named `{stem}-XXXXXX`, so concurrent jobs never share files. The
/// directory and everything in it is removed on [`close`](Self::close) or
/// when the scope is dropped.
#[derive(Debug)]
pub struct ArtifactScope {
    dir: TempDir,
}

impl ArtifactScope {
    pub fn create(work_dir: &Path, stem: &str) -> io::Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .tempdir_in(work_dir)?;
        debug!("Created artifact scope {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a named artifact inside the scope.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the scope, reporting failures instead of swallowing them.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed artifact scope {}", path.display());
        Ok(())
    }
}

/// Move a finished artifact to its final location.
///
/// Tries a rename first; across filesystems (EXDEV) it copies to a sibling
/// temp file and renames that, so `dst` never holds a partial file.
pub async fn promote(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, falling back to copy: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(e),
    }
}

// EXDEV on Linux and macOS
fn is_cross_device_error(e: &io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> io::Result<()> {
    let staged = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &staged).await {
        let _ = fs::remove_file(&staged).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&staged, dst).await {
        let _ = fs::remove_file(&staged).await;
        return Err(e);
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!("Failed to remove {} after copy: {}", src.display(), e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_is_namespaced_and_removed() {
        let work = TempDir::new().unwrap();
        let scope = ArtifactScope::create(work.path(), "b42_0").unwrap();
        let root = scope.path().to_path_buf();

        assert!(root
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("b42_0-"));
        std::fs::write(scope.artifact(REACTION_SEGMENT), b"x").unwrap();

        scope.close().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_scope_removed_on_drop() {
        let work = TempDir::new().unwrap();
        let root = {
            let scope = ArtifactScope::create(&work.path().join("nested"), "job").unwrap();
            std::fs::write(scope.artifact(DEMO_SEGMENT), b"x").unwrap();
            scope.path().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_scopes_do_not_collide() {
        let work = TempDir::new().unwrap();
        let a = ArtifactScope::create(work.path(), "same").unwrap();
        let b = ArtifactScope::create(work.path(), "same").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_promote_creates_parent_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("final.mp4");
        let dst = dir.path().join("outputs").join("b42").join("b42_0.mp4");

        fs::write(&src, b"new").await.unwrap();
        fs::create_dir_all(dst.parent().unwrap()).await.unwrap();
        fs::write(&dst, b"old").await.unwrap();

        promote(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new");
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&io::Error::from_raw_os_error(2)));
    }
}
