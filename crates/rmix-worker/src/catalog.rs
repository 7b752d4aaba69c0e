//! Clip id resolution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rmix_models::{Clip, ClipId, ClipKind};

/// Resolves clip ids handed out by the upload subsystem to files.
#[async_trait]
pub trait ClipCatalog: Send + Sync {
    /// The clip, or `None` when it does not exist.
    async fn resolve(&self, kind: ClipKind, id: &ClipId) -> Option<Clip>;
}

/// Clips stored as `{root}/{reactions|demos|music}/{id}`.
#[derive(Debug, Clone)]
pub struct FsClipCatalog {
    root: PathBuf,
}

impl FsClipCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a clip would live; `None` for ids that are not a plain file name.
    pub fn path_for(&self, kind: ClipKind, id: &ClipId) -> Option<PathBuf> {
        id.is_path_safe()
            .then(|| self.root.join(kind.dir_name()).join(id.as_str()))
    }
}

#[async_trait]
impl ClipCatalog for FsClipCatalog {
    async fn resolve(&self, kind: ClipKind, id: &ClipId) -> Option<Clip> {
        let path = self.path_for(kind, id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(Clip::new(id.clone(), kind, path)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolves_by_kind_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("demos")).unwrap();
        std::fs::write(dir.path().join("demos").join("d1.mp4"), b"x").unwrap();

        let catalog = FsClipCatalog::new(dir.path());
        let clip = catalog.resolve(ClipKind::Demo, &"d1.mp4".into()).await.unwrap();
        assert_eq!(clip.path, dir.path().join("demos").join("d1.mp4"));
        assert_eq!(clip.kind, ClipKind::Demo);

        // Same id under another kind does not exist.
        assert!(catalog.resolve(ClipKind::Reaction, &"d1.mp4".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("demos")).unwrap();
        std::fs::write(dir.path().join("secret.mp4"), b"x").unwrap();

        let catalog = FsClipCatalog::new(dir.path().join("uploads"));
        assert!(catalog.path_for(ClipKind::Demo, &"../secret.mp4".into()).is_none());
        assert!(catalog.resolve(ClipKind::Demo, &"..".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_directories_are_not_clips() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("music").join("nested")).unwrap();

        let catalog = FsClipCatalog::new(dir.path());
        assert!(catalog.resolve(ClipKind::Music, &"nested".into()).await.is_none());
    }
}
