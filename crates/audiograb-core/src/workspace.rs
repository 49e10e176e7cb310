//! Request-scoped scratch directories

use crate::error::{ErrorKind, Stage};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// Temporary directory owned by exactly one conversion request.
///
/// The directory is removed by [`RequestWorkspace::close`], or by `Drop` if the
/// request future is abandoned or panics before reaching cleanup.
#[derive(Debug)]
pub struct RequestWorkspace {
    id: Uuid,
    dir: TempDir,
}

impl RequestWorkspace {
    pub async fn create(root: &Path, id: Uuid) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&format!("audiograb-{}-", id))
                .tempdir_in(root)
        })
        .await
        .map_err(io::Error::other)??;
        debug!("Workspace created: {}", dir.path().display());
        Ok(Self { id, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory and everything in it on the blocking pool.
    /// Failures are logged, never returned.
    pub async fn close(self) {
        let Self { id, dir } = self;
        let path = dir.path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || dir.close())
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        match removed {
            Ok(()) => debug!("Workspace removed: {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Workspace already gone: {}", path.display())
            }
            Err(e) => warn!(
                stage = %Stage::Cleanup,
                kind = %ErrorKind::CleanupWarning,
                request_id = %id,
                path = %path.display(),
                error = %e,
                "Failed to remove request workspace"
            ),
        }
    }
}

/// Remove a file, treating "already gone" as success
pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// First free path for `filename` in `dir`, appending " (2)", " (3)", ... to the stem
pub(crate) fn candidate_path(dir: &Path, filename: &str, attempt: u32) -> PathBuf {
    if attempt <= 1 {
        return dir.join(filename);
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) => dir.join(format!("{} ({}).{}", stem, attempt, ext)),
        None => dir.join(format!("{} ({})", filename, attempt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_makes_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let ws = RequestWorkspace::create(&nested, Uuid::new_v4()).await.unwrap();
        assert!(ws.path().starts_with(&nested));
        assert!(ws.path().is_dir());
    }

    #[tokio::test]
    async fn test_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = RequestWorkspace::create(root.path(), Uuid::new_v4()).await.unwrap();
        let path = ws.path().to_path_buf();
        std::fs::write(path.join("source.mp4"), vec![0u8; 1 << 20]).unwrap();

        ws.close().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_close_tolerates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = RequestWorkspace::create(root.path(), Uuid::new_v4()).await.unwrap();
        std::fs::remove_dir_all(ws.path()).unwrap();
        ws.close().await;
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = RequestWorkspace::create(root.path(), Uuid::new_v4()).await.unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("partial.webm");
        std::fs::write(&file, b"x").unwrap();

        remove_if_exists(&file).await.unwrap();
        remove_if_exists(&file).await.unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_candidate_path() {
        let dir = Path::new("/out");
        assert_eq!(candidate_path(dir, "Song.mp3", 1), dir.join("Song.mp3"));
        assert_eq!(candidate_path(dir, "Song.mp3", 3), dir.join("Song (3).mp3"));
        assert_eq!(candidate_path(dir, "Song", 2), dir.join("Song (2)"));
    }
}
