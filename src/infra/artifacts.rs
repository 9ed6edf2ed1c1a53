//! Filesystem artifact writer with atomic per-file replacement.

use std::{
    io::{self, Write},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::application::repos::{ArtifactWriter, RepoError};

/// Writes artifacts under a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    root: PathBuf,
}

impl FsArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute target for a relative artifact path. Rejects anything that
    /// could land outside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, RepoError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(RepoError::invalid_input(format!(
                "artifact path `{path}` must be relative and stay inside the output root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), RepoError> {
        let target = self.resolve(path)?;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(RepoError::from_persistence)?
            .map_err(RepoError::from_persistence)
    }

    async fn exists(&self, path: &str) -> Result<bool, RepoError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(RepoError::from_persistence)
    }
}

/// Replace `target` with `bytes` through a temp file in the same directory,
/// so readers see either the old or the new content.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.persist(target).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_nested_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FsArtifactWriter::new(dir.path());

        writer
            .write("posts/hello/index.html", b"<html></html>")
            .await
            .expect("write");

        assert!(writer.exists("posts/hello/index.html").await.expect("exists"));
        assert!(!writer.exists("posts/hello/fragment.html").await.expect("exists"));
        let stored = std::fs::read(dir.path().join("posts/hello/index.html")).expect("read");
        assert_eq!(stored, b"<html></html>");
    }

    #[tokio::test]
    async fn rewrite_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FsArtifactWriter::new(dir.path());

        writer.write("feed.xml", b"old").await.expect("first");
        writer.write("feed.xml", b"new").await.expect("second");

        let stored = std::fs::read(dir.path().join("feed.xml")).expect("read");
        assert_eq!(stored, b"new");
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FsArtifactWriter::new(dir.path());

        for path in ["../outside.html", "/etc/passwd", "", "posts/../../x"] {
            let err = writer.write(path, b"x").await.expect_err(path);
            assert!(matches!(err, RepoError::InvalidInput { .. }), "{path}");
        }
    }
}
