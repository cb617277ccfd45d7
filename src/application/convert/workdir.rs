//! Per-request working directories and scoped intermediate files.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::error::ConvertError;

const WORKDIR_PREFIX: &str = "presswork-";

/// Exclusive scratch directory for one conversion.
///
/// Removed by [`WorkingDirectory::close`] or, failing that, on drop, so every exit path
/// (including cancellation and unwinding) leaves nothing behind.
#[derive(Debug)]
pub struct WorkingDirectory {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl WorkingDirectory {
    pub async fn create(root: &Path) -> Result<Self, ConvertError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(ConvertError::file("create_temp_root", root))?;
        let parent = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(WORKDIR_PREFIX)
                .tempdir_in(parent)
        })
        .await
        .map_err(io::Error::other)
        .and_then(|created| created)
        .map_err(ConvertError::file("create_workdir", root))?;
        let path = dir.path().to_path_buf();
        debug!(
            target = "presswork::application::convert::workdir",
            op = "workdir::create",
            path = %path.display(),
            "Working directory created"
        );
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory now, logging instead of failing when removal goes wrong.
    pub async fn close(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let removed = tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(io::Error::other)
            .and_then(|closed| closed);
        self.report_removal(removed);
    }

    fn report_removal(&self, removed: io::Result<()>) {
        match removed {
            Ok(()) => debug!(
                target = "presswork::application::convert::workdir",
                op = "workdir::remove",
                path = %self.path.display(),
                "Working directory removed"
            ),
            Err(err) => warn!(
                target = "presswork::application::convert::workdir",
                op = "workdir::remove",
                error_kind = "file_operation_error",
                path = %self.path.display(),
                error = %err,
                "Failed to remove working directory"
            ),
        }
    }
}

// Backstop for cancellation and unwinding; the normal path goes through `close`.
impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.report_removal(dir.close());
        }
    }
}

/// File produced by one pipeline stage and consumed by the next; deleted when dropped.
#[derive(Debug)]
pub(crate) struct IntermediateArtifact {
    path: PathBuf,
}

impl IntermediateArtifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IntermediateArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "presswork::application::convert::workdir",
                op = "intermediate::remove",
                error_kind = "file_operation_error",
                path = %self.path.display(),
                error = %err,
                "Failed to remove intermediate artifact"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_removes_directory_and_contents() {
        let root = TempDir::new().expect("root");
        let workdir = WorkingDirectory::create(root.path()).await.expect("workdir");
        let path = workdir.path().to_path_buf();
        fs::write(workdir.join("document.adoc"), "= Title").expect("write");

        assert!(
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(WORKDIR_PREFIX))
        );
        workdir.close().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let root = TempDir::new().expect("root");
        let path = {
            let workdir = WorkingDirectory::create(root.path()).await.expect("workdir");
            fs::create_dir(workdir.join("images")).expect("nested dir");
            workdir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_root_is_created() {
        let root = TempDir::new().expect("root");
        let nested = root.path().join("a").join("b");
        let workdir = WorkingDirectory::create(&nested).await.expect("workdir");
        assert!(workdir.path().starts_with(&nested));
    }

    #[tokio::test]
    async fn directories_are_never_shared() {
        let root = TempDir::new().expect("root");
        let first = WorkingDirectory::create(root.path()).await.expect("first");
        let second = WorkingDirectory::create(root.path()).await.expect("second");
        assert_ne!(first.path(), second.path());
    }

    #[tokio::test]
    async fn root_that_is_a_file_is_a_file_operation_error() {
        let root = TempDir::new().expect("root");
        let blocked = root.path().join("occupied");
        fs::write(&blocked, b"not a directory").expect("write");

        let err = WorkingDirectory::create(&blocked)
            .await
            .expect_err("cannot nest under a file");
        assert!(matches!(
            err,
            ConvertError::FileOperation {
                operation: "create_temp_root",
                ..
            }
        ));
    }

    #[test]
    fn intermediate_artifact_is_removed_on_drop() {
        let root = TempDir::new().expect("root");
        let path = root.path().join("document.epub");
        fs::write(&path, b"epub").expect("write");

        drop(IntermediateArtifact::new(path.clone()));
        assert!(!path.exists());

        // already gone
        drop(IntermediateArtifact::new(path));
    }
}
