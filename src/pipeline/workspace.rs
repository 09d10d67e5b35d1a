//! Per-job scratch space and custody of the caller's source upload.
//!
//! ## Why scope objects?
//!
//! Every job writes the merged PDF and a directory of page images. Two jobs
//! must never share those paths, and nothing may be left behind when a job
//! ends, whichever way it ends. [`WorkingDirectory`] wraps a [`TempDir`] whose
//! name carries the sanitised job id, a millisecond timestamp and a random
//! suffix; [`SourceFile`] owns the uploaded source file. Both delete on drop,
//! and both offer an explicit `close` so the orchestrator can log failures.

use crate::error::SignPagesError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// File name of the merged document inside a working directory.
pub const AUGMENTED_FILE_NAME: &str = "augmented.pdf";

const IMAGES_DIR: &str = "pages";
const MAX_ID_CHARS: usize = 48;

/// Exclusive scratch directory for one job invocation.
#[derive(Debug)]
pub struct WorkingDirectory {
    dir: TempDir,
    images: PathBuf,
}

impl WorkingDirectory {
    /// Create a fresh directory under `root`, namespaced by `job_id`.
    pub async fn create(root: &Path, job_id: &str) -> Result<Self, SignPagesError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| SignPagesError::Io { path, source }
        };

        tokio::fs::create_dir_all(root).await.map_err(io_err(root))?;

        let prefix = format!(
            "job-{}-{}-",
            sanitize_job_id(job_id),
            chrono::Utc::now().timestamp_millis()
        );
        let parent = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(parent)
        })
        .await
        .map_err(|e| SignPagesError::Internal(format!("Workspace task panicked: {}", e)))?
        .map_err(io_err(root))?;

        let images = dir.path().join(IMAGES_DIR);
        tokio::fs::create_dir(&images).await.map_err(io_err(&images))?;

        debug!("Created working directory {}", dir.path().display());
        Ok(Self { dir, images })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the rasteriser writes page images.
    pub fn images_dir(&self) -> &Path {
        &self.images
    }

    /// Path of the merged document.
    pub fn augmented_path(&self) -> PathBuf {
        self.dir.path().join(AUGMENTED_FILE_NAME)
    }

    /// Remove the directory now, logging instead of failing.
    pub async fn close(self) {
        let path = self.dir.path().to_path_buf();
        match tokio::task::spawn_blocking(move || self.dir.close()).await {
            Ok(Ok(())) => debug!("Removed working directory {}", path.display()),
            Ok(Err(e)) => warn!("Failed to remove working directory {}: {}", path.display(), e),
            Err(e) => warn!("Removal of working directory {} panicked: {}", path.display(), e),
        }
    }
}

/// Keep `[A-Za-z0-9_-]`, replace everything else, and cap the length.
pub fn sanitize_job_id(job_id: &str) -> String {
    let cleaned: String = job_id
        .chars()
        .take(MAX_ID_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

/// Custody of the caller's uploaded source file. Deleted when dropped.
#[derive(Debug)]
pub struct SourceFile {
    path: Option<PathBuf>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the whole file.
    pub async fn read(&self) -> Result<Vec<u8>, SignPagesError> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| SignPagesError::Internal("Source file already removed".into()))?;
        tokio::fs::read(path)
            .await
            .map_err(|source| SignPagesError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Delete the file now, logging instead of failing. A file that is
    /// already gone is not an error.
    pub async fn remove(mut self) {
        if let Some(path) = self.path.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed source file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove source file {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for SourceFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove source file {}: {}", path.display(), e);
                }
            }
        }
    }
}
