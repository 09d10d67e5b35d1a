//! Rasterisation: turn the merged PDF into one JPEG per page.
//!
//! ## Why a subprocess?
//!
//! `pdftoppm` (poppler) renders exactly what the e-signature provider and
//! the customer will see, and keeps any renderer crash out of our process.
//! The child is killed if the future is dropped or the timeout fires.
//!
//! ## Why a trait?
//!
//! The orchestrator only needs "render pages 1..=N of this file into that
//! directory". Tests substitute a fake that writes files directly.

use crate::config::PipelineConfig;
use crate::error::SignPagesError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const STDERR_LIMIT: usize = 500;

/// Renders pages `1..=last_page` (or all pages) of `document` into
/// `output_dir`, naming files `<prefix><sep><page>.<ext>`.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        document: &Path,
        output_dir: &Path,
        prefix: &str,
        last_page: Option<u32>,
    ) -> Result<(), SignPagesError>;
}

/// Runs the poppler `pdftoppm` binary.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
    dpi: u32,
    timeout: Duration,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<PathBuf>, dpi: u32, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            dpi,
            timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.pdftoppm_path.clone(),
            config.dpi,
            config.rasterize_timeout(),
        )
    }

    /// Command-line arguments for one run. Always starts at page 1.
    pub fn build_args(
        &self,
        document: &Path,
        output_dir: &Path,
        prefix: &str,
        last_page: Option<u32>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-f".into(), "1".into()];
        if let Some(last) = last_page.filter(|&p| p > 0) {
            args.push("-l".into());
            args.push(last.to_string().into());
        }
        args.extend([
            "-r".into(),
            self.dpi.to_string().into(),
            "-sep".into(),
            "_".into(),
            "-jpeg".into(),
            document.as_os_str().to_owned(),
            output_dir.join(prefix).into_os_string(),
        ]);
        args
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    async fn rasterize(
        &self,
        document: &Path,
        output_dir: &Path,
        prefix: &str,
        last_page: Option<u32>,
    ) -> Result<(), SignPagesError> {
        let fail = |detail: String| SignPagesError::Rasterization {
            path: document.to_path_buf(),
            detail,
        };

        let args = self.build_args(document, output_dir, prefix, last_page);
        debug!("Running {} {:?}", self.program.display(), args);

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(format!("failed to start {}: {}", self.program.display(), e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| fail(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| fail(format!("failed to wait for rasteriser: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
            return Err(fail(if stderr.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {}", output.status, stderr)
            }));
        }

        info!(
            "Rasterised {} (pages 1..={}) at {} DPI",
            document.display(),
            last_page.map_or_else(|| "end".to_string(), |p| p.to_string()),
            self.dpi
        );
        Ok(())
    }
}
