//! Configuration types for the augmentation and rendering pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Timing knobs (visibility retries, upload
//! pacing) are plain values so tests can set them to zero.

use crate::error::SignPagesError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Extension of the images produced by the rasteriser (`pdftoppm -jpeg`).
pub const IMAGE_EXTENSION: &str = "jpg";

/// Configuration for a conversion pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_signpages::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .dpi(120)
///     .upload_pacing(Duration::ZERO)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 120);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Path or name of the `pdftoppm` executable. Default: `pdftoppm`.
    pub pdftoppm_path: PathBuf,

    /// Rasterisation DPI passed as `-r`. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// File-name prefix for page images. Default: `page`.
    pub page_prefix: String,

    /// Parent directory for per-job working directories. Default: the system temp dir.
    pub work_root: PathBuf,

    /// Directory-listing retries while waiting for page images to become visible.
    pub visibility_retry: RetryPolicy,

    /// Pause between successive uploads. Default: 800 ms.
    ///
    /// The upload endpoint rate-limits and has no batch form.
    pub upload_pacing: Duration,

    /// Upper bound on one rasteriser run in seconds. Default: 300.
    pub rasterize_timeout_secs: u64,

    /// Upper bound on everything after the record lookup, in seconds. Default: 900.
    pub job_timeout_secs: u64,

    /// Per-request timeout for the HTTP adapters, in seconds. Default: 60.
    pub http_timeout_secs: u64,

    /// Maximum characters stored in the record's error annotation. Default: 2000.
    pub error_annotation_limit: usize,

    /// Treat any failed page upload as a job failure. Default: false.
    pub require_all_pages: bool,

    /// Largest accepted insertion index. Default: 500.
    ///
    /// An index past the end of the source is padded with blank pages, so
    /// this also caps how many pages augmentation can add.
    pub max_insert_index: usize,

    /// Colour and size of the invisible anchor text.
    pub anchor_style: AnchorStyle,

    /// Prefix of the per-category record tables. Default: `pdf_conversions`.
    pub table_prefix: String,

    /// Optional observer for stage, upload and alert events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pdftoppm_path: PathBuf::from("pdftoppm"),
            dpi: 150,
            page_prefix: "page".to_string(),
            work_root: std::env::temp_dir(),
            visibility_retry: RetryPolicy::default(),
            upload_pacing: Duration::from_millis(800),
            rasterize_timeout_secs: 300,
            job_timeout_secs: 900,
            http_timeout_secs: 60,
            error_annotation_limit: 2000,
            require_all_pages: false,
            max_insert_index: 500,
            anchor_style: AnchorStyle::default(),
            table_prefix: "pdf_conversions".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("pdftoppm_path", &self.pdftoppm_path)
            .field("dpi", &self.dpi)
            .field("page_prefix", &self.page_prefix)
            .field("work_root", &self.work_root)
            .field("visibility_retry", &self.visibility_retry)
            .field("upload_pacing", &self.upload_pacing)
            .field("rasterize_timeout_secs", &self.rasterize_timeout_secs)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("require_all_pages", &self.require_all_pages)
            .field("max_insert_index", &self.max_insert_index)
            .field("anchor_style", &self.anchor_style)
            .field("table_prefix", &self.table_prefix)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn rasterize_timeout(&self) -> Duration {
        Duration::from_secs(self.rasterize_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Per-request timeout handed to the HTTP store adapters.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn pdftoppm_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdftoppm_path = path.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn page_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.page_prefix = prefix.into();
        self
    }

    pub fn work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.work_root = root.into();
        self
    }

    pub fn visibility_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.visibility_retry = policy;
        self
    }

    pub fn upload_pacing(mut self, pacing: Duration) -> Self {
        self.config.upload_pacing = pacing;
        self
    }

    pub fn rasterize_timeout_secs(mut self, secs: u64) -> Self {
        self.config.rasterize_timeout_secs = secs.max(1);
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = secs.max(1);
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs.max(1);
        self
    }

    pub fn error_annotation_limit(mut self, chars: usize) -> Self {
        self.config.error_annotation_limit = chars;
        self
    }

    pub fn require_all_pages(mut self, v: bool) -> Self {
        self.config.require_all_pages = v;
        self
    }

    pub fn max_insert_index(mut self, index: usize) -> Self {
        self.config.max_insert_index = index.max(1);
        self
    }

    pub fn anchor_style(mut self, style: AnchorStyle) -> Self {
        self.config.anchor_style = style;
        self
    }

    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.table_prefix = prefix.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, SignPagesError> {
        let c = &self.config;
        if c.page_prefix.is_empty()
            || !c
                .page_prefix
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(SignPagesError::InvalidConfig(format!(
                "Page prefix must be non-empty and contain only [A-Za-z0-9_-], got '{}'",
                c.page_prefix
            )));
        }
        if c.page_prefix.ends_with(|ch: char| ch.is_ascii_digit()) {
            return Err(SignPagesError::InvalidConfig(
                "Page prefix must not end with a digit".into(),
            ));
        }
        if c.visibility_retry.max_attempts == 0 {
            return Err(SignPagesError::InvalidConfig(
                "Visibility retry needs at least one attempt".into(),
            ));
        }
        if c.error_annotation_limit == 0 {
            return Err(SignPagesError::InvalidConfig(
                "Error annotation limit must be ≥ 1".into(),
            ));
        }
        if c.table_prefix.trim().is_empty() {
            return Err(SignPagesError::InvalidConfig("Table prefix is empty".into()));
        }
        c.anchor_style.validate()?;
        Ok(self.config)
    }
}

// ── Policies ─────────────────────────────────────────────────────────────

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that tries `max_attempts` times with no pause.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Rendering style of the anchor text.
///
/// White at full opacity is invisible on a white page but still present in
/// the content stream, which is all the text-anchor scanner needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorStyle {
    /// RGB fill colour, each component in 0.0–1.0.
    pub color: [f32; 3],
    /// Fill opacity in 0.0–1.0. Values below 1.0 add an ExtGState to the page.
    pub opacity: f32,
    /// Font size in points.
    pub font_size: f32,
}

impl Default for AnchorStyle {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            opacity: 1.0,
            font_size: 8.0,
        }
    }
}

impl AnchorStyle {
    fn validate(&self) -> Result<(), SignPagesError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !self.color.iter().copied().all(in_unit) || !in_unit(self.opacity) {
            return Err(SignPagesError::InvalidConfig(format!(
                "Anchor colour and opacity must be within 0.0–1.0, got {:?} / {}",
                self.color, self.opacity
            )));
        }
        if !(self.font_size > 0.0) {
            return Err(SignPagesError::InvalidConfig(
                "Anchor font size must be positive".into(),
            ));
        }
        Ok(())
    }
}
