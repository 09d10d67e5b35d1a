//! Error types for the pdf-signpages library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`SignPagesError`] — **Fatal**: the job cannot proceed (bad request,
//!   unreadable PDF, the rasteriser crashed, no pages appeared). Returned as
//!   `Err(SignPagesError)` from [`crate::convert::Orchestrator`] and from the
//!   individual pipeline stages.
//!
//! * [`UploadError`] — **Non-fatal**: a single object upload failed. The
//!   [`crate::pipeline::upload::UploadRelay`] records it as an absent URL and
//!   moves on; the orchestrator decides whether the overall result is usable.
//!
//! * [`StoreError`] — a record-store call failed. Fatal when it happens on the
//!   main path, swallowed when it happens while annotating a failure.

use crate::job::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-signpages library.
#[derive(Debug, Error)]
pub enum SignPagesError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The request is missing a field or carries an invalid value.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No record exists for the job id in the resolved table.
    #[error("Record '{job_id}' not found in table '{table}'")]
    NotFound { table: String, job_id: String },

    // ── Augmentation errors ───────────────────────────────────────────────
    /// The source bytes are not a loadable PDF (or contain no pages).
    #[error("Source document could not be parsed: {0}")]
    DocumentParse(String),

    /// The merged document could not be written out.
    #[error("Augmented document could not be serialised: {0}")]
    DocumentSerialize(String),

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The rasteriser process failed to start, exited non-zero, or timed out.
    #[error("Rasterisation of '{path}' failed: {detail}")]
    Rasterization { path: PathBuf, detail: String },

    /// The output directory stayed empty after every visibility retry.
    #[error("No page images were generated in '{dir}' after {attempts} attempts")]
    NoPagesGenerated { dir: PathBuf, attempts: u32 },

    /// Page images were found but the sequence has a hole in it.
    #[error("Page image sequence in '{dir}' is missing page {missing}")]
    PageSequenceGap { dir: PathBuf, missing: u32 },

    /// Fewer page images than the document has pages in the requested range.
    #[error("Expected {expected} page images in '{dir}', found {found}")]
    IncompletePageSet {
        dir: PathBuf,
        expected: usize,
        found: usize,
    },

    // ── Publishing errors ─────────────────────────────────────────────────
    /// The augmented PDF itself could not be uploaded.
    #[error("Upload of augmented document '{name}' failed: {detail}")]
    DocumentUploadFailed { name: String, detail: String },

    /// Every page image upload failed.
    #[error("All {total} page image uploads failed")]
    AllUploadsFailed { total: usize },

    /// Some page image uploads failed and the configuration requires all of them.
    #[error("{failed}/{total} page image uploads failed")]
    IncompleteUpload { failed: usize, total: usize },

    /// A record-store call on the main path failed.
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// A status change that the job lifecycle does not allow.
    #[error("Invalid status transition for job '{job_id}': {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// The whole job exceeded its time limit.
    #[error("Job '{job_id}' timed out after {secs}s")]
    Timeout { job_id: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing an intermediate file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Caller-facing wrapper ─────────────────────────────────────────────
    /// A pipeline stage failed after the job was marked `processing`.
    ///
    /// The message is deliberately generic; the underlying error is kept as
    /// the [`std::error::Error::source`] and in the record's annotation.
    #[error("Processing failed for job '{job_id}'")]
    ProcessingFailed {
        job_id: String,
        stage: crate::convert::Stage,
        #[source]
        source: Box<SignPagesError>,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignPagesError {
    /// Whether the error was raised before any resource was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SignPagesError::Validation(_) | SignPagesError::NotFound { .. }
        )
    }

    /// The innermost error message, unwrapping [`SignPagesError::ProcessingFailed`].
    pub fn detail(&self) -> String {
        match self {
            SignPagesError::ProcessingFailed { source, .. } => source.detail(),
            other => other.to_string(),
        }
    }
}

/// A non-fatal error for a single object upload.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UploadError {
    /// The file to upload could not be read.
    #[error("Could not read '{name}': {detail}")]
    Read { name: String, detail: String },

    /// The request never got a response.
    #[error("Upload of '{name}' failed: {detail}")]
    Transport { name: String, detail: String },

    /// The endpoint answered with a non-success status.
    #[error("Upload of '{name}' rejected with HTTP {status}: {body}")]
    Rejected {
        name: String,
        status: u16,
        body: String,
    },

    /// The endpoint answered 2xx but no URL could be found in the body.
    #[error("Upload of '{name}' returned no URL")]
    MissingUrl { name: String },

    /// Failure injected by a test double or dry-run store.
    #[error("Upload of '{name}' refused: {reason}")]
    Refused { name: String, reason: String },
}

/// A failed record-store call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure (connection refused, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The store's response body was not what we expected.
    #[error("Unexpected store response: {0}")]
    Decode(String),

    /// Failure injected by a test double.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
