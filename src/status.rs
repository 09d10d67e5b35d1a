//! Per-job status state machine backed by the record store.
//!
//! ```text
//! submitted ──▶ processing ──▶ ready
//!                    │
//!                    └───────▶ failed
//! ```
//!
//! Transitions are checked locally before anything is written, so an illegal
//! step never reaches the store. Failure annotation is best-effort: a store
//! error while writing `failed` is logged and reported through
//! [`JobProgressCallback::on_status_write_failed`](crate::progress::JobProgressCallback::on_status_write_failed),
//! never returned, so it cannot mask the error that caused the failure.

use crate::error::SignPagesError;
use crate::job::{field, Fields, JobStatus};
use crate::progress::ProgressCallback;
use crate::store::RecordStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default cap on the stored error annotation, in characters.
pub const DEFAULT_ANNOTATION_LIMIT: usize = 2000;

/// Tracks and persists the status of one job.
pub struct JobStatusTracker {
    store: Arc<dyn RecordStore>,
    table: String,
    job_id: String,
    status: JobStatus,
    annotation_limit: usize,
    progress: Option<ProgressCallback>,
}

impl JobStatusTracker {
    /// A tracker for a record currently in `submitted`.
    pub fn new(store: Arc<dyn RecordStore>, table: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            job_id: job_id.into(),
            status: JobStatus::Submitted,
            annotation_limit: DEFAULT_ANNOTATION_LIMIT,
            progress: None,
        }
    }

    pub fn with_annotation_limit(mut self, chars: usize) -> Self {
        self.annotation_limit = chars.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `submitted → processing`, writing `fields` alongside the status.
    pub async fn mark_processing(&mut self, fields: Fields) -> Result<(), SignPagesError> {
        self.transition(JobStatus::Processing, fields).await
    }

    /// Write non-status fields. Only allowed while processing.
    pub async fn record(&self, mut fields: Fields) -> Result<(), SignPagesError> {
        if self.status != JobStatus::Processing {
            return Err(SignPagesError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        fields.remove(field::STATUS);
        self.store.update(&self.table, &self.job_id, &fields).await?;
        Ok(())
    }

    /// `processing → ready`, writing `fields` alongside the status.
    pub async fn mark_ready(&mut self, fields: Fields) -> Result<(), SignPagesError> {
        self.transition(JobStatus::Ready, fields).await?;
        info!("Job '{}' is ready", self.job_id);
        Ok(())
    }

    /// `processing → failed` with a truncated error annotation. Never fails.
    ///
    /// From `submitted` this is a no-op: the record never left its initial
    /// state and must not be marked failed.
    pub async fn mark_failed(&mut self, reason: &str) {
        match self.status {
            JobStatus::Processing => {}
            JobStatus::Submitted => {
                info!(
                    "Job '{}' failed before processing started; record left as submitted",
                    self.job_id
                );
                return;
            }
            terminal => {
                warn!(
                    "Job '{}' is already {}; ignoring failure: {}",
                    self.job_id, terminal, reason
                );
                return;
            }
        }

        let annotation: String = reason.chars().take(self.annotation_limit).collect();
        let mut fields = Fields::new();
        fields.insert(field::STATUS.into(), Value::String(JobStatus::Failed.to_string()));
        fields.insert(field::ERROR_MESSAGE.into(), Value::String(annotation));

        if let Err(e) = self.store.update(&self.table, &self.job_id, &fields).await {
            error!(
                "Failed to record failure for job '{}' in '{}': {}",
                self.job_id, self.table, e
            );
            if let Some(cb) = &self.progress {
                cb.on_status_write_failed(&self.job_id, JobStatus::Failed, &e.to_string());
            }
        }
        self.status = JobStatus::Failed;
    }

    async fn transition(&mut self, next: JobStatus, mut fields: Fields) -> Result<(), SignPagesError> {
        if !self.status.can_transition_to(next) {
            return Err(SignPagesError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to: next,
            });
        }
        fields.insert(field::STATUS.into(), Value::String(next.to_string()));
        self.store.update(&self.table, &self.job_id, &fields).await?;
        info!("Job '{}': {} -> {}", self.job_id, self.status, next);
        self.status = next;
        Ok(())
    }
}
