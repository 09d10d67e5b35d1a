//! Progress-callback trait for per-job pipeline events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves a job through its stages.
//!
//! Besides progress reporting the trait carries one alert hook,
//! [`JobProgressCallback::on_status_write_failed`]. Failure annotation is
//! best-effort and never propagates an error, so this hook is the only
//! signal that a record may be stranded in `processing`.
//!
//! # Example
//!
//! ```rust
//! use pdf_signpages::{JobProgressCallback, PipelineConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, _job_id: &str, _stage: Stage) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { done: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! assert!(config.progress_callback.is_some());
//! ```

use crate::convert::Stage;
use crate::job::JobStatus;
use std::sync::Arc;

/// Called by the orchestrator as it processes a job.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Several jobs may share one callback, so
/// implementations must be `Send + Sync`.
pub trait JobProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, job_id: &str, stage: Stage) {
        let _ = (job_id, stage);
    }

    /// Called when a stage finishes without error.
    fn on_stage_complete(&self, job_id: &str, stage: Stage) {
        let _ = (job_id, stage);
    }

    /// Called after each page image upload attempt.
    ///
    /// # Arguments
    /// * `page`  — 1-indexed page number
    /// * `total` — number of images being uploaded
    /// * `ok`    — whether a URL came back
    fn on_page_uploaded(&self, job_id: &str, page: u32, total: usize, ok: bool) {
        let _ = (job_id, page, total, ok);
    }

    /// Called when a job ends, successfully or not.
    fn on_job_complete(&self, job_id: &str, status: JobStatus) {
        let _ = (job_id, status);
    }

    /// Called when writing a status to the record store failed and the
    /// error was swallowed.
    fn on_status_write_failed(&self, job_id: &str, status: JobStatus, error: &str) {
        let _ = (job_id, status, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        uploads_ok: AtomicUsize,
        uploads_failed: AtomicUsize,
        alerts: Mutex<Vec<String>>,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _job_id: &str, _stage: Stage) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _job_id: &str, _stage: Stage) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_uploaded(&self, _job_id: &str, _page: u32, _total: usize, ok: bool) {
            if ok {
                self.uploads_ok.fetch_add(1, Ordering::SeqCst);
            } else {
                self.uploads_failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_status_write_failed(&self, job_id: &str, status: JobStatus, error: &str) {
            self.alerts
                .lock()
                .unwrap()
                .push(format!("{job_id}:{status}:{error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start("j", Stage::Augment);
        cb.on_stage_complete("j", Stage::Augment);
        cb.on_page_uploaded("j", 1, 3, true);
        cb.on_job_complete("j", JobStatus::Ready);
        cb.on_status_write_failed("j", JobStatus::Failed, "down");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_stage_start("j", Stage::Rasterize);
        tracker.on_stage_complete("j", Stage::Rasterize);
        tracker.on_page_uploaded("j", 1, 2, true);
        tracker.on_page_uploaded("j", 2, 2, false);
        tracker.on_status_write_failed("j", JobStatus::Failed, "timeout");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.uploads_ok.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.uploads_failed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.alerts.lock().unwrap()[0], "j:failed:timeout");
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn JobProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_stage_start("j", Stage::Collect);
    }
}
