//! Job orchestration: one conversion request from validation to `ready`.
//!
//! ## Why an explicit stage marker?
//!
//! Every failure after the record enters `processing` is logged with the job
//! id and the stage it happened in, annotated on the record, and surfaced as
//! [`SignPagesError::ProcessingFailed`]. The stage is tracked outside the
//! processing future so a whole-job timeout still knows where it stopped.
//!
//! Cleanup does not depend on how a job ends: the working directory and the
//! caller's source file are removed explicitly at the end of [`Orchestrator::convert`]
//! and, should that code never run, by their `Drop` impls.

use crate::config::{PipelineConfig, IMAGE_EXTENSION};
use crate::error::SignPagesError;
use crate::job::{
    checked_insert_index, field, ConversionRequest, ConversionResult, Fields, JobStatus, ServiceCategory,
    SignatureEvent, SignatureEventOutcome,
};
use crate::pipeline::augment::{self, AugmentedDocument};
use crate::pipeline::collect::SequenceCollector;
use crate::pipeline::layout::SignaturePageContent;
use crate::pipeline::render::{PdftoppmRasterizer, Rasterizer};
use crate::pipeline::upload::{self, UploadItem, UploadRelay};
use crate::pipeline::workspace::{sanitize_job_id, SourceFile, WorkingDirectory};
use crate::status::JobStatusTracker;
use crate::store::{ObjectStore, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Pipeline stage, reported in progress events and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Lookup,
    Augment,
    UploadDocument,
    Rasterize,
    Collect,
    UploadImages,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Lookup => "lookup",
            Stage::Augment => "augment",
            Stage::UploadDocument => "upload_document",
            Stage::Rasterize => "rasterize",
            Stage::Collect => "collect",
            Stage::UploadImages => "upload_images",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of steps 3–7, waiting for the `ready` write.
struct Processed {
    ready_fields: Fields,
    result: ConversionResult,
}

/// Sequences the pipeline stages for conversion jobs.
///
/// One orchestrator can serve many concurrent jobs; each job gets its own
/// working directory and status tracker.
pub struct Orchestrator {
    config: PipelineConfig,
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl Orchestrator {
    /// An orchestrator that rasterises with `pdftoppm` as configured.
    pub fn new(
        config: PipelineConfig,
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let rasterizer = Arc::new(PdftoppmRasterizer::from_config(&config));
        Self {
            config,
            records,
            objects,
            rasterizer,
        }
    }

    /// Replace the rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one conversion job.
    ///
    /// # Errors
    /// - `Validation` / `NotFound` before anything is written (the record
    ///   stays `submitted`)
    /// - `Store` if the record could not be moved to `processing`
    /// - `ProcessingFailed` for any failure afterwards; the record is marked
    ///   `failed` with the underlying error as annotation
    ///
    /// The source file named in the request is deleted in every case.
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionResult, SignPagesError> {
        let started = Instant::now();
        info!("Starting conversion for job '{}'", request.job_id);

        let source = SourceFile::new(request.source_path.clone());
        let result = self.run(&request, &source).await;
        source.remove().await;

        match &result {
            Ok(r) => info!(
                "Job '{}' complete: {} page images ({} missing) in {:.1}s",
                r.job_id,
                r.image_urls.len(),
                r.missing_pages.len(),
                started.elapsed().as_secs_f64()
            ),
            Err(e) if e.is_rejection() => warn!("Job '{}' rejected: {}", request.job_id, e),
            Err(_) => {}
        }
        result
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        source: &SourceFile,
    ) -> Result<ConversionResult, SignPagesError> {
        let job_id = request.job_id.as_str();

        // ── Step 1: Validate ─────────────────────────────────────────────
        self.stage_start(job_id, Stage::Validate);
        let service = validate_request(request, self.config.max_insert_index).await?;
        self.stage_complete(job_id, Stage::Validate);

        // ── Step 2: Resolve table and look up the record ─────────────────
        self.stage_start(job_id, Stage::Lookup);
        let table = service.table(&self.config.table_prefix);
        if !self.records.exists(&table, job_id).await? {
            return Err(SignPagesError::NotFound {
                table,
                job_id: job_id.to_string(),
            });
        }

        let mut tracker = JobStatusTracker::new(self.records.clone(), &table, job_id)
            .with_annotation_limit(self.config.error_annotation_limit)
            .with_progress(self.config.progress_callback.clone());
        tracker.mark_processing(customer_fields(request)).await?;
        self.stage_complete(job_id, Stage::Lookup);

        // ── Steps 3–7 run under the job timeout ──────────────────────────
        let mut stage = Stage::Augment;
        let workspace = match WorkingDirectory::create(&self.config.work_root, job_id).await {
            Ok(w) => w,
            Err(e) => return Err(self.fail(&mut tracker, stage, e).await),
        };

        let outcome = tokio::time::timeout(
            self.config.job_timeout(),
            self.process(request, service, source, &workspace, &tracker, &mut stage),
        )
        .await;

        // Step 8 stays outside the timeout: once `ready` may have been
        // committed, the job must not be marked failed.
        let result = match outcome {
            Ok(Ok(processed)) => match self.finalize(&mut tracker, processed).await {
                Ok(result) => Ok(result),
                Err(e) => Err(self.fail(&mut tracker, Stage::Finalize, e).await),
            },
            Ok(Err(e)) => Err(self.fail(&mut tracker, stage, e).await),
            Err(_) => {
                let e = SignPagesError::Timeout {
                    job_id: job_id.to_string(),
                    secs: self.config.job_timeout_secs,
                };
                Err(self.fail(&mut tracker, stage, e).await)
            }
        };

        workspace.close().await;
        if let Some(cb) = &self.config.progress_callback {
            cb.on_job_complete(job_id, tracker.status());
        }
        result
    }

    async fn process(
        &self,
        request: &ConversionRequest,
        service: ServiceCategory,
        source: &SourceFile,
        workspace: &WorkingDirectory,
        tracker: &JobStatusTracker,
        stage: &mut Stage,
    ) -> Result<Processed, SignPagesError> {
        let job_id = request.job_id.as_str();
        let cfg = &self.config;

        // ── Step 3: Augment ──────────────────────────────────────────────
        self.enter(job_id, stage, Stage::Augment);
        let source_bytes = source.read().await?;
        let content = SignaturePageContent {
            customer_name: request.customer_full_name.clone(),
            total_amount: request.total_investment_amount,
            permit_fee: request.permit_fee,
            manufacturer: request.manufacturer.clone(),
            service_label: service.service_label().to_string(),
        };
        let insert_at = request.insertion_index();
        let style = cfg.anchor_style;

        let augmented: AugmentedDocument = tokio::task::spawn_blocking(move || {
            augment::augment(&source_bytes, insert_at, &content, &style)
        })
        .await
        .map_err(|e| SignPagesError::Internal(format!("Augment task panicked: {}", e)))??;

        let doc_path = workspace.augmented_path();
        tokio::fs::write(&doc_path, &augmented.bytes)
            .await
            .map_err(|source| SignPagesError::Io {
                path: doc_path.clone(),
                source,
            })?;
        info!(
            "Job '{}': augmented document has {} pages (signature pages at {:?})",
            job_id, augmented.page_count, augmented.rendered_pages
        );
        self.stage_complete(job_id, *stage);

        // ── Step 4: Upload the augmented document ───────────────────────
        self.enter(job_id, stage, Stage::UploadDocument);
        let doc_name = format!(
            "{}_merged_{}.pdf",
            sanitize_job_id(job_id),
            chrono::Utc::now().timestamp_millis()
        );
        let modified_pdf_url = self
            .objects
            .upload(&doc_path, &doc_name)
            .await
            .map_err(|e| SignPagesError::DocumentUploadFailed {
                name: doc_name.clone(),
                detail: e.to_string(),
            })?;

        let mut fields = Fields::new();
        fields.insert(field::MODIFIED_PDF_URL.into(), json!(modified_pdf_url));
        fields.insert(field::ANCHOR_STRING.into(), json!(augmented.sign_anchor));
        fields.insert(field::DATE_ANCHOR_STRING.into(), json!(augmented.date_anchor));
        tracker.record(fields).await?;
        self.stage_complete(job_id, *stage);

        // ── Step 5: Rasterise ────────────────────────────────────────────
        self.enter(job_id, stage, Stage::Rasterize);
        let page_count = u32::try_from(augmented.page_count).unwrap_or(u32::MAX);
        let last_page = request.page_limit().map(|p| p.min(page_count));
        self.rasterizer
            .rasterize(&doc_path, workspace.images_dir(), &cfg.page_prefix, last_page)
            .await?;
        self.stage_complete(job_id, *stage);

        // ── Step 6: Collect page images ──────────────────────────────────
        self.enter(job_id, stage, Stage::Collect);
        let expected = last_page.map_or(augmented.page_count, |p| p as usize);
        let images = SequenceCollector::new(&cfg.page_prefix, IMAGE_EXTENSION, cfg.visibility_retry)
            .collect(workspace.images_dir(), Some(expected))
            .await?;
        info!("Job '{}': {} page images generated", job_id, images.len());
        self.stage_complete(job_id, *stage);

        // ── Step 7: Upload page images ───────────────────────────────────
        self.enter(job_id, stage, Stage::UploadImages);
        let items = UploadItem::from_pages(&images, &sanitize_job_id(job_id));
        let total = items.len();
        let progress = cfg.progress_callback.clone();
        let outcomes = UploadRelay::new(self.objects.clone(), cfg.upload_pacing)
            .relay_with(&items, |o| {
                if let Some(cb) = &progress {
                    cb.on_page_uploaded(job_id, o.page, total, o.is_success());
                }
            })
            .await;

        let image_urls = upload::uploaded_urls(&outcomes);
        let missing_pages = upload::missing_pages(&outcomes);
        if image_urls.is_empty() {
            return Err(SignPagesError::AllUploadsFailed { total });
        }
        if !missing_pages.is_empty() {
            if cfg.require_all_pages {
                return Err(SignPagesError::IncompleteUpload {
                    failed: missing_pages.len(),
                    total,
                });
            }
            warn!(
                "Job '{}': {}/{} page uploads failed (pages {:?}); continuing with the rest",
                job_id,
                missing_pages.len(),
                total,
                missing_pages
            );
        }

        let mut fields = Fields::new();
        fields.insert(field::IMAGE_URLS.into(), json!(image_urls));
        tracker.record(fields).await?;
        self.stage_complete(job_id, *stage);

        let mut ready_fields = Fields::new();
        ready_fields.insert(
            field::PROCESSED_PAGES.into(),
            last_page.map_or_else(|| json!("all"), |p| json!(p)),
        );
        ready_fields.insert(
            field::TOTAL_INVESTMENT_AMOUNT.into(),
            json!(request.total_investment_amount),
        );
        ready_fields.insert(field::PERMIT_FEE.into(), json!(request.permit_fee));
        if let Some(m) = &request.manufacturer {
            ready_fields.insert(field::MANUFACTURER.into(), json!(m));
        }

        Ok(Processed {
            ready_fields,
            result: ConversionResult {
                job_id: job_id.to_string(),
                service,
                status: JobStatus::Processing,
                image_urls,
                missing_pages,
                modified_pdf_url,
                anchor_string: augmented.sign_anchor,
                date_anchor_string: augmented.date_anchor,
                page_count: augmented.page_count,
            },
        })
    }

    /// Step 8: processing → ready.
    async fn finalize(
        &self,
        tracker: &mut JobStatusTracker,
        processed: Processed,
    ) -> Result<ConversionResult, SignPagesError> {
        let job_id = tracker.job_id().to_string();
        self.stage_start(&job_id, Stage::Finalize);
        tracker.mark_ready(processed.ready_fields).await?;
        self.stage_complete(&job_id, Stage::Finalize);

        Ok(ConversionResult {
            status: tracker.status(),
            ..processed.result
        })
    }

    // ── Record-level operations ──────────────────────────────────────────

    /// Read back a job record.
    pub async fn fetch_result(&self, service: &str, job_id: &str) -> Result<Fields, SignPagesError> {
        let table = self.resolve_table(service, job_id)?;
        self.records
            .read(&table, job_id)
            .await?
            .ok_or_else(|| SignPagesError::NotFound {
                table,
                job_id: job_id.to_string(),
            })
    }

    /// Persist the signing URL produced by the e-signature trigger.
    pub async fn record_signing_url(
        &self,
        service: &str,
        job_id: &str,
        url: &str,
    ) -> Result<(), SignPagesError> {
        let table = self.resolve_table(service, job_id)?;
        if url.trim().is_empty() {
            return Err(SignPagesError::Validation("Signing URL is required".into()));
        }
        self.require_record(&table, job_id).await?;

        let mut fields = Fields::new();
        fields.insert(field::SIGNING_URL.into(), json!(url.trim()));
        self.records.update(&table, job_id, &fields).await?;
        info!("Job '{}': signing URL recorded", job_id);
        Ok(())
    }

    /// Record an e-signature completion notification.
    ///
    /// Only `completed` events are recorded. The pipeline status is left
    /// alone: a `ready` record stays `ready` once signed.
    pub async fn record_signature_event(
        &self,
        event: &SignatureEvent,
    ) -> Result<SignatureEventOutcome, SignPagesError> {
        let service = ServiceCategory::validate(event.service.as_deref())?;
        if event.job_id.trim().is_empty() {
            return Err(SignPagesError::Validation("Job id is required".into()));
        }
        if !event.status.trim().eq_ignore_ascii_case("completed") {
            debug!(
                "Ignoring '{}' signature event for job '{}'",
                event.status, event.job_id
            );
            return Ok(SignatureEventOutcome::Ignored);
        }

        let table = service.table(&self.config.table_prefix);
        self.require_record(&table, &event.job_id).await?;

        let mut fields = Fields::new();
        fields.insert(field::IS_SIGNED.into(), Value::Bool(true));
        fields.insert(
            field::SIGNED_PDF_URL.into(),
            event.signed_pdf_url.clone().map_or(Value::Null, Value::String),
        );
        self.records.update(&table, &event.job_id, &fields).await?;
        info!("Job '{}': signature completed", event.job_id);
        Ok(SignatureEventOutcome::Recorded)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn resolve_table(&self, service: &str, job_id: &str) -> Result<String, SignPagesError> {
        let service = ServiceCategory::validate(Some(service))?;
        if job_id.trim().is_empty() {
            return Err(SignPagesError::Validation("Job id is required".into()));
        }
        Ok(service.table(&self.config.table_prefix))
    }

    async fn require_record(&self, table: &str, job_id: &str) -> Result<(), SignPagesError> {
        if self.records.exists(table, job_id).await? {
            Ok(())
        } else {
            Err(SignPagesError::NotFound {
                table: table.to_string(),
                job_id: job_id.to_string(),
            })
        }
    }

    /// Log, annotate the record, and wrap the error for the caller.
    async fn fail(
        &self,
        tracker: &mut JobStatusTracker,
        stage: Stage,
        error: SignPagesError,
    ) -> SignPagesError {
        error!(
            "Job '{}' failed at stage {}: {}",
            tracker.job_id(),
            stage,
            error
        );
        tracker.mark_failed(&error.to_string()).await;
        SignPagesError::ProcessingFailed {
            job_id: tracker.job_id().to_string(),
            stage,
            source: Box::new(error),
        }
    }

    fn enter(&self, job_id: &str, current: &mut Stage, next: Stage) {
        *current = next;
        self.stage_start(job_id, next);
    }

    fn stage_start(&self, job_id: &str, stage: Stage) {
        debug!("Job '{}': {} started", job_id, stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_start(job_id, stage);
        }
    }

    fn stage_complete(&self, job_id: &str, stage: Stage) {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_complete(job_id, stage);
        }
    }
}

/// Request checks that need no store access.
async fn validate_request(
    request: &ConversionRequest,
    max_insert_index: usize,
) -> Result<ServiceCategory, SignPagesError> {
    let service = ServiceCategory::validate(request.service.as_deref())?;
    checked_insert_index(request.insert_index, max_insert_index)?;

    if request.job_id.trim().is_empty() {
        return Err(SignPagesError::Validation("Job id is required".into()));
    }

    if request.source_path.as_os_str().is_empty() {
        return Err(SignPagesError::Validation("No source file uploaded".into()));
    }
    match tokio::fs::metadata(&request.source_path).await {
        Ok(meta) if meta.is_file() => {}
        _ => {
            return Err(SignPagesError::Validation(format!(
                "Source file '{}' not found",
                request.source_path.display()
            )))
        }
    }

    for (name, value) in [
        (field::TOTAL_INVESTMENT_AMOUNT, request.total_investment_amount),
        (field::PERMIT_FEE, request.permit_fee),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(SignPagesError::Validation(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }

    Ok(service)
}

/// Fields written when the record enters `processing`.
fn customer_fields(request: &ConversionRequest) -> Fields {
    let mut fields = Fields::new();
    let opt = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);
    fields.insert(field::CUSTOMER_FULL_NAME.into(), opt(&request.customer_full_name));
    fields.insert(field::CUSTOMER_EMAIL.into(), opt(&request.customer_email));
    fields
}

/// Final status of a result, for callers that only hold the record fields.
pub fn record_status(fields: &Fields) -> Option<JobStatus> {
    fields
        .get(field::STATUS)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}
