//! # pdf-signpages
//!
//! Add e-signature pages to a PDF, rasterise the result, and publish the page
//! images while tracking the job in an external record store.
//!
//! ## Why this crate?
//!
//! An e-signature provider places its signature and date fields by searching
//! a document for literal anchor strings. This crate renders a signature page
//! (amount summary plus signature block) carrying those anchors as invisible
//! text, inserts it at a caller-chosen position and at the end of the source
//! document, then turns the merged document into an ordered, verified set of
//! JPEG page images for preview.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ConversionRequest
//!  │
//!  ├─ 1. Validate  job id, service category, source file, amounts
//!  ├─ 2. Lookup    record must exist; status submitted → processing
//!  ├─ 3. Augment   insert + append signature pages (lopdf, spawn_blocking)
//!  ├─ 4. Publish   upload merged PDF, record URL and anchors
//!  ├─ 5. Render    pdftoppm → page_N.jpg in a per-job working directory
//!  ├─ 6. Collect   numeric ordering, gap detection, visibility retries
//!  ├─ 7. Upload    sequential, paced page-image uploads
//!  └─ 8. Finalise  record image URLs; status processing → ready
//! ```
//!
//! Any failure after step 2 marks the record `failed` with a truncated error
//! annotation. The working directory and the source file are always removed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_signpages::{ConversionRequest, Orchestrator, PipelineConfig};
//! use pdf_signpages::store::{PostgrestRecordStore, WebhookObjectStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let records = PostgrestRecordStore::new(
//!         "https://project.supabase.co",
//!         "service-key",
//!         Duration::from_secs(60),
//!     )?;
//!     let objects = WebhookObjectStore::new(
//!         "https://hooks.example.com/upload",
//!         Duration::from_secs(60),
//!     )?;
//!     let orchestrator = Orchestrator::new(config, Arc::new(records), Arc::new(objects));
//!
//!     let result = orchestrator
//!         .convert(ConversionRequest {
//!             job_id: "3f2c9a".into(),
//!             service: Some("window".into()),
//!             source_path: "/uploads/proposal.pdf".into(),
//!             insert_index: Some(3),
//!             total_investment_amount: 12_500.0,
//!             permit_fee: 350.0,
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("{} pages, anchor {}", result.image_urls.len(), result.anchor_string);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `signpages` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-signpages = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Requirements
//!
//! Rasterisation shells out to `pdftoppm` from poppler-utils. Set
//! [`PipelineConfig::pdftoppm_path`] if it is not on `PATH`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod status;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AnchorStyle, PipelineConfig, PipelineConfigBuilder, RetryPolicy};
pub use convert::{Orchestrator, Stage};
pub use error::{SignPagesError, StoreError, UploadError};
pub use job::{
    ConversionRequest, ConversionResult, Fields, JobStatus, ServiceCategory, SignatureEvent,
    SignatureEventOutcome,
};
pub use pipeline::augment::{augment, AugmentedDocument};
pub use pipeline::layout::SignaturePageContent;
pub use pipeline::render::{PdftoppmRasterizer, Rasterizer};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use status::JobStatusTracker;
pub use store::{ObjectStore, RecordStore};
