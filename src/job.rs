//! Job-level domain types: the request a caller submits, the status lifecycle,
//! and the result handed back when a job finishes.

use crate::error::SignPagesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Column map written to / read from the record store.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Record field names shared by the tracker and the orchestrator.
pub mod field {
    pub const STATUS: &str = "pdf_status";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const CUSTOMER_FULL_NAME: &str = "customer_full_name";
    pub const CUSTOMER_EMAIL: &str = "customer_email";
    pub const MODIFIED_PDF_URL: &str = "modified_pdf_url";
    pub const ANCHOR_STRING: &str = "anchor_string";
    pub const DATE_ANCHOR_STRING: &str = "date_anchor_string";
    pub const IMAGE_URLS: &str = "image_urls";
    pub const PROCESSED_PAGES: &str = "processed_pages";
    pub const TOTAL_INVESTMENT_AMOUNT: &str = "total_investment_amount";
    pub const PERMIT_FEE: &str = "permit_fee";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const SIGNING_URL: &str = "signing_url";
    pub const IS_SIGNED: &str = "is_signed";
    pub const SIGNED_PDF_URL: &str = "signed_pdf_url";
}

// ── Service category ─────────────────────────────────────────────────────

/// The product line a job belongs to. Selects the record table for the
/// lifetime of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Window,
    Roofing,
    Solar,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 3] = [
        ServiceCategory::Window,
        ServiceCategory::Roofing,
        ServiceCategory::Solar,
    ];

    /// Lower-case identifier used in table names and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Window => "window",
            ServiceCategory::Roofing => "roofing",
            ServiceCategory::Solar => "solar",
        }
    }

    /// Record table for this category, e.g. `pdf_conversions_solar`.
    pub fn table(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.as_str())
    }

    /// Line-item description printed in the amount table.
    pub fn service_label(&self) -> &'static str {
        match self {
            ServiceCategory::Window => "Window Installation",
            ServiceCategory::Roofing => "Roofing Installation",
            ServiceCategory::Solar => "Solar Installation",
        }
    }

    /// Validate an optional, caller-supplied category string.
    pub fn validate(raw: Option<&str>) -> Result<Self, SignPagesError> {
        match raw.map(str::trim) {
            None | Some("") => Err(SignPagesError::Validation("Service is required".into())),
            Some(s) => s.parse(),
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = SignPagesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "window" => Ok(ServiceCategory::Window),
            "roofing" => Ok(ServiceCategory::Roofing),
            "solar" => Ok(ServiceCategory::Solar),
            other => Err(SignPagesError::Validation(format!(
                "Invalid service '{other}' (expected window, roofing or solar)"
            ))),
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status ───────────────────────────────────────────────────────────────

/// Lifecycle status of a conversion job.
///
/// `Submitted → Processing → {Ready | Failed}`; the two terminal states
/// accept no further transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Submitted,
    Processing,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Processing => "processing",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    /// Whether `self → next` is a legal step of the lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Submitted, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Ready)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SignPagesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(JobStatus::Submitted),
            "processing" => Ok(JobStatus::Processing),
            "ready" => Ok(JobStatus::Ready),
            "failed" => Ok(JobStatus::Failed),
            other => Err(SignPagesError::Validation(format!("Unknown status '{other}'"))),
        }
    }
}

// ── Request / result ─────────────────────────────────────────────────────

/// One conversion submission.
///
/// `service` is kept as the raw caller string so validation happens inside
/// the orchestrator, after the source upload has been taken into custody.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// External record id. Required.
    pub job_id: String,
    /// Target category (`window`, `roofing`, `solar`). Required.
    pub service: Option<String>,
    /// Path of the uploaded source PDF. Deleted when the job ends.
    pub source_path: PathBuf,
    /// 1-based insertion position. Non-positive values mean "append only".
    pub insert_index: Option<i64>,
    /// Last page to rasterise (the terms-and-conditions page). All pages when absent.
    pub last_page: Option<u32>,
    pub total_investment_amount: f64,
    pub permit_fee: f64,
    pub manufacturer: Option<String>,
    pub customer_full_name: Option<String>,
    pub customer_email: Option<String>,
}

impl ConversionRequest {
    /// Insertion index if it is a usable positive integer.
    pub fn insertion_index(&self) -> Option<usize> {
        normalize_insert_index(self.insert_index)
    }

    /// Last page if it is a usable positive integer.
    pub fn page_limit(&self) -> Option<u32> {
        self.last_page.filter(|&p| p > 0)
    }
}

/// Map a raw insertion index to `Some(n)` for `n ≥ 1`, otherwise `None`.
pub fn normalize_insert_index(raw: Option<i64>) -> Option<usize> {
    raw.filter(|&i| i > 0).and_then(|i| usize::try_from(i).ok())
}

/// Normalise a raw insertion index and reject one above `max`.
pub fn checked_insert_index(raw: Option<i64>, max: usize) -> Result<Option<usize>, SignPagesError> {
    match normalize_insert_index(raw) {
        Some(index) if index > max => Err(SignPagesError::Validation(format!(
            "Insertion index {index} exceeds the maximum of {max}"
        ))),
        other => Ok(other),
    }
}

/// Returned when a job reaches `ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub job_id: String,
    pub service: ServiceCategory,
    pub status: JobStatus,
    /// Public URLs of the uploaded page images, in page order.
    pub image_urls: Vec<String>,
    /// Page numbers whose upload failed (empty on full success).
    pub missing_pages: Vec<u32>,
    pub modified_pdf_url: String,
    pub anchor_string: String,
    pub date_anchor_string: String,
    /// Page count of the augmented document.
    pub page_count: usize,
}

// ── E-signature events ───────────────────────────────────────────────────

/// Completion notification from the e-signature provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEvent {
    pub job_id: String,
    pub service: Option<String>,
    pub status: String,
    pub signed_pdf_url: Option<String>,
}

/// What [`crate::convert::Orchestrator::record_signature_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEventOutcome {
    /// The envelope completed and the record was updated.
    Recorded,
    /// Non-final event; nothing written.
    Ignored,
}
