//! External collaborators: the record store and the binary-object store.
//!
//! The pipeline only sees the two traits below. Implementations:
//!
//! | Trait          | Production                | Tests / dry runs        |
//! |----------------|---------------------------|-------------------------|
//! | [`RecordStore`] | [`PostgrestRecordStore`] | [`MemoryRecordStore`]   |
//! | [`ObjectStore`] | [`WebhookObjectStore`]   | [`MemoryObjectStore`]   |

use crate::error::{StoreError, UploadError};
use crate::job::Fields;
use async_trait::async_trait;
use std::path::Path;

pub mod memory;
pub mod postgrest;
pub mod webhook;

pub use memory::{MemoryObjectStore, MemoryRecordStore};
pub use postgrest::PostgrestRecordStore;
pub use webhook::WebhookObjectStore;

/// Key-value record API keyed by table name and job id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether a record with this id exists in `table`.
    async fn exists(&self, table: &str, id: &str) -> Result<bool, StoreError>;

    /// Merge `fields` into the record. Unlisted fields are left alone.
    async fn update(&self, table: &str, id: &str, fields: &Fields) -> Result<(), StoreError>;

    /// All fields of the record, or `None` when it does not exist.
    async fn read(&self, table: &str, id: &str) -> Result<Option<Fields>, StoreError>;
}

/// Accepts a file and returns a public URL for it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, path: &Path, name: &str) -> Result<String, UploadError>;
}

/// MIME type for the two kinds of object the pipeline uploads.
pub fn content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
