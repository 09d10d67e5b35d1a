//! Sequential, paced uploads of page images.
//!
//! Uploads go out one at a time in input order with a fixed pause between
//! them (never after the last). A failed item is recorded with no URL and the
//! relay moves on; deciding whether a partial result is acceptable is the
//! orchestrator's job.

use crate::error::UploadError;
use crate::pipeline::collect::PageImageSet;
use crate::store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One file to upload.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// 1-based page number.
    pub page: u32,
    pub path: PathBuf,
    /// Object name sent to the store.
    pub name: String,
}

impl UploadItem {
    /// Items for every page of `set`, named `<job>_<file name>`.
    pub fn from_pages(set: &PageImageSet, name_prefix: &str) -> Vec<UploadItem> {
        set.pages()
            .iter()
            .map(|p| UploadItem {
                page: p.page,
                path: p.path.clone(),
                name: format!("{}_{}", name_prefix, p.file_name()),
            })
            .collect()
    }
}

/// Result for one item; `url` is `None` when the upload failed.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub page: u32,
    pub name: String,
    pub url: Option<String>,
    pub error: Option<UploadError>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.url.is_some()
    }
}

/// Present URLs in page order.
pub fn uploaded_urls(outcomes: &[UploadOutcome]) -> Vec<String> {
    outcomes.iter().filter_map(|o| o.url.clone()).collect()
}

/// Pages whose upload failed.
pub fn missing_pages(outcomes: &[UploadOutcome]) -> Vec<u32> {
    outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.page)
        .collect()
}

/// Drives uploads through one [`ObjectStore`].
#[derive(Clone)]
pub struct UploadRelay {
    store: Arc<dyn ObjectStore>,
    pacing: Duration,
}

impl UploadRelay {
    pub fn new(store: Arc<dyn ObjectStore>, pacing: Duration) -> Self {
        Self { store, pacing }
    }

    /// Upload every item in order.
    pub async fn relay(&self, items: &[UploadItem]) -> Vec<UploadOutcome> {
        self.relay_with(items, |_| {}).await
    }

    /// Like [`relay`](Self::relay), calling `on_item` after each attempt.
    pub async fn relay_with<F>(&self, items: &[UploadItem], mut on_item: F) -> Vec<UploadOutcome>
    where
        F: FnMut(&UploadOutcome) + Send,
    {
        let mut outcomes = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let outcome = match self.store.upload(&item.path, &item.name).await {
                Ok(url) => {
                    debug!("Page {} uploaded: {}", item.page, url);
                    UploadOutcome {
                        page: item.page,
                        name: item.name.clone(),
                        url: Some(url),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Page {} upload failed: {}", item.page, e);
                    UploadOutcome {
                        page: item.page,
                        name: item.name.clone(),
                        url: None,
                        error: Some(e),
                    }
                }
            };
            on_item(&outcome);
            outcomes.push(outcome);
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use std::path::Path;

    fn items(dir: &Path, n: u32) -> Vec<UploadItem> {
        (1..=n)
            .map(|page| {
                let path = dir.join(format!("page_{page}.jpg"));
                std::fs::write(&path, format!("img{page}")).unwrap();
                UploadItem {
                    page,
                    path,
                    name: format!("job_page_{page}.jpg"),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn uploads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let relay = UploadRelay::new(store.clone(), Duration::ZERO);

        let outcomes = relay.relay(&items(dir.path(), 4)).await;
        assert_eq!(outcomes.len(), 4);
        assert_eq!(
            store.names(),
            vec!["job_page_1.jpg", "job_page_2.jpg", "job_page_3.jpg", "job_page_4.jpg"]
        );
        assert_eq!(
            uploaded_urls(&outcomes)[2],
            "memory://job_page_3.jpg"
        );
        assert!(missing_pages(&outcomes).is_empty());
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_relay() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_calls([1]);
        let relay = UploadRelay::new(store.clone(), Duration::ZERO);

        let mut seen = Vec::new();
        let outcomes = relay
            .relay_with(&items(dir.path(), 3), |o| seen.push((o.page, o.is_success())))
            .await;

        assert_eq!(seen, vec![(1, true), (2, false), (3, true)]);
        assert_eq!(missing_pages(&outcomes), vec![2]);
        assert_eq!(uploaded_urls(&outcomes).len(), 2);
        assert!(outcomes[1].error.is_some());
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn pacing_between_uploads_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let pacing = Duration::from_millis(40);
        let relay = UploadRelay::new(store.clone(), pacing);

        let started = std::time::Instant::now();
        relay.relay(&items(dir.path(), 3)).await;
        let elapsed = started.elapsed();

        let objects = store.objects();
        for pair in objects.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= pacing);
        }
        // Two pauses for three uploads
        assert!(elapsed >= pacing * 2);
        assert!(elapsed < pacing * 3 + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn empty_input() {
        let relay = UploadRelay::new(Arc::new(MemoryObjectStore::new()), Duration::from_secs(5));
        assert!(relay.relay(&[]).await.is_empty());
    }
}
