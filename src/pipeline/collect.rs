//! Read back page images, order them numerically and verify the sequence.
//!
//! The rasteriser's output can lag behind its exit on some filesystems
//! (network mounts, overlay layers), so an unusable listing is retried with
//! a fixed delay before it is reported as an error. A listing is usable when
//! it is non-empty, contiguous from the first page and, when the caller knows
//! how many pages to expect, complete.

use crate::config::RetryPolicy;
use crate::error::SignPagesError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Remainder of a file stem after the prefix: optional separator, then digits.
static PAGE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_]?(\d+)$").unwrap());

/// One rendered page image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number parsed from the file name.
    pub page: u32,
    pub path: PathBuf,
}

impl PageImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("page_{}", self.page))
    }
}

/// Page images ordered by page number, contiguous and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImageSet {
    pages: Vec<PageImage>,
}

impl PageImageSet {
    pub fn pages(&self) -> &[PageImage] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.page).collect()
    }
}

/// Lists, filters, sorts and verifies page images.
#[derive(Debug, Clone)]
pub struct SequenceCollector {
    prefix: String,
    extension: String,
    first_page: u32,
    retry: RetryPolicy,
}

/// What one directory listing amounted to.
enum Listing {
    Complete(Vec<PageImage>),
    Empty,
    Gap(u32),
    Short { found: usize },
}

impl SequenceCollector {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
            first_page: 1,
            retry,
        }
    }

    /// Page the sequence must start at. Default: 1.
    pub fn with_first_page(mut self, first_page: u32) -> Self {
        self.first_page = first_page;
        self
    }

    /// Collect the page images in `dir`.
    ///
    /// `expected` is the number of pages the rasteriser was asked to produce,
    /// when known. More images than expected are truncated to the expected
    /// range; fewer are an error once retries run out.
    pub async fn collect(
        &self,
        dir: &Path,
        expected: Option<usize>,
    ) -> Result<PageImageSet, SignPagesError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last = Listing::Empty;

        for attempt in 1..=attempts {
            let found = self.scan(dir).await?;
            last = self.assess(found, expected);

            match last {
                Listing::Complete(pages) => {
                    debug!(
                        "Collected {} page images from {} (attempt {}/{})",
                        pages.len(),
                        dir.display(),
                        attempt,
                        attempts
                    );
                    return Ok(PageImageSet { pages });
                }
                _ if attempt < attempts => {
                    warn!(
                        "Page images in {} not ready (attempt {}/{}), retrying in {:?}",
                        dir.display(),
                        attempt,
                        attempts,
                        self.retry.delay
                    );
                    if !self.retry.delay.is_zero() {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
                _ => {}
            }
        }

        let dir = dir.to_path_buf();
        Err(match last {
            Listing::Gap(missing) => SignPagesError::PageSequenceGap { dir, missing },
            Listing::Short { found } => SignPagesError::IncompletePageSet {
                dir,
                expected: expected.unwrap_or(found),
                found,
            },
            Listing::Empty | Listing::Complete(_) => SignPagesError::NoPagesGenerated { dir, attempts },
        })
    }

    /// Matching, non-empty files in `dir`, sorted by page number.
    async fn scan(&self, dir: &Path) -> Result<Vec<PageImage>, SignPagesError> {
        let io_err = |source: std::io::Error| SignPagesError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
        let mut pages = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name();
            let Some(page) = self.page_number(&name.to_string_lossy()) else {
                continue;
            };
            match entry.metadata().await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => pages.push(PageImage {
                    page,
                    path: entry.path(),
                }),
                _ => {}
            }
        }

        pages.sort_by_key(|p| p.page);
        pages.dedup_by_key(|p| p.page);
        Ok(pages)
    }

    /// Page number encoded in `file_name`, if it belongs to this sequence.
    pub fn page_number(&self, file_name: &str) -> Option<u32> {
        let stem = file_name.strip_prefix(&self.prefix)?;
        let stem = stem.strip_suffix(&self.extension)?.strip_suffix('.')?;
        let caps = PAGE_SUFFIX.captures(stem)?;
        caps.get(1)?.as_str().parse().ok()
    }

    fn assess(&self, mut pages: Vec<PageImage>, expected: Option<usize>) -> Listing {
        if pages.is_empty() {
            return Listing::Empty;
        }

        let mut next = self.first_page;
        for p in &pages {
            if p.page != next {
                return Listing::Gap(next);
            }
            next += 1;
        }

        match expected {
            Some(n) if pages.len() < n => Listing::Short { found: pages.len() },
            Some(n) => {
                pages.truncate(n);
                Listing::Complete(pages)
            }
            None => Listing::Complete(pages),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector(attempts: u32) -> SequenceCollector {
        SequenceCollector::new("page", "jpg", RetryPolicy::immediate(attempts))
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"\xFF\xD8\xFF").unwrap();
    }

    #[test]
    fn parses_page_numbers() {
        let c = collector(1);
        assert_eq!(c.page_number("page_1.jpg"), Some(1));
        assert_eq!(c.page_number("page-07.jpg"), Some(7));
        assert_eq!(c.page_number("page12.jpg"), Some(12));
        assert_eq!(c.page_number("page_1.png"), None);
        assert_eq!(c.page_number("other_1.jpg"), None);
        assert_eq!(c.page_number("page_.jpg"), None);
        assert_eq!(c.page_number("page_1a.jpg"), None);
        assert_eq!(c.page_number("page__1.jpg"), None);
    }

    #[tokio::test]
    async fn sorts_numerically_not_lexically() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=12 {
            touch(dir.path(), &format!("page_{n}.jpg"));
        }
        touch(dir.path(), "augmented.pdf");
        touch(dir.path(), "notes.txt");

        let set = collector(1).collect(dir.path(), Some(12)).await.unwrap();
        assert_eq!(set.page_numbers(), (1..=12).collect::<Vec<_>>());
        assert_eq!(set.pages()[9].file_name(), "page_10.jpg");
    }

    #[tokio::test]
    async fn zero_padded_names() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            touch(dir.path(), &format!("page_{n:02}.jpg"));
        }
        let set = collector(1).collect(dir.path(), None).await.unwrap();
        assert_eq!(set.page_numbers(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_directory_is_no_pages_generated() {
        let dir = tempfile::tempdir().unwrap();
        let err = collector(3).collect(dir.path(), None).await.unwrap_err();
        assert!(
            matches!(err, SignPagesError::NoPagesGenerated { attempts: 3, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn zero_byte_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page_1.jpg"), b"").unwrap();
        let err = collector(1).collect(dir.path(), None).await.unwrap_err();
        assert!(matches!(err, SignPagesError::NoPagesGenerated { .. }));
    }

    #[tokio::test]
    async fn gap_is_never_returned() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "page_1.jpg");
        touch(dir.path(), "page_3.jpg");
        let err = collector(2).collect(dir.path(), None).await.unwrap_err();
        assert!(
            matches!(err, SignPagesError::PageSequenceGap { missing: 2, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn missing_first_page_is_a_gap() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "page_2.jpg");
        let err = collector(1).collect(dir.path(), None).await.unwrap_err();
        assert!(matches!(err, SignPagesError::PageSequenceGap { missing: 1, .. }));
    }

    #[tokio::test]
    async fn short_listing_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "page_1.jpg");
        touch(dir.path(), "page_2.jpg");
        let err = collector(1).collect(dir.path(), Some(4)).await.unwrap_err();
        assert!(
            matches!(
                err,
                SignPagesError::IncompletePageSet {
                    expected: 4,
                    found: 2,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn extra_pages_are_truncated_to_expected() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=5 {
            touch(dir.path(), &format!("page_{n}.jpg"));
        }
        let set = collector(1).collect(dir.path(), Some(3)).await.unwrap();
        assert_eq!(set.page_numbers(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn late_files_are_picked_up_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            touch(&path, "page_1.jpg");
            touch(&path, "page_2.jpg");
        });

        let c = SequenceCollector::new(
            "page",
            "jpg",
            RetryPolicy::new(20, Duration::from_millis(25)),
        );
        let set = c.collect(dir.path(), Some(2)).await.unwrap();
        writer.await.unwrap();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn custom_first_page() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "page_0.jpg");
        touch(dir.path(), "page_1.jpg");
        let c = collector(1).with_first_page(0);
        assert_eq!(c.collect(dir.path(), None).await.unwrap().page_numbers(), vec![0, 1]);
    }
}
