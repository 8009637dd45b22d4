//! Listing pagination.
//!
//! A [`Paginator`] walks one category listing page by page. The first page is
//! fetched eagerly by [`Paginator::open`] to learn the listing's size, either a
//! record count (`ceil(total / page_size)` pages) or a page count reported by
//! the source. Its items are reused as the first batch.
//!
//! After that the sequence is lazy, finite and strictly increasing. It ends
//! after the last reported page even when pages come back empty, and a failed
//! page is handed to the caller as a failed batch instead of being retried.

use futures::Stream;
use futures::stream;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::CrawlError;
use crate::models::{PageCursor, RawItem};
use crate::normalizer::lookup;

/// Listing size as reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingTotal {
    Records(u64),
    Pages(u32),
}

/// One listing page as returned by a source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub items: Vec<RawItem>,
    pub total: ListingTotal,
}

/// Where a JSON listing reports its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalField {
    Records(&'static str),
    Pages(&'static str),
}

impl ListingPage {
    /// Read a JSON listing: an item array at `items_path` and a size at
    /// `total` (dotted paths).
    ///
    /// # Errors
    ///
    /// [`CrawlError::Listing`] when either path is missing or mistyped.
    pub fn from_json(value: &Value, url: &str, items_path: &str, total: TotalField) -> Result<Self, CrawlError> {
        let items = lookup(value, items_path)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| CrawlError::listing(url, format!("no item array at `{items_path}`")))?;

        let (path, as_pages) = match total {
            TotalField::Records(path) => (path, false),
            TotalField::Pages(path) => (path, true),
        };
        let count = lookup(value, path)
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .ok_or_else(|| CrawlError::listing(url, format!("no count at `{path}`")))?;

        let total = if as_pages {
            ListingTotal::Pages(u32::try_from(count).unwrap_or(u32::MAX))
        } else {
            ListingTotal::Records(count)
        };
        Ok(Self { items, total })
    }
}

/// Fetches the page a cursor points at.
pub trait PageSource {
    async fn fetch_page(&self, cursor: &PageCursor) -> Result<ListingPage, CrawlError>;
}

/// One produced page.
#[derive(Debug)]
pub struct PageBatch {
    /// 1-based page number, for logs.
    pub number: u32,
    pub items: Result<Vec<RawItem>, CrawlError>,
}

pub struct Paginator<'a, S> {
    source: &'a S,
    cursor: PageCursor,
    page_count: u32,
    first: Option<Vec<RawItem>>,
}

impl<'a, S: PageSource> Paginator<'a, S> {
    /// Fetch the first page and size the listing.
    ///
    /// # Errors
    ///
    /// Any failure here aborts the category.
    pub async fn open(source: &'a S, mut cursor: PageCursor) -> Result<Self, CrawlError> {
        let first = source.fetch_page(&cursor).await?;
        let page_size = cursor.page_size.max(1);
        cursor.page_size = page_size;

        let page_count = match first.total {
            ListingTotal::Records(total) => {
                cursor.total_count = Some(total);
                u32::try_from(total.div_ceil(u64::from(page_size))).unwrap_or(u32::MAX)
            }
            ListingTotal::Pages(pages) => {
                cursor.total_count = Some(u64::from(pages) * u64::from(page_size));
                pages
            }
        };
        info!(
            source = %cursor.source,
            report_type = %cursor.report_type,
            page_count,
            total = ?first.total,
            "Listing opened"
        );

        let first = (page_count > 0).then_some(first.items);
        Ok(Self {
            source,
            cursor,
            page_count,
            first,
        })
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Produce the next page, or `None` once every reported page is done.
    pub async fn next_batch(&mut self) -> Option<PageBatch> {
        if self.cursor.is_exhausted() {
            return None;
        }
        let number = self.cursor.pages_done() + 1;

        let items = match self.first.take() {
            Some(items) => Ok(items),
            None => {
                debug!(page = number, index = self.cursor.page_index, "Fetching listing page");
                self.source.fetch_page(&self.cursor).await.map(|page| page.items)
            }
        };
        self.cursor.advance();
        Some(PageBatch { number, items })
    }

    /// The remaining pages as a stream.
    pub fn into_stream(self) -> impl Stream<Item = PageBatch> + 'a {
        stream::unfold(self, |mut paginator| async move {
            let batch = paginator.next_batch().await?;
            Some((batch, paginator))
        })
    }
}
