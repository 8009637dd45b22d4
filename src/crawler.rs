//! The shared source crawler.
//!
//! Every brokerage runs through the same state machine, parameterized by a
//! [`SourceAdapter`]:
//!
//! ```text
//! START → FETCH_LISTING → for each page { FETCH_PAGE → for each item {
//!     EXPAND → NORMALIZE → ACQUIRE_DOCUMENT → PERSIST } } → DONE
//! ```
//!
//! # Failure scopes
//!
//! - Item: expansion, normalization and link-probe failures skip the item.
//!   Document and persistence failures are logged and never skip anything.
//! - Page: a failed page after the first is logged and skipped.
//! - Category: a failed first listing page aborts the category.
//! - Source: only a failed [`SourceAdapter::prepare`] or cancellation stops
//!   a source early. Nothing stops the run.
//!
//! Work is strictly sequential: one category, one page, one item at a time,
//! with jittered politeness pauses between page and item fetches.

use futures::StreamExt;
use std::path::PathBuf;
use std::pin::pin;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::acquirer::{DocumentAcquirer, ImagePolicy, RECOMMENDATION_LINES, leading_text_lines};
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, RawItem, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, normalize};
use crate::paginator::{ListingPage, PageSource, Paginator};
use crate::renderer::DocumentRenderer;
use crate::store::{PersistOutcome, ReportSink, StoreGateway};
use crate::utils::{polite_pause, truncate_for_log};

/// The per-brokerage capability set.
pub trait SourceAdapter {
    fn source(&self) -> SourceId;

    /// Ordered (language × report type) matrix to crawl.
    fn categories(&self) -> Vec<Category>;

    /// Index of the first listing page (0 or 1).
    fn first_page(&self) -> u32;

    fn page_size(&self) -> u32;

    fn field_map(&self) -> FieldMap;

    fn image_policy(&self) -> ImagePolicy {
        ImagePolicy::Strip
    }

    /// One-off discovery before the first category (API paths, sessions).
    async fn prepare<F: Fetch>(&mut self, _http: &F) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Fetch the listing page `cursor` points at.
    async fn fetch_listing<F: Fetch>(
        &self,
        http: &F,
        category: &Category,
        cursor: &PageCursor,
    ) -> Result<ListingPage, CrawlError>;

    /// Enrich one raw item before normalization (detail pages, redirects).
    async fn expand_item<F: Fetch>(
        &self,
        _http: &F,
        _category: &Category,
        item: RawItem,
    ) -> Result<RawItem, CrawlError> {
        Ok(item)
    }
}

/// Cooperative cancellation, checked before every page and item.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A sender that cancels the run and the token that observes it.
    pub fn pair() -> (watch::Sender<bool>, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelToken { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    fn check(&self) -> Result<(), CrawlError> {
        if self.is_cancelled() { Err(CrawlError::Cancelled) } else { Ok(()) }
    }
}

/// Jittered pause windows, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    pub page_delay_ms: (u64, u64),
    pub item_delay_ms: (u64, u64),
}

impl Politeness {
    pub const NONE: Politeness = Politeness {
        page_delay_ms: (0, 0),
        item_delay_ms: (0, 0),
    };
}

impl Default for Politeness {
    fn default() -> Self {
        Self {
            page_delay_ms: (2000, 4000),
            item_delay_ms: (1000, 2000),
        }
    }
}

/// Counters for one source (or, merged, for the whole run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub categories: u32,
    pub categories_aborted: u32,
    pub pages: u32,
    pub pages_failed: u32,
    pub items: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub persist_failed: u64,
    pub documents: u64,
    pub cancelled: bool,
}

impl CrawlStats {
    pub fn merge(&mut self, other: &CrawlStats) {
        self.categories += other.categories;
        self.categories_aborted += other.categories_aborted;
        self.pages += other.pages;
        self.pages_failed += other.pages_failed;
        self.items += other.items;
        self.persisted += other.persisted;
        self.duplicates += other.duplicates;
        self.dropped += other.dropped;
        self.persist_failed += other.persist_failed;
        self.documents += other.documents;
        self.cancelled |= other.cancelled;
    }
}

/// Binds an adapter and a category into a [`PageSource`].
struct CategoryListing<'c, A, F> {
    adapter: &'c A,
    http: &'c F,
    category: &'c Category,
    politeness: Politeness,
}

impl<A: SourceAdapter, F: Fetch> PageSource for CategoryListing<'_, A, F> {
    async fn fetch_page(&self, cursor: &PageCursor) -> Result<ListingPage, CrawlError> {
        if cursor.pages_done() > 0 {
            let (lo, hi) = self.politeness.page_delay_ms;
            polite_pause(lo, hi).await;
        }
        self.adapter.fetch_listing(self.http, self.category, cursor).await
    }
}

/// Drives adapters through the pipeline against shared collaborators.
pub struct SourceCrawler<'a, F, R, S> {
    http: &'a F,
    renderer: &'a R,
    gateway: &'a StoreGateway<S>,
    output_dir: PathBuf,
    politeness: Politeness,
    cancel: CancelToken,
    languages: Vec<Language>,
}

impl<'a, F, R, S> SourceCrawler<'a, F, R, S>
where
    F: Fetch,
    R: DocumentRenderer,
    S: ReportSink,
{
    pub fn new(
        http: &'a F,
        renderer: &'a R,
        gateway: &'a StoreGateway<S>,
        output_dir: impl Into<PathBuf>,
        politeness: Politeness,
        cancel: CancelToken,
    ) -> Self {
        Self {
            http,
            renderer,
            gateway,
            output_dir: output_dir.into(),
            politeness,
            cancel,
            languages: Language::ALL.to_vec(),
        }
    }

    /// Restrict crawling to categories in these languages.
    pub fn with_languages(mut self, languages: &[Language]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    /// Crawl every category of one source.
    ///
    /// # Returns
    ///
    /// The source's counters. Failures are logged, never returned.
    #[instrument(level = "info", skip_all, fields(source = %adapter.source()))]
    pub async fn crawl_source<A: SourceAdapter>(&self, adapter: &mut A) -> CrawlStats {
        let t0 = Instant::now();
        let mut stats = CrawlStats::default();
        if self.cancel.is_cancelled() {
            stats.cancelled = true;
            return stats;
        }

        if let Err(e) = adapter.prepare(self.http).await {
            error!(error = %e, "Source preparation failed; skipping source");
            return stats;
        }

        let adapter = &*adapter;
        let categories = adapter
            .categories()
            .into_iter()
            .filter(|c| self.languages.contains(&c.language));
        for category in categories {
            stats.categories += 1;
            match self.crawl_category(adapter, &category, &mut stats).await {
                Ok(()) => {}
                Err(CrawlError::Cancelled) => {
                    warn!("Crawl cancelled");
                    stats.cancelled = true;
                    break;
                }
                Err(e) => {
                    stats.categories_aborted += 1;
                    error!(
                        report_type = %category.report_type,
                        language = %category.language,
                        error = %e,
                        "Category aborted"
                    );
                }
            }
        }

        info!(
            persisted = stats.persisted,
            duplicates = stats.duplicates,
            dropped = stats.dropped,
            persist_failed = stats.persist_failed,
            documents = stats.documents,
            pages = stats.pages,
            pages_failed = stats.pages_failed,
            categories_aborted = stats.categories_aborted,
            elapsed_secs = t0.elapsed().as_secs(),
            "Source finished"
        );
        stats
    }

    #[instrument(level = "info", skip_all, fields(report_type = %category.report_type, language = %category.language))]
    async fn crawl_category<A: SourceAdapter>(
        &self,
        adapter: &A,
        category: &Category,
        stats: &mut CrawlStats,
    ) -> Result<(), CrawlError> {
        self.cancel.check()?;

        let listing = CategoryListing {
            adapter,
            http: self.http,
            category,
            politeness: self.politeness,
        };
        let cursor = PageCursor::new(
            adapter.source(),
            category.report_type,
            adapter.first_page(),
            adapter.page_size(),
        );
        let paginator = Paginator::open(&listing, cursor).await?;
        let page_count = paginator.page_count();
        let field_map = adapter.field_map();
        let images = adapter.image_policy();

        let mut pages = pin!(paginator.into_stream());
        while let Some(batch) = pages.next().await {
            let items = match batch.items {
                Ok(items) => items,
                Err(e) => {
                    stats.pages_failed += 1;
                    warn!(page = batch.number, page_count, error = %e, "Listing page failed; skipping page");
                    self.cancel.check()?;
                    continue;
                }
            };
            stats.pages += 1;
            info!(page = batch.number, page_count, items = items.len(), "Crawling page");

            for raw in items {
                self.cancel.check()?;
                stats.items += 1;
                self.process_item(adapter, category, &field_map, &images, raw, stats)
                    .await;
                let (lo, hi) = self.politeness.item_delay_ms;
                polite_pause(lo, hi).await;
            }
            self.cancel.check()?;
        }
        Ok(())
    }

    async fn process_item<A: SourceAdapter>(
        &self,
        adapter: &A,
        category: &Category,
        field_map: &FieldMap,
        images: &ImagePolicy,
        raw: RawItem,
        stats: &mut CrawlStats,
    ) {
        let raw = match adapter.expand_item(self.http, category, raw).await {
            Ok(raw) => raw,
            Err(e) => {
                stats.dropped += 1;
                warn!(error = %e, "Item expansion failed; skipping item");
                return;
            }
        };

        let mut item = match normalize(
            &raw,
            adapter.source(),
            category.report_type,
            category.language,
            field_map,
        ) {
            Ok(item) => item,
            Err(e) => {
                stats.dropped += 1;
                warn!(
                    event = "data_quality",
                    reason = "item_dropped",
                    error = %e,
                    raw = %truncate_for_log(&raw.to_string(), 200),
                    "Item could not be normalized"
                );
                return;
            }
        };
        debug!(headline = %item.report.headline, "Normalized item");

        if item.link_needs_probe {
            if let Some(link) = item.report.link_web.take() {
                match self.http.get(&link).await {
                    Ok(resp) if resp.is_success() => item.report.link_web = Some(resp.url),
                    Ok(resp) => warn!(url = %link, status = resp.status, "Fallback link unreachable; leaving linkWeb empty"),
                    Err(e) => warn!(url = %link, error = %e, "Fallback link probe failed; leaving linkWeb empty"),
                }
            }
            if matches!(field_map.document, DocumentSource::LinkWeb) {
                item.document_url = item.report.link_web.clone();
            }
        }

        let acquirer = DocumentAcquirer::new(self.http, self.renderer, &self.output_dir);
        let document = acquirer
            .acquire_for(
                &item.report,
                item.document_url.as_deref(),
                item.renderable.as_deref(),
                images,
            )
            .await;

        if let Some(doc) = document {
            stats.documents += 1;
            if item.recommendation_from_document && item.report.recommendation.is_none() {
                item.report.recommendation = leading_text_lines(&doc.bytes, RECOMMENDATION_LINES);
            }
        }

        match self.gateway.persist(&item.report).await {
            PersistOutcome::Inserted => {
                stats.persisted += 1;
                info!(headline = %truncate_for_log(&item.report.headline, 120), "Report stored");
            }
            PersistOutcome::Duplicate => {
                stats.duplicates += 1;
                debug!(headline = %item.report.headline, "Report already stored");
            }
            PersistOutcome::Exhausted { attempts } => {
                stats.persist_failed += 1;
                warn!(attempts, headline = %item.report.headline, "Report not stored");
            }
        }
    }
}
