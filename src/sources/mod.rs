//! Brokerage adapters.
//!
//! Each submodule implements [`SourceAdapter`] for one site:
//!
//! - [`bsc`]: BIDV Securities (JSON listing, page number paging)
//! - [`vcsc`]: Vietcap (JSON listing, 0-based pages, reported page count)
//! - [`vcbs`]: VCBS (JSON listing, link resolved through a redirect)
//! - [`vds`]: Rong Viet research reports (offset paging, PDF recommendations)
//! - [`vds_pinboard`]: Rong Viet daily analyst notes (offset paging, inlined images)
//! - [`dsc`]: DSC (Next.js data routes discovered from the build manifest)
//! - [`vnd`]: VNDirect (HTML listing and detail pages through a page renderer)
//!
//! Catalogs are explicit ordered tables; the shared pipeline lives in
//! [`crate::crawler`].

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::crawler::{CrawlStats, SourceCrawler};
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::paginator::{ListingPage, TotalField};
use crate::renderer::{DocumentRenderer, PageRenderer};
use crate::store::ReportSink;

pub mod bsc;
pub mod dsc;
pub mod vcbs;
pub mod vcsc;
pub mod vds;
pub mod vds_pinboard;
pub mod vnd;

/// Crawlable sources, as named in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceName {
    Bsc,
    Vcsc,
    Vcbs,
    Vds,
    VdsPinboard,
    Dsc,
    Vnd,
}

impl SourceName {
    pub const ALL: [SourceName; 7] = [
        SourceName::Bsc,
        SourceName::Vcsc,
        SourceName::Vcbs,
        SourceName::Vds,
        SourceName::VdsPinboard,
        SourceName::Dsc,
        SourceName::Vnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Bsc => "bsc",
            SourceName::Vcsc => "vcsc",
            SourceName::Vcbs => "vcbs",
            SourceName::Vds => "vds",
            SourceName::VdsPinboard => "vds-pinboard",
            SourceName::Dsc => "dsc",
            SourceName::Vnd => "vnd",
        }
    }

    /// Does this source need a browser session?
    pub fn needs_browser(&self) -> bool {
        matches!(self, SourceName::Vnd)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the adapter for `name` and crawl it.
///
/// `session` is only used by sources whose listings need a browser.
pub async fn crawl<F, R, S, P>(
    name: SourceName,
    crawler: &SourceCrawler<'_, F, R, S>,
    session: P,
) -> CrawlStats
where
    F: Fetch,
    R: DocumentRenderer,
    S: ReportSink,
    P: PageRenderer,
{
    match name {
        SourceName::Bsc => crawler.crawl_source(&mut bsc::Bsc).await,
        SourceName::Vcsc => crawler.crawl_source(&mut vcsc::Vcsc).await,
        SourceName::Vcbs => crawler.crawl_source(&mut vcbs::Vcbs).await,
        SourceName::Vds => crawler.crawl_source(&mut vds::Vds).await,
        SourceName::VdsPinboard => crawler.crawl_source(&mut vds_pinboard::VdsPinboard).await,
        SourceName::Dsc => crawler.crawl_source(&mut dsc::Dsc::default()).await,
        SourceName::Vnd => crawler.crawl_source(&mut vnd::Vnd::new(session)).await,
    }
}

/// GET a JSON listing and read its items and size.
pub(crate) async fn fetch_json_listing<F: Fetch>(
    http: &F,
    url: &str,
    items_path: &str,
    total: TotalField,
) -> Result<ListingPage, CrawlError> {
    debug!(url, "Fetching JSON listing");
    let value = http.get_json(url).await?;
    ListingPage::from_json(&value, url, items_path, total)
}
