//! VCBS (`vcbs`).
//!
//! `ttpt-reports` JSON API by category code and locale, 1-based `page`, with
//! `meta.totalPages`. The public report URL is only known after following the
//! `bao-cao-phan-tich/{id}` redirect, so every item is expanded with one extra
//! request. That URL doubles as the document link; the HTML description is
//! rendered when it does not serve a file.

use serde_json::Value;
use tracing::{debug, warn};

use crate::crawler::SourceAdapter;
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, RawItem, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource, string_at};
use crate::paginator::{ListingPage, TotalField};
use crate::sources::fetch_json_listing;

pub const BASE_URL: &str = "https://vcbs.com.vn";
const API_URL: &str = "https://vcbs.com.vn/api/v1/ttpt-reports";
const PAGE_SIZE: u32 = 10;

/// Key the resolved public URL is stored under before normalization.
const RESOLVED_LINK: &str = "resolvedLink";

const CATALOG: &[(ReportType, &str)] = &[
    (ReportType::SectorReports, "BCN"),
    (ReportType::MarketCommentary, "BCTT"),
    (ReportType::Futures, "BCCKPS"),
    (ReportType::Economics, "BCVM"),
    (ReportType::BondReport, "BCTP"),
];

const FIELDS: FieldMap = FieldMap {
    headline: Localized::same("name"),
    date: "createdAt",
    body: Some(Localized::same("description")),
    analyst: None,
    ticker: Some("stockSymbol"),
    recommendation: RecommendationRule {
        field: None,
        headline_fallback: false,
        document_fallback: false,
    },
    link: Some(Localized::same(RESOLVED_LINK)),
    link_template: LinkTemplate::VERBATIM,
    id: Some("id"),
    document: DocumentSource::LinkWeb,
    renderable: RenderSource::Body,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Vcbs;

impl SourceAdapter for Vcbs {
    fn source(&self) -> SourceId {
        SourceId::Vcbs
    }

    fn categories(&self) -> Vec<Category> {
        Language::ALL
            .iter()
            .flat_map(|&language| {
                CATALOG.iter().map(move |&(report_type, code)| Category {
                    report_type,
                    language,
                    endpoint: format!("{API_URL}?category_code={code}&locale={}", language.code()),
                    code: Some(code.to_string()),
                })
            })
            .collect()
    }

    fn first_page(&self) -> u32 {
        1
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn field_map(&self) -> FieldMap {
        FIELDS
    }

    async fn fetch_listing<F: Fetch>(
        &self,
        http: &F,
        category: &Category,
        cursor: &PageCursor,
    ) -> Result<ListingPage, CrawlError> {
        let url = format!("{}&page={}", category.endpoint, cursor.page_index);
        fetch_json_listing(http, &url, "data", TotalField::Pages("meta.totalPages")).await
    }

    async fn expand_item<F: Fetch>(
        &self,
        http: &F,
        _category: &Category,
        mut item: RawItem,
    ) -> Result<RawItem, CrawlError> {
        let id = string_at(&item, "id").ok_or_else(|| CrawlError::listing(API_URL, "report without id"))?;
        let resp = http.get(&redirect_url(&id)).await?;
        if !resp.is_success() {
            warn!(
                event = "data_quality",
                reason = "link_unresolved",
                id = %id,
                status = resp.status,
                "Report link did not resolve; keeping the report without one"
            );
            return Ok(item);
        }
        debug!(id = %id, resolved = %resp.url, "Resolved report link");

        if let Value::Object(ref mut map) = item {
            map.insert(RESOLVED_LINK.to_string(), Value::String(resp.url));
        }
        Ok(item)
    }
}

fn redirect_url(id: &str) -> String {
    format!("{BASE_URL}/bao-cao-phan-tich/{id}?login=true")
}
