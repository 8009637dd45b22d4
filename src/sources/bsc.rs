//! BIDV Securities (`bsc`).
//!
//! JSON listing at `baocaophantich/{category}` paged by `trang` (1-based) with
//! a fixed page size of 12; `totalRecords` gives the record count. Vietnamese
//! only. Reports carry no downloadable document.

use crate::crawler::SourceAdapter;
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource};
use crate::paginator::{ListingPage, TotalField};
use crate::sources::fetch_json_listing;

pub const BASE_URL: &str = "https://bvsc.com.vn/";
const PAGE_SIZE: u32 = 12;

const CATALOG: &[(ReportType, &str)] = &[
    (ReportType::CompanyResearch, "99277"),
    (ReportType::SectorReports, "99278"),
    (ReportType::MarketCommentary, "6390"),
    (ReportType::Strategy, "6391"),
    (ReportType::Economics, "6392"),
    (ReportType::BondReport, "99276"),
];

const FIELDS: FieldMap = FieldMap {
    headline: Localized::same("name"),
    date: "ngayHienThi",
    body: Some(Localized::same("description")),
    analyst: None,
    ticker: Some("maCK"),
    recommendation: RecommendationRule {
        field: None,
        headline_fallback: true,
        document_fallback: false,
    },
    link: Some(Localized::same("url")),
    link_template: LinkTemplate::prefixed(Localized::same(BASE_URL)),
    id: None,
    document: DocumentSource::None,
    renderable: RenderSource::None,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Bsc;

impl SourceAdapter for Bsc {
    fn source(&self) -> SourceId {
        SourceId::Bsc
    }

    fn categories(&self) -> Vec<Category> {
        CATALOG
            .iter()
            .map(|&(report_type, code)| Category {
                report_type,
                language: Language::Vi,
                endpoint: format!("{BASE_URL}baocaophantich/{code}"),
                code: Some(code.to_string()),
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
        let url = page_url(category, cursor);
        fetch_json_listing(http, &url, "items", TotalField::Records("totalRecords")).await
    }
}

fn page_url(category: &Category, cursor: &PageCursor) -> String {
    format!(
        "{}?trang={}&sotin={}&culture={}",
        category.endpoint,
        cursor.page_index,
        cursor.page_size,
        category.language.code()
    )
}
