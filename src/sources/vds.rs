//! Rong Viet research reports (`vds`).
//!
//! `management-report/public-paged` by group id, offset paged through
//! `skipCount`/`maxResultCount` against `totalCount`. The file-storage URL is
//! both the public link and the document. Company Research carries no
//! structured recommendation, so it is read from the PDF's first lines.

use crate::crawler::SourceAdapter;
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource};
use crate::paginator::{ListingPage, TotalField};
use crate::sources::fetch_json_listing;

const API_URL: &str = "https://vdsc.com.vn/data/api/app/management-report/public-paged";
const FILE_STORAGE: &str = "https://www.vdsc.com.vn/data/api/app/file-storage/";
const PAGE_SIZE: u32 = 100;

/// Group ids in crawl order. Strategy spans two groups.
const CATALOG: &[(ReportType, u32)] = &[
    (ReportType::CompanyResearch, 5),
    (ReportType::Flashnote, 6),
    (ReportType::Strategy, 3),
    (ReportType::Strategy, 4),
    (ReportType::Theme, 7),
    (ReportType::MarketCommentary, 1),
    (ReportType::BrokerageCorner, 2),
    (ReportType::InvestmentOpportunities, 99),
];

const FIELDS: FieldMap = FieldMap {
    headline: Localized::new("title", "titleEn"),
    date: "publishDate",
    body: None,
    analyst: None,
    ticker: None,
    recommendation: RecommendationRule {
        field: None,
        headline_fallback: false,
        document_fallback: true,
    },
    link: Some(Localized::new("file", "fileEn")),
    link_template: LinkTemplate::prefixed(Localized::same(FILE_STORAGE)),
    id: None,
    document: DocumentSource::LinkWeb,
    renderable: RenderSource::None,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Vds;

impl SourceAdapter for Vds {
    fn source(&self) -> SourceId {
        SourceId::Vds
    }

    fn categories(&self) -> Vec<Category> {
        Language::ALL
            .iter()
            .flat_map(|&language| {
                CATALOG.iter().map(move |&(report_type, group)| Category {
                    report_type,
                    language,
                    endpoint: format!("{API_URL}?groupId={group}&language={}", language.code()),
                    code: Some(group.to_string()),
                })
            })
            .collect()
    }

    fn first_page(&self) -> u32 {
        0
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
        let url = format!(
            "{}&sorting=publishDate%20desc&skipCount={}&maxResultCount={}",
            category.endpoint,
            cursor.offset(),
            cursor.page_size
        );
        fetch_json_listing(http, &url, "items", TotalField::Records("totalCount")).await
    }
}
