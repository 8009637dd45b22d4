//! Vietcap (`vcs`).
//!
//! CMS analysis API, one page id per (language, report type), 0-based `page`
//! with a reported `totalPages`. Bodies are HTML; the report PDF sits in
//! `file` and the body is rendered when it has expired.

use crate::crawler::SourceAdapter;
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource};
use crate::paginator::{ListingPage, TotalField};
use crate::sources::fetch_json_listing;

const API_URL: &str = "https://www.vietcap.com.vn/api/cms-service/v1/page/analysis";
const PAGE_SIZE: u32 = 10;

/// (report type, VI page id, EN page id)
const CATALOG: &[(ReportType, u32, u32)] = &[
    (ReportType::CompanyResearch, 144, 230),
    (ReportType::SectorReports, 143, 232),
    (ReportType::MarketCommentary, 141, 229),
    (ReportType::Economics, 146, 228),
    (ReportType::Strategy, 145, 224),
    (ReportType::FixedIncome, 147, 227),
];

const FIELDS: FieldMap = FieldMap {
    headline: Localized::same("name"),
    date: "date",
    body: Some(Localized::same("detail")),
    analyst: None,
    ticker: Some("companyInfo.code"),
    recommendation: RecommendationRule {
        field: None,
        headline_fallback: true,
        document_fallback: false,
    },
    link: Some(Localized::same("link")),
    link_template: LinkTemplate::prefixed(Localized::new(
        "https://www.vietcap.com.vn/vi/",
        "https://www.vietcap.com.vn/en/",
    )),
    id: Some("id"),
    document: DocumentSource::Field {
        key: Localized::same("file"),
        prefix: "https://www.vietcap.com.vn/",
    },
    renderable: RenderSource::Body,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Vcsc;

/// The API's numeric language code.
fn language_id(language: Language) -> u8 {
    match language {
        Language::Vi => 1,
        Language::En => 2,
    }
}

impl SourceAdapter for Vcsc {
    fn source(&self) -> SourceId {
        SourceId::Vcsc
    }

    fn categories(&self) -> Vec<Category> {
        Language::ALL
            .iter()
            .flat_map(|&language| {
                CATALOG.iter().map(move |&(report_type, vi, en)| {
                    let page_id = if language == Language::Vi { vi } else { en };
                    Category {
                        report_type,
                        language,
                        endpoint: API_URL.to_string(),
                        code: Some(page_id.to_string()),
                    }
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
            "{}?is-all=false&page={}&size={}&direction=DESC&sortBy=date&language={}&page-ids={}",
            category.endpoint,
            cursor.page_index,
            cursor.page_size,
            language_id(category.language),
            category.code.as_deref().unwrap_or_default(),
        );
        fetch_json_listing(
            http,
            &url,
            "data.pagingGeneralResponses.content",
            TotalField::Pages("data.pagingGeneralResponses.totalPages"),
        )
        .await
    }
}
