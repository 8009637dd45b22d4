//! Rong Viet daily analyst notes (`vds`, Analyst Pinboard).
//!
//! `management-market-commentary/public-paged`, offset paged in chunks of 20.
//! Notes exist only as HTML, so the body is always rendered to PDF with its
//! images inlined; the public link is `{prefix}{slug}-d{id}`.

use crate::acquirer::ImagePolicy;
use crate::crawler::SourceAdapter;
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource};
use crate::paginator::{ListingPage, TotalField};
use crate::sources::fetch_json_listing;

pub const BASE_URL: &str = "https://vdsc.com.vn";
const API_URL: &str = "https://vdsc.com.vn/data/api/app/management-market-commentary/public-paged";
const PAGE_SIZE: u32 = 20;

const FIELDS: FieldMap = FieldMap {
    headline: Localized::new("title", "titleEn"),
    date: "publishDate",
    body: Some(Localized::new("content", "contentEn")),
    analyst: Some(Localized::new("author", "authorEn")),
    ticker: None,
    recommendation: RecommendationRule {
        field: None,
        headline_fallback: false,
        document_fallback: false,
    },
    link: Some(Localized::new("slug", "slugEn")),
    link_template: LinkTemplate {
        prefix: Localized::new(
            "https://vdsc.com.vn/trung-tam-phan-tich/nhan-dinh-hang-ngay/",
            "https://vdsc.com.vn/en/research/daily-recommendations/",
        ),
        id_separator: Some("-d"),
    },
    id: Some("id"),
    document: DocumentSource::None,
    renderable: RenderSource::Body,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct VdsPinboard;

impl SourceAdapter for VdsPinboard {
    fn source(&self) -> SourceId {
        SourceId::Vds
    }

    fn categories(&self) -> Vec<Category> {
        Language::ALL
            .iter()
            .map(|&language| Category {
                report_type: ReportType::AnalystPinboard,
                language,
                endpoint: format!("{API_URL}?sorting=publishDate%20desc&language={}", language.code()),
                code: None,
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

    fn image_policy(&self) -> ImagePolicy {
        ImagePolicy::Inline {
            base_url: BASE_URL.to_string(),
        }
    }

    async fn fetch_listing<F: Fetch>(
        &self,
        http: &F,
        category: &Category,
        cursor: &PageCursor,
    ) -> Result<ListingPage, CrawlError> {
        let url = format!(
            "{}&skipCount={}&maxResultCount={}",
            category.endpoint,
            cursor.offset(),
            cursor.page_size
        );
        fetch_json_listing(http, &url, "items", TotalField::Records("totalCount")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeFetcher;
    use crate::normalizer::normalize;
    use serde_json::json;

    fn note() -> serde_json::Value {
        json!({
            "id": 812,
            "title": "Thị trường giằng co",
            "titleEn": "Market moves sideways",
            "publishDate": "2024-05-20T08:00:00+07:00",
            "content": "<p>Chỉ số <img src=\"/data/api/app/file-storage/chart\"></p>",
            "contentEn": "<p>The index</p>",
            "author": "Nguyễn Văn A",
            "authorEn": "Nguyen Van A",
            "slug": "thi-truong-giang-co",
            "slugEn": "market-moves-sideways",
            "stockSymbol": [{"name": "VNM"}, {"name": "FPT"}],
        })
    }

    #[test]
    fn test_link_carries_id_suffix() {
        let item = normalize(&note(), SourceId::Vds, ReportType::AnalystPinboard, Language::Vi, &FIELDS).unwrap();
        assert_eq!(
            item.report.link_web.as_deref(),
            Some("https://vdsc.com.vn/trung-tam-phan-tich/nhan-dinh-hang-ngay/thi-truong-giang-co-d812")
        );
        assert!(!item.link_needs_probe);
        assert_eq!(item.report.analyst.as_deref(), Some("Nguyễn Văn A"));
        assert_eq!(item.report.ticker, None);
        assert_eq!(item.document_url, None);
        assert!(item.renderable.as_deref().unwrap().contains("<img"));

        let en = normalize(&note(), SourceId::Vds, ReportType::AnalystPinboard, Language::En, &FIELDS).unwrap();
        assert_eq!(en.report.content.as_deref(), Some("The index"));
        assert_eq!(
            en.report.link_web.as_deref(),
            Some("https://vdsc.com.vn/en/research/daily-recommendations/market-moves-sideways-d812")
        );
    }

    #[test]
    fn test_missing_slug_builds_probe_link() {
        let mut raw = note();
        raw["slugEn"] = json!(null);
        let item = normalize(&raw, SourceId::Vds, ReportType::AnalystPinboard, Language::En, &FIELDS).unwrap();
        assert!(item.link_needs_probe);
        assert_eq!(
            item.report.link_web.as_deref(),
            Some("https://vdsc.com.vn/en/research/daily-recommendations/market-moves-sideways-d812")
        );
    }

    #[tokio::test]
    async fn test_fetch_listing_chunks_of_twenty() {
        let category = &VdsPinboard.categories()[1];
        let mut cursor = PageCursor::new(SourceId::Vds, category.report_type, 0, PAGE_SIZE);
        cursor.advance();
        cursor.advance();
        let http = FakeFetcher::new();
        http.json(
            "https://vdsc.com.vn/data/api/app/management-market-commentary/public-paged?sorting=publishDate%20desc&language=en&skipCount=40&maxResultCount=20",
            json!({"totalCount": 41, "items": [{}]}),
        );
        let page = VdsPinboard.fetch_listing(&http, category, &cursor).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
