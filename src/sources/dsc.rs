//! DSC (`dsc`).
//!
//! The site is a Next.js app; listings are read from its data routes
//! (`/_next/data/{build}/bao-cao-phan-tich/{slug}.json`). The build path is not
//! stable, so [`Dsc::prepare`](SourceAdapter::prepare) discovers it once from
//! the `_buildManifest.js` preload link of a category page. Vietnamese only.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::crawler::SourceAdapter;
use crate::error::CrawlError;
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource};
use crate::paginator::{ListingPage, TotalField};
use crate::sources::fetch_json_listing;

pub const BASE_URL: &str = "https://www.dsc.com.vn";
const REPORTS_URL: &str = "https://www.dsc.com.vn/bao-cao-phan-tich/";
const FILE_BASE_URL: &str = "https://extgw.dsc.com.vn/eback";
const PAGE_SIZE: u32 = 10;

const BUILD_MANIFEST: &str = "/_buildManifest.js";

static PRELOAD_SCRIPT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="preload"][as="script"]"#).expect("valid selector"));

const CATALOG: &[(ReportType, &str)] = &[
    (ReportType::CompanyResearch, "phan-tich-doanh-nghiep"),
    (ReportType::Strategy, "bao-cao-chien-luoc-dau-tu"),
    (ReportType::SectorReports, "bao-cao-nganh"),
    (ReportType::Commodities, "bao-cao-thi-truong-hang-hoa"),
    (ReportType::Economics, "bao-cao-vi-mo"),
    (ReportType::Etfs, "bao-cao-etfs"),
    (ReportType::AnalystPinboard, "goc-nhin-chuyen-gia"),
];

const FIELDS: FieldMap = FieldMap {
    headline: Localized::same("attributes.title"),
    date: "attributes.public_at",
    body: Some(Localized::same("attributes.description")),
    analyst: None,
    ticker: None,
    recommendation: RecommendationRule {
        field: None,
        headline_fallback: false,
        document_fallback: false,
    },
    link: Some(Localized::same("attributes.slug")),
    link_template: LinkTemplate::prefixed(Localized::same(REPORTS_URL)),
    id: None,
    document: DocumentSource::Field {
        key: Localized::same("attributes.file.data.0.attributes.url"),
        prefix: FILE_BASE_URL,
    },
    renderable: RenderSource::Body,
};

/// DSC adapter. `data_root` is the discovered `/_next/data/{build}` path.
#[derive(Debug, Default, Clone)]
pub struct Dsc {
    data_root: Option<String>,
}

impl Dsc {
    fn data_root(&self) -> Result<&str, CrawlError> {
        self.data_root
            .as_deref()
            .ok_or_else(|| CrawlError::Config("DSC data route not discovered".to_string()))
    }

    fn page_url(&self, slug: &str, page: u32) -> Result<String, CrawlError> {
        let root = self.data_root()?;
        Ok(if page <= 1 {
            format!("{BASE_URL}{root}/bao-cao-phan-tich/{slug}.json?slug={slug}")
        } else {
            format!("{BASE_URL}{root}/bao-cao-phan-tich/{slug}/{page}.json?slug={slug}&slug={page}")
        })
    }
}

/// Find the Next.js data root in a page's build-manifest preload link.
///
/// # Example
///
/// `/_next/static/abc123/_buildManifest.js` becomes `/_next/data/abc123`.
pub fn discover_data_root(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let href = document
        .select(&PRELOAD_SCRIPT)
        .filter_map(|el| el.value().attr("href"))
        .find(|href| href.ends_with(BUILD_MANIFEST))?;

    let data_href = href.replace("static", "data");
    let (root, _) = data_href.rsplit_once('/')?;
    Some(root.to_string())
}

impl SourceAdapter for Dsc {
    fn source(&self) -> SourceId {
        SourceId::Dsc
    }

    fn categories(&self) -> Vec<Category> {
        CATALOG
            .iter()
            .map(|&(report_type, slug)| Category {
                report_type,
                language: Language::Vi,
                endpoint: format!("{REPORTS_URL}{slug}"),
                code: Some(slug.to_string()),
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

    async fn prepare<F: Fetch>(&mut self, http: &F) -> Result<(), CrawlError> {
        let (_, slug) = CATALOG[0];
        let url = format!("{REPORTS_URL}{slug}");
        let html = http.get_text(&url).await?;
        let root = discover_data_root(&html)
            .ok_or_else(|| CrawlError::listing(&url, "build manifest preload link not found"))?;
        info!(data_root = %root, "Discovered DSC data route");
        self.data_root = Some(root);
        Ok(())
    }

    async fn fetch_listing<F: Fetch>(
        &self,
        http: &F,
        category: &Category,
        cursor: &PageCursor,
    ) -> Result<ListingPage, CrawlError> {
        let slug = category.code.as_deref().unwrap_or_default();
        let url = self.page_url(slug, cursor.page_index)?;
        debug!(slug, page = cursor.page_index, "Fetching DSC data route");
        fetch_json_listing(
            http,
            &url,
            "pageProps.dataCategory.dataList.data",
            TotalField::Pages("pageProps.dataCategory.dataList.meta.pagination.pageCount"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeFetcher;
    use crate::normalizer::normalize;
    use crate::paginator::ListingTotal;
    use serde_json::json;

    const CATEGORY_PAGE: &str = r#"<html><head>
        <link rel="preload" href="/_next/static/chunks/main.js" as="script">
        <link rel="preload" href="/_next/static/Xy7build/_buildManifest.js" as="script">
        </head><body></body></html>"#;

    #[test]
    fn test_discover_data_root() {
        assert_eq!(discover_data_root(CATEGORY_PAGE).as_deref(), Some("/_next/data/Xy7build"));
        assert_eq!(discover_data_root("<html></html>"), None);
    }

    #[tokio::test]
    async fn test_prepare_then_page_urls() {
        let http = FakeFetcher::new();
        http.route(
            "https://www.dsc.com.vn/bao-cao-phan-tich/phan-tich-doanh-nghiep",
            200,
            CATEGORY_PAGE,
        );
        let mut dsc = Dsc::default();
        dsc.prepare(&http).await.unwrap();

        assert_eq!(
            dsc.page_url("bao-cao-nganh", 1).unwrap(),
            "https://www.dsc.com.vn/_next/data/Xy7build/bao-cao-phan-tich/bao-cao-nganh.json?slug=bao-cao-nganh"
        );
        assert_eq!(
            dsc.page_url("bao-cao-nganh", 3).unwrap(),
            "https://www.dsc.com.vn/_next/data/Xy7build/bao-cao-phan-tich/bao-cao-nganh/3.json?slug=bao-cao-nganh&slug=3"
        );
    }

    #[tokio::test]
    async fn test_prepare_fails_without_manifest() {
        let http = FakeFetcher::new();
        http.route(
            "https://www.dsc.com.vn/bao-cao-phan-tich/phan-tich-doanh-nghiep",
            200,
            "<html></html>",
        );
        let mut dsc = Dsc::default();
        assert!(dsc.prepare(&http).await.is_err());
        assert!(dsc.page_url("bao-cao-nganh", 1).is_err());
    }

    #[tokio::test]
    async fn test_fetch_listing_reads_page_count() {
        let dsc = Dsc {
            data_root: Some("/_next/data/b1".to_string()),
        };
        let category = &dsc.categories()[0];
        let cursor = PageCursor::new(SourceId::Dsc, category.report_type, 1, PAGE_SIZE);
        let http = FakeFetcher::new();
        http.json(
            "https://www.dsc.com.vn/_next/data/b1/bao-cao-phan-tich/phan-tich-doanh-nghiep.json?slug=phan-tich-doanh-nghiep",
            json!({"pageProps": {"dataCategory": {"dataList": {
                "data": [{}, {}, {}],
                "meta": {"pagination": {"pageCount": 4}},
            }}}}),
        );

        let page = dsc.fetch_listing(&http, category, &cursor).await.unwrap();
        assert_eq!(page.total, ListingTotal::Pages(4));
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn test_normalize_item() {
        let raw = json!({"attributes": {
            "title": "VHM - Bàn giao tăng tốc",
            "public_at": "2024-08-12T02:30:00.000Z",
            "description": "Ghi chú ngắn",
            "slug": "vhm-ban-giao-tang-toc",
            "file": {"data": [{"attributes": {"url": "/uploads/vhm.pdf"}}]},
        }});
        let item = normalize(&raw, SourceId::Dsc, ReportType::CompanyResearch, Language::Vi, &FIELDS).unwrap();
        assert_eq!(item.report.ticker.as_deref(), Some("VHM"));
        assert_eq!(item.report.recommendation, None);
        assert_eq!(item.report.content.as_deref(), Some("Ghi chú ngắn"));
        assert_eq!(
            item.report.link_web.as_deref(),
            Some("https://www.dsc.com.vn/bao-cao-phan-tich/vhm-ban-giao-tang-toc")
        );
        assert_eq!(item.document_url.as_deref(), Some("https://extgw.dsc.com.vn/eback/uploads/vhm.pdf"));
        assert_eq!(item.renderable, None);
    }
}
