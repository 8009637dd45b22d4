//! VNDirect (`vnd`).
//!
//! Listings and report pages only exist after the site's scripts run, so both
//! are read through a [`PageRenderer`] session. Page 1 is the category URL,
//! page `n` is `{category}page/{n}/`; the page count is the largest numeric
//! `.page-numbers` entry. Each listing entry is expanded by loading its detail
//! page and scraping the fields into a JSON item. Vietnamese only.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::crawler::SourceAdapter;
use crate::error::{CrawlError, RenderError};
use crate::http::Fetch;
use crate::models::{Category, Language, PageCursor, RawItem, ReportType, SourceId};
use crate::normalizer::{DocumentSource, FieldMap, LinkTemplate, Localized, RecommendationRule, RenderSource, string_at};
use crate::paginator::{ListingPage, ListingTotal};
use crate::renderer::{PageRenderer, RenderedPage};
use crate::utils::collapse_whitespace;

pub const BASE_URL: &str = "https://www.vndirect.com.vn";
const PAGE_SIZE: u32 = 10;
const RECOMMENDATION_HEADER: &str = "Khuyến nghị";

static PAGE_NUMBERS: Lazy<Selector> = Lazy::new(|| Selector::parse(".page-numbers").expect("valid selector"));
static LISTING_LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".news-item .news-infor [href]").expect("valid selector"));
static HEADLINE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".section-title.font700.font35").expect("valid selector"));
static DATE: Lazy<Selector> = Lazy::new(|| Selector::parse(".fontita.font16").expect("valid selector"));
static CONTENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-content.content-text").expect("valid selector"));
static SECTION: Lazy<Selector> = Lazy::new(|| Selector::parse("section").expect("valid selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));
static TABLE_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("table tr").expect("valid selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid selector"));

const CATALOG: &[(ReportType, &str)] = &[
    (ReportType::Strategy, "/category/bao-cao-chien-luoc/"),
    (ReportType::ForexReport, "/category/thi-truong-tien-te/"),
    (ReportType::RealEstateReport, "/category/bao-cao-nganh/thi-truong-bat-dong-san/"),
    (ReportType::BondReport, "/category/bao-cao-trai-phieu/"),
];

const FIELDS: FieldMap = FieldMap {
    headline: Localized::same("headline"),
    date: "date",
    body: Some(Localized::same("body")),
    analyst: None,
    ticker: None,
    recommendation: RecommendationRule {
        field: Some("recommendation"),
        headline_fallback: false,
        document_fallback: false,
    },
    link: Some(Localized::same("link")),
    link_template: LinkTemplate::VERBATIM,
    id: None,
    document: DocumentSource::Field {
        key: Localized::same("document"),
        prefix: "",
    },
    renderable: RenderSource::Field(Localized::same("section")),
};

/// VNDirect adapter over a browser session.
pub struct Vnd<P> {
    session: Mutex<P>,
}

impl<P: PageRenderer> Vnd<P> {
    pub fn new(session: P) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    async fn load(&self, url: &str) -> Result<RenderedPage, CrawlError> {
        let mut session = self.session.lock().await;
        session.navigate(url).await?;
        let page = session.current_document().cloned().ok_or(RenderError::NoPage)?;
        Ok(page)
    }
}

fn page_url(category: &Category, page: u32) -> String {
    if page <= 1 {
        category.endpoint.clone()
    } else {
        format!("{}page/{page}/", category.endpoint)
    }
}

fn resolve(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Read the entry links and page count from a listing page.
pub fn parse_listing(page: &RenderedPage) -> ListingPage {
    let document = Html::parse_document(&page.html);

    let pages = document
        .select(&PAGE_NUMBERS)
        .filter_map(|el| text_of(el).parse::<u32>().ok())
        .max()
        .unwrap_or(1);

    let items = document
        .select(&LISTING_LINKS)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve(&page.url, href))
        .map(|link| json!({ "link": link }))
        .collect();

    ListingPage {
        items,
        total: ListingTotal::Pages(pages),
    }
}

/// Value under the header containing `header` in the first table of
/// `content` (header row first, values second).
fn table_value(content: ElementRef<'_>, header: &str) -> Option<String> {
    let mut rows = content.select(&TABLE_ROW);
    let headers: Vec<String> = rows.next()?.select(&CELL).map(text_of).collect();
    let values: Vec<String> = rows.next()?.select(&CELL).map(text_of).collect();
    let col = headers.iter().position(|h| h.contains(header))?;
    values.get(col).cloned().filter(|v| !v.is_empty())
}

/// Scrape a report detail page into a raw item.
///
/// # Arguments
///
/// * `page` - The loaded detail page.
/// * `with_recommendation` - Read the recommendation table (Company Research).
///
/// # Returns
///
/// A JSON object with `link`, `headline`, `date`, `body`, `recommendation`,
/// `document` and `section` keys; keys whose element is missing are omitted.
pub fn parse_detail(page: &RenderedPage, with_recommendation: bool) -> RawItem {
    let document = Html::parse_document(&page.html);
    let mut item = Map::new();
    item.insert("link".to_string(), Value::String(page.url.clone()));

    if let Some(el) = document.select(&HEADLINE).next() {
        item.insert("headline".to_string(), Value::String(text_of(el)));
    }
    if let Some(date) = document
        .select(&DATE)
        .next()
        .and_then(|el| text_of(el).split(' ').next().map(String::from))
    {
        item.insert("date".to_string(), Value::String(date));
    }

    if let Some(content) = document.select(&CONTENT).next() {
        item.insert("body".to_string(), Value::String(content.inner_html()));
        if with_recommendation {
            if let Some(rec) = table_value(content, RECOMMENDATION_HEADER) {
                item.insert("recommendation".to_string(), Value::String(rec));
            }
        }
        if let Some(href) = content
            .select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .last()
            .and_then(|href| resolve(&page.url, href))
        {
            item.insert("document".to_string(), Value::String(href));
        }
    }

    if let Some(section) = document.select(&SECTION).next() {
        item.insert("section".to_string(), Value::String(section.html()));
    }

    Value::Object(item)
}

impl<P: PageRenderer> SourceAdapter for Vnd<P> {
    fn source(&self) -> SourceId {
        SourceId::Vnd
    }

    fn categories(&self) -> Vec<Category> {
        CATALOG
            .iter()
            .map(|&(report_type, path)| Category {
                report_type,
                language: Language::Vi,
                endpoint: format!("{BASE_URL}{path}"),
                code: None,
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
        _http: &F,
        category: &Category,
        cursor: &PageCursor,
    ) -> Result<ListingPage, CrawlError> {
        let url = page_url(category, cursor.page_index);
        debug!(url = %url, "Loading rendered listing");
        let page = self.load(&url).await?;
        Ok(parse_listing(&page))
    }

    async fn expand_item<F: Fetch>(
        &self,
        _http: &F,
        category: &Category,
        item: RawItem,
    ) -> Result<RawItem, CrawlError> {
        let link = string_at(&item, "link").ok_or_else(|| CrawlError::listing(&category.endpoint, "entry without link"))?;
        let page = self.load(&link).await?;
        Ok(parse_detail(&page, category.report_type.is_company_research()))
    }
}
