//! Raw item → [`CanonicalReport`] normalization.
//!
//! Every source describes its payload with a [`FieldMap`]: where the headline,
//! date, body, ticker, link and document live, and which localized key to read
//! for each [`Language`]. [`normalize`] applies the same rules to all of them:
//!
//! 1. **Ticker**: Company Research only. Structured field first, then an
//!    uppercase 3–5 character token at the start of the headline.
//! 2. **Recommendation**: structured field, then (Company Research only) the
//!    lower-cased headline or the acquired document's first lines, per source.
//! 3. **Date**: ISO-8601 (with or without offset) or `dd/mm/yyyy`, offset
//!    dropped, second precision. Unparseable dates drop the item.
//! 4. **Content**: HTML bodies are stripped to one line of text; plain bodies
//!    pass through.
//! 5. **Links**: localized slug through the source's [`LinkTemplate`]; when the
//!    slug is empty a fallback is built from the headline and the record id and
//!    flagged for a reachability probe.
//! 6. Missing optional values become `None`, never `""`.
//!
//! The only I/O-dependent rules (link probing, recommendation from document
//! text) are flagged on [`NormalizedItem`] and carried out by the crawler.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::NormalizeError;
use crate::models::{CanonicalReport, Language, RawItem, ReportType, SourceId};
use crate::utils::{html_to_text, looks_like_html, non_empty, slugify};

static HEADLINE_TICKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9]{2,4})\b").expect("valid ticker regex"));

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_ONLY_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// A key that differs per language (`title` / `titleEn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Localized {
    pub vi: &'static str,
    pub en: &'static str,
}

impl Localized {
    pub const fn new(vi: &'static str, en: &'static str) -> Self {
        Self { vi, en }
    }

    /// Same key for both languages.
    pub const fn same(key: &'static str) -> Self {
        Self { vi: key, en: key }
    }

    pub fn pick(&self, language: Language) -> &'static str {
        match language {
            Language::Vi => self.vi,
            Language::En => self.en,
        }
    }
}

/// How a slug becomes a public URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTemplate {
    pub prefix: Localized,
    /// When set, the record id is appended after this separator (`-d{id}`).
    pub id_separator: Option<&'static str>,
}

impl LinkTemplate {
    /// Links are already absolute URLs.
    pub const VERBATIM: LinkTemplate = LinkTemplate {
        prefix: Localized::same(""),
        id_separator: None,
    };

    pub const fn prefixed(prefix: Localized) -> Self {
        Self {
            prefix,
            id_separator: None,
        }
    }

    pub fn build(&self, language: Language, slug: &str, id: Option<&str>) -> String {
        if is_absolute(slug) {
            return slug.to_string();
        }
        let mut url = join_prefix(self.prefix.pick(language), slug);
        if let (Some(sep), Some(id)) = (self.id_separator, id) {
            url.push_str(sep);
            url.push_str(id);
        }
        url
    }

    /// Fallback URL from a headline and the record id.
    pub fn fallback(&self, language: Language, headline: &str, id: &str) -> Option<String> {
        let prefix = self.prefix.pick(language);
        let slug = slugify(headline);
        if prefix.is_empty() || slug.is_empty() {
            return None;
        }
        let sep = self.id_separator.unwrap_or("-");
        Some(format!("{prefix}{slug}{sep}{id}"))
    }
}

/// Recommendation precedence for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecommendationRule {
    pub field: Option<&'static str>,
    /// Company Research: fall back to the lower-cased headline.
    pub headline_fallback: bool,
    /// Company Research: fall back to the acquired document's first lines.
    pub document_fallback: bool,
}

/// Where the document for an item comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    None,
    /// A field holding an absolute URL or a path appended to `prefix`.
    Field { key: Localized, prefix: &'static str },
    /// The resolved `linkWeb` is itself the document.
    LinkWeb,
}

/// Which HTML, if any, backs the render fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSource {
    None,
    /// The localized body.
    Body,
    Field(Localized),
}

/// Per-source description of where each canonical field lives.
///
/// Keys are dotted paths into the raw JSON; numeric segments index arrays
/// (`file.data.0.attributes.url`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    pub headline: Localized,
    pub date: &'static str,
    pub body: Option<Localized>,
    pub analyst: Option<Localized>,
    pub ticker: Option<&'static str>,
    pub recommendation: RecommendationRule,
    pub link: Option<Localized>,
    pub link_template: LinkTemplate,
    pub id: Option<&'static str>,
    pub document: DocumentSource,
    pub renderable: RenderSource,
}

/// Output of [`normalize`]: the report plus the follow-ups that need I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub report: CanonicalReport,
    /// `report.link_web` was built from the headline and must be probed.
    pub link_needs_probe: bool,
    pub document_url: Option<String>,
    pub renderable: Option<String>,
    /// Recommendation should come from the acquired document's text.
    pub recommendation_from_document: bool,
}

/// Normalize one raw item.
///
/// # Errors
///
/// [`NormalizeError::MissingField`] when the headline or date is absent and
/// [`NormalizeError::InvalidDate`] when the date cannot be parsed; the caller
/// drops the item.
pub fn normalize(
    raw: &RawItem,
    source: SourceId,
    report_type: ReportType,
    language: Language,
    map: &FieldMap,
) -> Result<NormalizedItem, NormalizeError> {
    let headline =
        string_at(raw, map.headline.pick(language)).ok_or(NormalizeError::MissingField("headline"))?;
    let date_raw = string_at(raw, map.date).ok_or(NormalizeError::MissingField("date"))?;
    let date = parse_date(&date_raw)?;

    let company_research = report_type.is_company_research();

    let ticker = if company_research {
        map.ticker
            .and_then(|key| string_at(raw, key))
            .map(|t| t.to_uppercase())
            .or_else(|| ticker_from_headline(&headline))
    } else {
        None
    };

    let mut recommendation_from_document = false;
    let recommendation = match map.recommendation.field.and_then(|key| string_at(raw, key)) {
        Some(value) => Some(value),
        None if company_research && map.recommendation.headline_fallback => Some(headline.to_lowercase()),
        None => {
            recommendation_from_document = company_research && map.recommendation.document_fallback;
            None
        }
    };

    let body = map.body.and_then(|key| string_at(raw, key.pick(language)));
    let content = match body {
        Some(ref b) if looks_like_html(b) => html_to_text(b),
        Some(b) => Some(b),
        None => {
            warn!(
                event = "data_quality",
                reason = "missing_body",
                source = %source,
                headline = %headline,
                "Report has no body"
            );
            None
        }
    };

    let analyst = map.analyst.and_then(|key| string_at(raw, key.pick(language)));
    let id = map.id.and_then(|key| string_at(raw, key));

    let slug = map.link.and_then(|key| string_at(raw, key.pick(language)));
    let (link_web, link_needs_probe) = match slug {
        Some(slug) => (Some(map.link_template.build(language, &slug, id.as_deref())), false),
        None => match id.as_deref().and_then(|id| map.link_template.fallback(language, &headline, id)) {
            Some(url) => (Some(url), true),
            None => (None, false),
        },
    };

    let document_url = match map.document {
        DocumentSource::None => None,
        DocumentSource::LinkWeb => link_web.clone().filter(|_| !link_needs_probe),
        DocumentSource::Field { key, prefix } => {
            string_at(raw, key.pick(language)).map(|path| join_prefix(prefix, &path))
        }
    };

    let render_key = match map.renderable {
        RenderSource::None => None,
        RenderSource::Body => map.body,
        RenderSource::Field(key) => Some(key),
    };
    let renderable = render_key
        .and_then(|key| string_at(raw, key.pick(language)))
        .filter(|html| looks_like_html(html));

    Ok(NormalizedItem {
        report: CanonicalReport {
            source,
            ticker,
            date,
            report_type,
            recommendation,
            headline,
            content,
            analyst,
            language,
            link_web,
            link_drive: None,
        },
        link_needs_probe,
        document_url,
        renderable,
        recommendation_from_document,
    })
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Append a path to a URL prefix without doubling the slash between them.
/// Absolute paths are returned as-is.
pub fn join_prefix(prefix: &str, path: &str) -> String {
    if is_absolute(path) {
        return path.to_string();
    }
    if prefix.ends_with('/') {
        format!("{prefix}{}", path.trim_start_matches('/'))
    } else {
        format!("{prefix}{path}")
    }
}

/// Parse a source timestamp and strip any offset, keeping the wall-clock time
/// at second precision.
pub fn parse_date(input: &str) -> Result<NaiveDateTime, NormalizeError> {
    let s = input.trim();

    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| {
            OFFSET_FORMATS
                .iter()
                .find_map(|f| DateTime::parse_from_str(s, f).ok().map(|dt| dt.naive_local()))
        })
        .or_else(|| NAIVE_FORMATS.iter().find_map(|f| NaiveDateTime::parse_from_str(s, f).ok()))
        .or_else(|| {
            DATE_ONLY_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| NormalizeError::InvalidDate(input.to_string()))?;

    parsed
        .with_nanosecond(0)
        .ok_or_else(|| NormalizeError::InvalidDate(input.to_string()))
}

/// Uppercase 3–5 character token at the start of a headline.
pub fn ticker_from_headline(headline: &str) -> Option<String> {
    HEADLINE_TICKER
        .captures(headline.trim_start())
        .map(|c| c[1].to_string())
}

/// Resolve a dotted path inside a JSON value.
pub fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(raw, |node, segment| match node {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => node.get(segment),
    })
}

/// Read a path as a non-empty string.
///
/// Numbers are stringified; arrays of strings or of `{ "name": .. }` objects
/// are joined with commas. Everything else, and blank strings, is `None`.
pub fn string_at(raw: &Value, path: &str) -> Option<String> {
    let value = match lookup(raw, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => item.get("name").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .collect();
            Some(parts.join(","))
        }
        _ => None,
    };
    non_empty(value)
}
