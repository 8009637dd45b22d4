//! Data models shared by every stage of the crawl pipeline.
//!
//! This module defines the core data structures used throughout the application:
//! - [`CanonicalReport`]: The normalized record persisted to the `reports` table
//! - [`RawItem`]: An opaque per-source payload, consumed once by the normalizer
//! - [`PageCursor`]: Position of a paginator inside one category listing
//! - [`Category`]: One row of a source's report-type catalog
//!
//! Enumerations ([`SourceId`], [`ReportType`], [`Language`]) serialize to the
//! exact strings stored in the database, so the stored schema never depends on
//! Rust variant names.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::slugify;

/// Canonical timestamp format written to the store.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A raw listing entry as returned by a source.
///
/// Sources that answer in HTML are scraped into a JSON object first, so every
/// adapter hands the normalizer the same shape.
pub type RawItem = serde_json::Value;

/// Brokerage identifiers as stored in the `source` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceId {
    #[serde(rename = "bsc")]
    Bsc,
    #[serde(rename = "vcs")]
    Vcsc,
    #[serde(rename = "vcbs")]
    Vcbs,
    #[serde(rename = "vds")]
    Vds,
    #[serde(rename = "dsc")]
    Dsc,
    #[serde(rename = "vnd")]
    Vnd,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Bsc => "bsc",
            SourceId::Vcsc => "vcs",
            SourceId::Vcbs => "vcbs",
            SourceId::Vds => "vds",
            SourceId::Dsc => "dsc",
            SourceId::Vnd => "vnd",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report language. Drives which localized keys are read from raw payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "VI", alias = "vi")]
    Vi,
    #[serde(rename = "EN", alias = "en")]
    En,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Vi, Language::En];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Vi => "VI",
            Language::En => "EN",
        }
    }

    /// Lower-case code used in most source query strings (`vi`, `en`).
    pub fn code(&self) -> &'static str {
        match self {
            Language::Vi => "vi",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report categories declared by the sources.
///
/// Only `CompanyResearch` carries a ticker; every other category stores a null
/// ticker regardless of what the source sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportType {
    #[serde(rename = "Company Research")]
    CompanyResearch,
    #[serde(rename = "Sector Reports")]
    SectorReports,
    #[serde(rename = "Market Commentary")]
    MarketCommentary,
    #[serde(rename = "Economics")]
    Economics,
    #[serde(rename = "Strategy")]
    Strategy,
    #[serde(rename = "Fixed Income")]
    FixedIncome,
    #[serde(rename = "Bond Report")]
    BondReport,
    #[serde(rename = "Forex Report")]
    ForexReport,
    #[serde(rename = "Real Estate Report")]
    RealEstateReport,
    #[serde(rename = "Futures")]
    Futures,
    #[serde(rename = "Commodities")]
    Commodities,
    #[serde(rename = "ETFs")]
    Etfs,
    #[serde(rename = "Analyst Pinboard")]
    AnalystPinboard,
    #[serde(rename = "Flashnote")]
    Flashnote,
    #[serde(rename = "Theme")]
    Theme,
    #[serde(rename = "Brokerage Corner")]
    BrokerageCorner,
    #[serde(rename = "Investment Opportunities")]
    InvestmentOpportunities,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::CompanyResearch => "Company Research",
            ReportType::SectorReports => "Sector Reports",
            ReportType::MarketCommentary => "Market Commentary",
            ReportType::Economics => "Economics",
            ReportType::Strategy => "Strategy",
            ReportType::FixedIncome => "Fixed Income",
            ReportType::BondReport => "Bond Report",
            ReportType::ForexReport => "Forex Report",
            ReportType::RealEstateReport => "Real Estate Report",
            ReportType::Futures => "Futures",
            ReportType::Commodities => "Commodities",
            ReportType::Etfs => "ETFs",
            ReportType::AnalystPinboard => "Analyst Pinboard",
            ReportType::Flashnote => "Flashnote",
            ReportType::Theme => "Theme",
            ReportType::BrokerageCorner => "Brokerage Corner",
            ReportType::InvestmentOpportunities => "Investment Opportunities",
        }
    }

    pub fn is_company_research(&self) -> bool {
        matches!(self, ReportType::CompanyResearch)
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a source catalog: which listing to crawl for a report type in
/// a language.
///
/// Catalogs are explicit ordered tables in each adapter, so a report type can
/// never drift out of alignment with its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub report_type: ReportType,
    pub language: Language,
    /// Listing endpoint (JSON API or HTML page).
    pub endpoint: String,
    /// Source-specific category code (page id, group id, category code).
    pub code: Option<String>,
}

/// The unit persisted to the store.
///
/// Optional fields are `None` when the source supplies nothing; they are never
/// empty strings, so the store can tell "absent" from "empty".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalReport {
    pub source: SourceId,
    pub ticker: Option<String>,
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDateTime,
    pub report_type: ReportType,
    pub recommendation: Option<String>,
    pub headline: String,
    pub content: Option<String>,
    pub analyst: Option<String>,
    pub language: Language,
    pub link_web: Option<String>,
    /// Archived-copy location, filled by an external archival step.
    pub link_drive: Option<String>,
}

impl CanonicalReport {
    /// The date in the canonical `YYYY-MM-DD HH:MM:SS` form.
    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    /// Stable per-report key used to name the acquired document.
    ///
    /// Built from the language, report type, timestamp and headline slug, so
    /// two runs over the same listing produce the same file name and reports
    /// of different types sharing a source directory never collide.
    pub fn document_key(&self) -> String {
        let mut slug = slugify(&self.headline);
        if slug.chars().count() > 80 {
            slug = slug.chars().take(80).collect();
        }
        let slug = slug.trim_matches('-');
        format!(
            "{}_{}_{}_{}",
            self.language.code(),
            slugify(self.report_type.as_str()),
            self.date.format("%Y%m%d%H%M%S"),
            if slug.is_empty() { "report" } else { slug }
        )
    }
}

fn serialize_date<S: serde::Serializer>(date: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&date.format(DATE_FORMAT).to_string())
}

/// Position of a paginator inside one category listing.
///
/// Created when a category crawl starts, advanced monotonically, and finished
/// once every reported page has been produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub source: SourceId,
    pub report_type: ReportType,
    /// Index as the source counts it (0- or 1-based, see [`PageCursor::first_page`]).
    pub page_index: u32,
    pub page_size: u32,
    /// Total number of records; `None` until the first page has been read.
    pub total_count: Option<u64>,
    pub first_page: u32,
}

impl PageCursor {
    pub fn new(source: SourceId, report_type: ReportType, first_page: u32, page_size: u32) -> Self {
        Self {
            source,
            report_type,
            page_index: first_page,
            page_size,
            total_count: None,
            first_page,
        }
    }

    /// Number of pages already produced.
    pub fn pages_done(&self) -> u32 {
        self.page_index - self.first_page
    }

    /// Record offset of the current page (for `skip`-style APIs).
    pub fn offset(&self) -> u64 {
        u64::from(self.pages_done()) * u64::from(self.page_size)
    }

    pub fn advance(&mut self) {
        self.page_index += 1;
    }

    /// `true` once `pages_done * page_size >= total_count`.
    pub fn is_exhausted(&self) -> bool {
        match self.total_count {
            Some(total) => self.offset() >= total,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> CanonicalReport {
        CanonicalReport {
            source: SourceId::Bsc,
            ticker: Some("ABC".to_string()),
            date: NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            report_type: ReportType::CompanyResearch,
            recommendation: None,
            headline: "ABC Investment Update".to_string(),
            content: None,
            analyst: None,
            language: Language::Vi,
            link_web: None,
            link_drive: None,
        }
    }

    #[test]
    fn test_report_serializes_storage_strings() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["source"], "bsc");
        assert_eq!(json["reportType"], "Company Research");
        assert_eq!(json["language"], "VI");
        assert_eq!(json["date"], "2024-03-05 09:30:00");
        assert!(json["linkDrive"].is_null());
    }

    #[test]
    fn test_document_key_is_stable() {
        let report = sample();
        assert_eq!(report.document_key(), "vi_company-research_20240305093000_abc-investment-update");
        assert_eq!(report.document_key(), sample().document_key());
    }

    #[test]
    fn test_document_key_separates_report_types() {
        let pinboard = CanonicalReport {
            source: SourceId::Vds,
            report_type: ReportType::AnalystPinboard,
            ..sample()
        };
        let commentary = CanonicalReport {
            source: SourceId::Vds,
            report_type: ReportType::MarketCommentary,
            ..sample()
        };
        assert_eq!(
            pinboard.document_key(),
            "vi_analyst-pinboard_20240305093000_abc-investment-update"
        );
        assert_ne!(pinboard.document_key(), commentary.document_key());
    }

    #[test]
    fn test_language_deserializes_lowercase_alias() {
        let lang: Language = serde_yaml::from_str("en").unwrap();
        assert_eq!(lang, Language::En);
        let lang: Language = serde_yaml::from_str("VI").unwrap();
        assert_eq!(lang, Language::Vi);
    }

    #[test]
    fn test_cursor_exhaustion() {
        let mut cursor = PageCursor::new(SourceId::Bsc, ReportType::Strategy, 1, 12);
        assert!(!cursor.is_exhausted());
        cursor.total_count = Some(25);
        cursor.advance();
        cursor.advance();
        assert!(!cursor.is_exhausted());
        cursor.advance();
        assert_eq!(cursor.pages_done(), 3);
        assert!(cursor.is_exhausted());
    }
}
