//! Utility functions for text cleanup, slugs, politeness delays and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - HTML detection and HTML-to-plain-text conversion for report bodies
//! - String truncation and slugification for logging, links and file names
//! - Null coalescing so optional fields never carry empty strings
//! - Jittered sleeps used as the crawl politeness contract
//! - File system validation for the document output directory

use itertools::Itertools;
use rand::{Rng, rng};
use scraper::{ElementRef, Html, Node};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Tag markers whose presence makes a body count as HTML.
const HTML_MARKERS: &[&str] = &[
    "<html", "<body", "<div", "<p>", "<p ", "<a ", "<a>", "<span", "<br", "<table", "<ul",
    "<ol", "<li", "<strong", "<em>", "<h1", "<h2", "<h3", "<h4",
];

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` characters with an ellipsis and a count of
/// the dropped bytes appended. Cuts always land on a character boundary, which
/// matters for Vietnamese headlines.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Convert a title to a URL- and file-friendly slug.
///
/// Lowercases the text, turns every run of non-alphanumeric characters into a
/// single hyphen and trims hyphens from both ends.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("ABC: Q3/2024 update!"), "abc-q3-2024-update");
/// ```
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .join("-")
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().join(" ")
}

/// Map empty or whitespace-only strings to `None`.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == v.len() {
            Some(v)
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Does this body look like HTML rather than plain text?
pub fn looks_like_html(body: &str) -> bool {
    let lower = body.to_lowercase();
    HTML_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Elements whose content never runs into the text around them.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "table", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5",
    "h6", "section", "article", "blockquote",
];

/// Strip tags from an HTML fragment and collapse the text to one line.
///
/// Text nodes are concatenated as they appear, so inline markup never splits
/// a word. Block elements are padded with a space. Returns `None` when no
/// text survives.
pub fn html_to_text(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();
    push_text(fragment.root_element(), &mut text);
    non_empty(Some(collapse_whitespace(&text)))
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => {
                let block = BLOCK_TAGS.contains(&e.name());
                if block {
                    out.push(' ');
                }
                if let Some(child) = ElementRef::wrap(child) {
                    push_text(child, out);
                }
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Sleep for a random duration inside `[min_ms, max_ms]`.
///
/// This is the crawl politeness contract; a zero window returns immediately.
pub async fn polite_pause(min_ms: u64, max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let (lo, hi) = if min_ms <= max_ms { (min_ms, max_ms) } else { (max_ms, min_ms) };
    let ms = rng().random_range(lo..=hi);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
