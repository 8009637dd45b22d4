//! Document acquisition: direct download first, HTML rendering as fallback.
//!
//! The chain for one report:
//!
//! 1. A syntactically valid `http(s)` URL is fetched directly. A 2xx answer
//!    carrying a non-HTML payload is the document.
//! 2. Otherwise (no URL, bad URL, non-2xx "expired" link, transport failure,
//!    HTML login wall) the renderable HTML body is sanitized, wrapped in a
//!    fixed shell and printed through a [`DocumentRenderer`].
//! 3. When both fail the acquirer logs a data-quality event and returns
//!    `None`. It never returns an error to the crawler.
//!
//! Successful documents are written to
//! `<output>/<source>/<language>/<document key>.pdf`, one file per report.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::http::Fetch;
use crate::models::CanonicalReport;
use crate::renderer::DocumentRenderer;
use crate::utils::{looks_like_html, truncate_for_log};

static IMG_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid img regex"));

static SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\ssrc\s*=\s*["']([^"']*)["']"#).expect("valid src regex"));

static LAZY_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\sloading\s*=\s*["']?lazy["']?"#).expect("valid loading regex"));

/// Number of text lines kept when a recommendation is read from a document.
pub const RECOMMENDATION_LINES: usize = 10;

/// What to do with `<img>` tags before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePolicy {
    /// Drop every image.
    Strip,
    /// Resolve each source against `base_url`, fetch it, re-encode it to PNG
    /// and embed it as a data URI. Images that cannot be fetched or decoded
    /// are dropped.
    Inline { base_url: String },
}

/// A document that made it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredDocument {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    /// `true` when the bytes came from the render fallback.
    pub rendered: bool,
}

/// Runs the acquisition chain for one report at a time.
pub struct DocumentAcquirer<'a, F, R> {
    http: &'a F,
    renderer: &'a R,
    output_dir: PathBuf,
}

impl<'a, F, R> DocumentAcquirer<'a, F, R>
where
    F: Fetch,
    R: DocumentRenderer,
{
    pub fn new(http: &'a F, renderer: &'a R, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            renderer,
            output_dir: output_dir.into(),
        }
    }

    /// Obtain document bytes for `url`, falling back to rendering `renderable`.
    ///
    /// # Arguments
    ///
    /// * `url` - Candidate document URL, possibly absent or malformed
    /// * `renderable` - HTML body to print when the direct path fails
    /// * `images` - How embedded images are treated before printing
    ///
    /// # Returns
    ///
    /// `Some((bytes, rendered))` on success, `None` when neither path works.
    #[instrument(level = "debug", skip(self, renderable, images))]
    pub async fn acquire(
        &self,
        url: Option<&str>,
        renderable: Option<&str>,
        images: &ImagePolicy,
    ) -> Option<(Vec<u8>, bool)> {
        if let Some(bytes) = self.fetch_direct(url).await {
            return Some((bytes, false));
        }

        let Some(html) = renderable else {
            warn!(
                event = "data_quality",
                reason = "document_unavailable",
                url = url.unwrap_or("-"),
                "No document link and no renderable content"
            );
            return None;
        };

        let body = self.prepare_images(html, images).await;
        match self.renderer.render_pdf(&wrap_in_shell(&body)).await {
            Ok(bytes) if !bytes.is_empty() => {
                info!(bytes = bytes.len(), "Rendered fallback document");
                Some((bytes, true))
            }
            Ok(_) => {
                warn!(event = "data_quality", reason = "render_empty", "Renderer returned no bytes");
                None
            }
            Err(e) => {
                warn!(event = "data_quality", reason = "render_failed", error = %e, "Fallback rendering failed");
                None
            }
        }
    }

    /// [`acquire`](Self::acquire) and write the result under the output
    /// directory, keyed by the report.
    pub async fn acquire_for(
        &self,
        report: &CanonicalReport,
        url: Option<&str>,
        renderable: Option<&str>,
        images: &ImagePolicy,
    ) -> Option<AcquiredDocument> {
        let (bytes, rendered) = self.acquire(url, renderable, images).await?;
        let path = self.document_path(report);

        if let Err(e) = write_document(&path, &bytes).await {
            warn!(
                event = "data_quality",
                reason = "document_write_failed",
                path = %path.display(),
                error = %e,
                "Could not write document"
            );
            return None;
        }
        info!(path = %path.display(), bytes = bytes.len(), rendered, "Document saved");
        Some(AcquiredDocument { path, bytes, rendered })
    }

    pub fn document_path(&self, report: &CanonicalReport) -> PathBuf {
        self.output_dir
            .join(report.source.as_str())
            .join(report.language.code())
            .join(format!("{}.pdf", report.document_key()))
    }

    async fn fetch_direct(&self, url: Option<&str>) -> Option<Vec<u8>> {
        let url = url?;
        if !is_valid_url(url) {
            warn!(url, "Invalid document URL");
            return None;
        }

        match self.http.get(url).await {
            Ok(resp) if resp.is_success() => {
                // VCBS answers expired report links with its login page and a 200.
                if resp.body.is_empty() || is_html_payload(&resp.body) {
                    warn!(url, "Document link answered with a web page; treating as expired");
                    None
                } else {
                    Some(resp.body)
                }
            }
            Ok(resp) => {
                warn!(url, status = resp.status, "Document expired");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Document fetch failed");
                None
            }
        }
    }

    async fn prepare_images(&self, html: &str, policy: &ImagePolicy) -> String {
        match policy {
            ImagePolicy::Strip => IMG_TAG.replace_all(html, "").into_owned(),
            ImagePolicy::Inline { base_url } => {
                let mut out = String::with_capacity(html.len());
                let mut last = 0;
                for m in IMG_TAG.find_iter(html) {
                    out.push_str(&html[last..m.start()]);
                    if let Some(tag) = self.inline_tag(m.as_str(), base_url).await {
                        out.push_str(&tag);
                    }
                    last = m.end();
                }
                out.push_str(&html[last..]);
                out
            }
        }
    }

    async fn inline_tag(&self, tag: &str, base_url: &str) -> Option<String> {
        let src = image_src(tag)?;
        if src.starts_with("data:") {
            return Some(tag.to_string());
        }
        let absolute = absolutize(&src, base_url)?;

        let bytes = match self.http.get_ok(&absolute).await {
            Ok(resp) => resp.body,
            Err(e) => {
                warn!(src = %absolute, error = %e, "Image fetch failed; dropping image");
                return None;
            }
        };
        let png = match reencode_png(&bytes) {
            Ok(png) => png,
            Err(e) => {
                warn!(src = %absolute, error = %e, "Image decode failed; dropping image");
                return None;
            }
        };
        debug!(src = %absolute, png_bytes = png.len(), "Inlined image");

        let data_uri = format!("data:image/png;base64,{}", BASE64.encode(png));
        let tag = LAZY_ATTR.replace_all(tag, "");
        let src_attr = format!(r#" src="{data_uri}""#);
        Some(SRC_ATTR.replace(&tag, NoExpand(&src_attr)).into_owned())
    }
}

/// Wrap a body fragment in the fixed rendering shell.
pub fn wrap_in_shell(body: &str) -> String {
    format!(
        r#"<html>
<head>
<meta charset="UTF-8">
<title></title>
<style>
html * {{
    font-family: Arial, Helvetica, sans-serif;
}}
</style>
</head>
<body>
{}
</body>
</html>"#,
        body.replace("font-size: 14pt;", "font-size: 12pt;")
    )
}

/// First lines of a PDF's text, joined with spaces.
///
/// Returns `None` when the bytes are not a readable PDF or carry no text.
pub fn leading_text_lines(pdf: &[u8], lines: usize) -> Option<String> {
    // pdf-extract panics on some malformed inputs.
    let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(pdf))
        .ok()?
        .map_err(|e| debug!(error = %e, "PDF text extraction failed"))
        .ok()?;

    let first_page = text.split('\u{c}').next().unwrap_or_default();
    let joined = first_page
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(lines)
        .collect::<Vec<_>>()
        .join(" ");
    debug!(preview = %truncate_for_log(&joined, 120), "Extracted leading text");
    if joined.is_empty() { None } else { Some(joined) }
}

pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

fn is_html_payload(body: &[u8]) -> bool {
    if body.starts_with(b"%PDF") {
        return false;
    }
    let head = String::from_utf8_lossy(&body[..body.len().min(1024)]);
    let trimmed = head.trim_start();
    trimmed.starts_with("<!") || (trimmed.starts_with('<') && looks_like_html(&head))
}

fn image_src(tag: &str) -> Option<String> {
    SRC_ATTR
        .captures(tag)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

fn absolutize(src: &str, base_url: &str) -> Option<String> {
    if src.starts_with("http://") || src.starts_with("https://") || src.starts_with("data:") {
        return Some(src.to_string());
    }
    Url::parse(base_url).ok()?.join(src).ok().map(|u| u.to_string())
}

fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

async fn write_document(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeFetcher;
    use crate::models::{Language, ReportType, SourceId};
    use crate::renderer::testing::FakeRenderer;
    use chrono::NaiveDate;

    const PDF: &[u8] = b"%PDF-1.4 direct";

    fn report() -> CanonicalReport {
        CanonicalReport {
            source: SourceId::Vcbs,
            ticker: None,
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap().and_hms_opt(8, 0, 0).unwrap(),
            report_type: ReportType::Strategy,
            recommendation: None,
            headline: "Chiến lược tháng 5".to_string(),
            content: None,
            analyst: None,
            language: Language::Vi,
            link_web: None,
            link_drive: None,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::new(2, 2);
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_direct_fetch_is_idempotent() {
        let http = FakeFetcher::new();
        http.route("https://docs.test/a.pdf", 200, PDF);
        let renderer = FakeRenderer::default();
        let dir = tempfile::tempdir().unwrap();
        let acquirer = DocumentAcquirer::new(&http, &renderer, dir.path());

        let first = acquirer
            .acquire_for(&report(), Some("https://docs.test/a.pdf"), None, &ImagePolicy::Strip)
            .await
            .unwrap();
        let second = acquirer
            .acquire_for(&report(), Some("https://docs.test/a.pdf"), None, &ImagePolicy::Strip)
            .await
            .unwrap();

        assert_eq!(first.bytes, PDF);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.path, second.path);
        assert!(!first.rendered);
        assert_eq!(std::fs::read(&first.path).unwrap(), PDF);
        assert!(first.path.ends_with("vcbs/vi/vi_strategy_20240502080000_chiến-lược-tháng-5.pdf"));
        assert!(renderer.rendered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_link_falls_back_to_render() {
        let http = FakeFetcher::new();
        http.route("https://docs.test/old.pdf", 404, "");
        let renderer = FakeRenderer::default();
        let acquirer = DocumentAcquirer::new(&http, &renderer, "unused");

        let (bytes, rendered) = acquirer
            .acquire(
                Some("https://docs.test/old.pdf"),
                Some(r#"<p style="font-size: 14pt;">Body<img src="/x.png"></p>"#),
                &ImagePolicy::Strip,
            )
            .await
            .unwrap();

        assert!(rendered);
        assert!(bytes.starts_with(b"%PDF-rendered"));
        let html = renderer.rendered.lock().unwrap()[0].clone();
        assert!(html.contains("font-size: 12pt;"));
        assert!(html.contains("Arial, Helvetica"));
        assert!(!html.contains("<img"));
    }

    #[tokio::test]
    async fn test_invalid_url_skips_fetch() {
        let http = FakeFetcher::new();
        let renderer = FakeRenderer::default();
        let acquirer = DocumentAcquirer::new(&http, &renderer, "unused");

        let result = acquirer
            .acquire(Some("not a url"), Some("<p>x</p>"), &ImagePolicy::Strip)
            .await;
        assert!(result.is_some());
        assert!(http.calls().is_empty());
    }

    #[tokio::test]
    async fn test_html_login_wall_is_not_a_document() {
        let http = FakeFetcher::new();
        http.route("https://vcbs.test/report/1", 200, "<!DOCTYPE html><html><body>Login</body></html>");
        let renderer = FakeRenderer::default();
        let acquirer = DocumentAcquirer::new(&http, &renderer, "unused");

        let (_, rendered) = acquirer
            .acquire(Some("https://vcbs.test/report/1"), Some("<p>desc</p>"), &ImagePolicy::Strip)
            .await
            .unwrap();
        assert!(rendered);
    }

    #[tokio::test]
    async fn test_both_paths_fail_returns_none() {
        let http = FakeFetcher::new();
        http.fail("https://docs.test/a.pdf");
        let renderer = FakeRenderer {
            fail: true,
            ..Default::default()
        };
        let acquirer = DocumentAcquirer::new(&http, &renderer, "unused");

        assert!(acquirer.acquire(Some("https://docs.test/a.pdf"), None, &ImagePolicy::Strip).await.is_none());
        assert!(
            acquirer
                .acquire(Some("https://docs.test/a.pdf"), Some("<p>x</p>"), &ImagePolicy::Strip)
                .await
                .is_none()
        );
        assert!(acquirer.acquire(None, None, &ImagePolicy::Strip).await.is_none());
    }

    #[tokio::test]
    async fn test_inline_images_embeds_png_and_drops_failures() {
        let http = FakeFetcher::new();
        http.route("https://vdsc.test/data/api/app/file-storage/a", 200, png_bytes());
        let renderer = FakeRenderer::default();
        let acquirer = DocumentAcquirer::new(&http, &renderer, "unused");
        let policy = ImagePolicy::Inline {
            base_url: "https://vdsc.test".to_string(),
        };

        let html = r#"<p>a<img loading="lazy" src="/data/api/app/file-storage/a">b<img src="./assets/missing.png">c</p>"#;
        let out = acquirer.prepare_images(html, &policy).await;

        assert!(out.contains(r#"src="data:image/png;base64,"#));
        assert!(!out.contains("loading"));
        assert!(!out.contains("missing.png"));
        assert!(out.starts_with("<p>a<img"));
        assert!(out.ends_with(">bc</p>"));
        assert_eq!(http.call_count("https://vdsc.test/assets/missing.png"), 1);
    }

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("https://vdsc.com.vn/data/api/app/file-storage/abc"));
        assert!(!is_valid_url("ftp://host/file"));
        assert!(!is_valid_url("/relative/path.pdf"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn test_leading_text_lines_rejects_non_pdf() {
        assert_eq!(leading_text_lines(b"not a pdf", RECOMMENDATION_LINES), None);
    }
}
