//! Thin client for a Browserless instance.
//!
//! Two endpoints are used:
//! - `/content` returns the fully rendered HTML of a URL (JS executed)
//! - `/pdf` prints an HTML string to a PDF
//!
//! The pipeline never talks to this client directly; it goes through the
//! [`DocumentRenderer`] and [`PageRenderer`](crate::renderer::PageRenderer)
//! capabilities.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, instrument};

use crate::error::RenderError;
use crate::renderer::DocumentRenderer;

#[derive(Debug, Clone)]
pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        match self.token {
            Some(ref token) => format!("{}/{path}?token={}", self.base_url, urlencoding::encode(token)),
            None => format!("{}/{path}", self.base_url),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, RenderError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// Fetch fully-rendered HTML content for a URL.
    #[instrument(level = "debug", skip(self))]
    pub async fn content(&self, url: &str) -> Result<String, RenderError> {
        let resp = self.post("content", json!({ "url": url })).await?;
        let html = resp.text().await?;
        debug!(bytes = html.len(), "Rendered page content");
        Ok(html)
    }

    /// Print an HTML document to PDF with A4 paper and 40 mm side margins.
    #[instrument(level = "debug", skip_all, fields(html_bytes = html.len()))]
    pub async fn pdf(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let body = json!({
            "html": html,
            "options": {
                "format": "A4",
                "printBackground": true,
                "margin": { "left": "40mm", "right": "40mm", "top": "15mm", "bottom": "15mm" }
            }
        });
        let resp = self.post("pdf", body).await?;
        let bytes = resp.bytes().await?.to_vec();
        debug!(bytes = bytes.len(), "Rendered PDF");
        Ok(bytes)
    }
}

impl DocumentRenderer for BrowserlessClient {
    async fn render_pdf(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        self.pdf(html).await
    }
}
