//! Rendering capabilities consumed by the pipeline.
//!
//! - [`DocumentRenderer`] turns an HTML document into PDF bytes (the
//!   fallback path of document acquisition).
//! - [`PageRenderer`] is an opaque browser session exposing `navigate`,
//!   `current_document` and `click`, used by sources whose listings only
//!   exist after JavaScript runs.
//!
//! The pipeline is agnostic to whether a page arrived over plain HTTP or
//! through a rendered session; both end up as HTML strings.

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::browserless::BrowserlessClient;
use crate::error::RenderError;
use crate::utils::collapse_whitespace;

/// HTML → document printing capability.
pub trait DocumentRenderer {
    async fn render_pdf(&self, html: &str) -> Result<Vec<u8>, RenderError>;
}

/// A page as currently displayed by a [`PageRenderer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

/// Browser-session capability.
pub trait PageRenderer {
    /// Load `url` and make it the current document.
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError>;

    fn current_document(&self) -> Option<&RenderedPage>;

    /// Follow the link whose visible text equals `link_text`.
    async fn click(&mut self, link_text: &str) -> Result<(), RenderError>;
}

/// [`PageRenderer`] backed by Browserless `/content`.
///
/// A click resolves the matching anchor's `href` against the current URL and
/// navigates to it; listings driven by script handlers are out of reach.
#[derive(Debug)]
pub struct BrowserSession {
    client: BrowserlessClient,
    current: Option<RenderedPage>,
}

impl BrowserSession {
    pub fn new(client: BrowserlessClient) -> Self {
        Self { client, current: None }
    }
}

impl PageRenderer for BrowserSession {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        let html = self.client.content(url).await?;
        self.current = Some(RenderedPage {
            url: url.to_string(),
            html,
        });
        Ok(())
    }

    fn current_document(&self) -> Option<&RenderedPage> {
        self.current.as_ref()
    }

    async fn click(&mut self, link_text: &str) -> Result<(), RenderError> {
        let page = self.current.as_ref().ok_or(RenderError::NoPage)?;
        let target = find_link(&page.html, &page.url, link_text)
            .ok_or_else(|| RenderError::LinkNotFound(link_text.to_string()))?;
        debug!(%target, link_text, "Following link");
        self.navigate(&target).await
    }
}

/// Find the first anchor whose collapsed text equals `text` and return its
/// `href` resolved against `base_url`.
pub fn find_link(html: &str, base_url: &str, text: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").ok()?;
    let base = Url::parse(base_url).ok()?;
    let wanted = collapse_whitespace(text);

    document
        .select(&anchors)
        .find(|a| collapse_whitespace(&a.text().collect::<String>()) == wanted)
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href).ok())
        .map(|u| u.to_string())
}

#[cfg(test)]
pub mod testing {
    //! Scripted renderers for unit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned HTML per URL and records navigations.
    #[derive(Default)]
    pub struct FakeSession {
        pub pages: HashMap<String, String>,
        pub current: Option<RenderedPage>,
        pub visited: Vec<String>,
    }

    impl FakeSession {
        pub fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    impl PageRenderer for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
            self.visited.push(url.to_string());
            let html = self
                .pages
                .get(url)
                .cloned()
                .ok_or_else(|| RenderError::Unavailable(format!("no page for {url}")))?;
            self.current = Some(RenderedPage {
                url: url.to_string(),
                html,
            });
            Ok(())
        }

        fn current_document(&self) -> Option<&RenderedPage> {
            self.current.as_ref()
        }

        async fn click(&mut self, link_text: &str) -> Result<(), RenderError> {
            let page = self.current.as_ref().ok_or(RenderError::NoPage)?;
            let target = find_link(&page.html, &page.url, link_text)
                .ok_or_else(|| RenderError::LinkNotFound(link_text.to_string()))?;
            self.navigate(&target).await
        }
    }

    /// Renders by echoing a marker plus the HTML, or fails on demand.
    #[derive(Default)]
    pub struct FakeRenderer {
        pub fail: bool,
        pub rendered: Mutex<Vec<String>>,
    }

    impl DocumentRenderer for FakeRenderer {
        async fn render_pdf(&self, html: &str) -> Result<Vec<u8>, RenderError> {
            self.rendered.lock().unwrap().push(html.to_string());
            if self.fail {
                return Err(RenderError::Unavailable("renderer down".to_string()));
            }
            let mut out = b"%PDF-rendered\n".to_vec();
            out.extend_from_slice(html.as_bytes());
            Ok(out)
        }
    }
}
