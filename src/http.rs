//! HTTP retrieval seam.
//!
//! Every network read in the pipeline (listing pages, detail pages, documents,
//! link probes) goes through the [`Fetch`] trait. The production
//! implementation wraps a shared `reqwest::Client`; tests swap in an
//! in-memory fake.
//!
//! A fetch never retries on its own. Retry and skip decisions belong to the
//! caller (see the crawler and the store gateway).

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::FetchError;

/// Browser-like user agent; several sources reject obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::decode(&self.url, e))
    }
}

/// Minimal GET capability used by adapters and the document acquirer.
pub trait Fetch {
    /// Issue a GET. Non-success statuses are returned, not raised.
    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError>;

    /// GET that treats any non-success status as an error.
    async fn get_ok(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let resp = self.get(url).await?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status,
            })
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        self.get_ok(url).await?.json()
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.get_ok(url).await?.text())
    }
}

/// `reqwest`-backed [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with a timeout, a browser user agent and browser-like
    /// `Accept` headers.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/json;q=0.9,application/pdf;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("vi-VN,vi;q=0.9,en;q=0.8"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::transport(url, e))?
            .to_vec();
        debug!(status, bytes = body.len(), final_url = %final_url, "GET complete");
        Ok(FetchResponse {
            url: final_url,
            status,
            body,
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory [`Fetch`] fake shared by the unit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeFetcher {
        routes: Mutex<HashMap<String, Vec<Result<FetchResponse, String>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `body` with `status` for `url`. Repeated registrations for
        /// the same URL are served in order; the last one sticks.
        pub fn route(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> &Self {
            self.route_redirect(url, url, status, body)
        }

        pub fn route_redirect(
            &self,
            url: &str,
            final_url: &str,
            status: u16,
            body: impl Into<Vec<u8>>,
        ) -> &Self {
            self.routes.lock().unwrap().entry(url.to_string()).or_default().push(Ok(
                FetchResponse {
                    url: final_url.to_string(),
                    status,
                    body: body.into(),
                },
            ));
            self
        }

        pub fn json(&self, url: &str, value: serde_json::Value) -> &Self {
            self.route(url, 200, value.to_string())
        }

        /// Fail `url` with a transport error.
        pub fn fail(&self, url: &str) -> &Self {
            self.routes
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push(Err("connection reset".to_string()));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
        }
    }

    impl Fetch for FakeFetcher {
        async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut routes = self.routes.lock().unwrap();
            let Some(queue) = routes.get_mut(url) else {
                return Ok(FetchResponse {
                    url: url.to_string(),
                    status: 404,
                    body: Vec::new(),
                });
            };
            let next = if queue.len() > 1 { queue.remove(0) } else { queue[0].clone() };
            next.map_err(|msg| FetchError::transport(url, msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeFetcher;
    use super::*;

    #[tokio::test]
    async fn test_get_ok_maps_status_to_error() {
        let fetcher = FakeFetcher::new();
        fetcher.route("https://a.test/x", 410, "gone");
        let err = fetcher.get_ok("https://a.test/x").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 410, .. }));
    }

    #[tokio::test]
    async fn test_get_json_decodes() {
        let fetcher = FakeFetcher::new();
        fetcher.json("https://a.test/j", serde_json::json!({"totalRecords": 3}));
        let value = fetcher.get_json("https://a.test/j").await.unwrap();
        assert_eq!(value["totalRecords"], 3);
    }

    #[tokio::test]
    async fn test_get_json_reports_decode_error() {
        let fetcher = FakeFetcher::new();
        fetcher.route("https://a.test/html", 200, "<html></html>");
        let err = fetcher.get_json("https://a.test/html").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_fake_serves_queue_in_order() {
        let fetcher = FakeFetcher::new();
        fetcher.fail("https://a.test/q").route("https://a.test/q", 200, "ok");
        assert!(fetcher.get("https://a.test/q").await.is_err());
        assert_eq!(fetcher.get("https://a.test/q").await.unwrap().text(), "ok");
        assert_eq!(fetcher.get("https://a.test/q").await.unwrap().text(), "ok");
        assert_eq!(fetcher.call_count("https://a.test/q"), 3);
    }
}
