//! Error taxonomy for the crawl pipeline.
//!
//! Each stage owns one error type; [`CrawlError`] wraps them at the source
//! crawler boundary. Which errors abort what is decided by the crawler, not
//! here: item-scope errors are logged and skipped, listing errors end the
//! category, and nothing ends the whole run.

use thiserror::Error;

/// HTTP retrieval failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, connection reset, TLS failure and friends.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    pub fn transport(url: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(url: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Reasons an item cannot be turned into a canonical report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),

    #[error("unparseable date `{0}`")]
    InvalidDate(String),
}

/// HTML-to-document and page-renderer failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer unavailable: {0}")]
    Unavailable(String),

    #[error("renderer API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("no link with text `{0}` on the current page")]
    LinkNotFound(String),

    #[error("no page loaded")]
    NoPage,
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Unavailable(err.to_string())
    }
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced to the source crawler.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// The listing answered but not in the expected shape.
    #[error("unexpected listing shape at {url}: {message}")]
    Listing { url: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl CrawlError {
    pub fn listing(url: &str, message: impl Into<String>) -> Self {
        CrawlError::Listing {
            url: url.to_string(),
            message: message.into(),
        }
    }
}
