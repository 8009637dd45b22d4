//! # BCPT Crawler
//!
//! Collects research reports ("báo cáo phân tích") published by Vietnamese
//! brokerages, normalizes them into one canonical record shape, acquires the
//! report document as a PDF, and stores the records in SQLite.
//!
//! ## Features
//!
//! - Seven source adapters (BSC, Vietcap, VCBS, Rong Viet reports and analyst
//!   pinboard, DSC, VNDirect) driven by one shared pipeline
//! - Listing pagination by record count or page count, with per-page failure
//!   isolation
//! - Direct document download with an HTML→PDF fallback through Browserless
//! - Idempotent inserts with bounded, jittered retries
//!
//! ## Usage
//!
//! ```sh
//! bcpt_crawler --database reports.db --output-dir bcpt_pdf --source vcsc
//! ```
//!
//! ## Architecture
//!
//! For each source, category by category:
//! 1. **Listing**: page through the category listing
//! 2. **Normalization**: map each raw item to a canonical report
//! 3. **Acquisition**: download the document or render the HTML fallback
//! 4. **Persistence**: insert the record unless it is already stored

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod acquirer;
mod browserless;
mod cli;
mod config;
mod crawler;
mod error;
mod http;
mod models;
mod normalizer;
mod paginator;
mod renderer;
mod sources;
mod store;
mod utils;

use browserless::BrowserlessClient;
use cli::Cli;
use config::Config;
use crawler::{CancelToken, CrawlStats, Politeness, SourceCrawler};
use http::HttpFetcher;
use renderer::BrowserSession;
use store::{SqliteStore, StoreGateway};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("bcpt_crawler starting up");

    // Parse CLI and resolve configuration
    let args = Cli::parse();
    debug!(?args.config, ?args.sources, ?args.languages, "Parsed CLI arguments");
    let config = Config::resolve(&args)?;
    info!(
        database = %config.database.display(),
        output_dir = %config.output_dir.display(),
        sources = ?config.sources,
        languages = ?config.languages,
        "Configuration resolved"
    );

    // Early check: the document directory must be writable
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let store = match SqliteStore::open(&config.database) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %config.database.display(), error = %e, "Could not open the report database");
            return Err(e.into());
        }
    };
    let gateway = StoreGateway::new(store, config.store.max_attempts, config.store_delay_unit());

    let http = HttpFetcher::new(config.http_timeout(), &config.http.user_agent)?;
    let browserless = BrowserlessClient::new(
        &config.browserless.url,
        config.browserless.token.as_deref(),
        config.browserless_timeout(),
    )?;

    // Ctrl-C stops the crawl at the next page or item boundary
    let (cancel_tx, cancel) = CancelToken::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current item and stopping");
            let _ = cancel_tx.send(true);
        }
    });

    let crawler = SourceCrawler::new(
        &http,
        &browserless,
        &gateway,
        &config.output_dir,
        Politeness::from(&config.politeness),
        cancel.clone(),
    )
    .with_languages(&config.languages);

    let mut total = CrawlStats::default();
    for &name in &config.sources {
        if cancel.is_cancelled() {
            break;
        }
        if name.needs_browser() {
            debug!(source = %name, browserless = %config.browserless.url, "Source uses a browser session");
        }
        info!(source = %name, "Crawling source");
        let stats = sources::crawl(name, &crawler, BrowserSession::new(browserless.clone())).await;
        total.merge(&stats);
    }

    match gateway.inner().count() {
        Ok(rows) => info!(rows, database = %config.database.display(), "Reports table size"),
        Err(e) => warn!(error = %e, "Could not count stored reports"),
    }

    let elapsed = start_time.elapsed();
    info!(
        persisted = total.persisted,
        duplicates = total.duplicates,
        dropped = total.dropped,
        persist_failed = total.persist_failed,
        documents = total.documents,
        pages_failed = total.pages_failed,
        categories_aborted = total.categories_aborted,
        cancelled = total.cancelled,
        "Run summary"
    );
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
