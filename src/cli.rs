//! Command-line interface definitions for the report crawler.
//!
//! Every flag is optional; unset flags fall back to the YAML configuration
//! file (`--config`) and then to built-in defaults. See [`crate::config`].

use clap::Parser;
use std::path::PathBuf;

use crate::models::Language;
use crate::sources::SourceName;

/// Command-line arguments for the report crawler.
///
/// # Examples
///
/// ```sh
/// # Crawl every source into ./reports.db and ./bcpt_pdf
/// bcpt_crawler
///
/// # Only Vietcap and VCBS, English reports, custom locations
/// bcpt_crawler --source vcsc --source vcbs --language en \
///     --database /data/reports.db --output-dir /data/pdf
///
/// # VNDirect through a remote Browserless instance
/// bcpt_crawler --source vnd --browserless-url https://chrome.example --browserless-token TOKEN
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML configuration file
    #[arg(short, long, env = "BCPT_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database holding the reports table
    #[arg(short, long, env = "BCPT_DATABASE")]
    pub database: Option<PathBuf>,

    /// Directory acquired documents are written under
    #[arg(short, long, env = "BCPT_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Source to crawl; repeat for several (default: all)
    #[arg(short, long = "source", value_enum)]
    pub sources: Vec<SourceName>,

    /// Report language to crawl (vi or en); repeat for both (default: both)
    #[arg(short, long = "language", value_parser = parse_language)]
    pub languages: Vec<Language>,

    /// Browserless base URL used for rendering
    #[arg(long, env = "BROWSERLESS_URL")]
    pub browserless_url: Option<String>,

    /// Browserless API token
    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    pub browserless_token: Option<String>,
}

fn parse_language(s: &str) -> Result<Language, String> {
    match s.to_ascii_lowercase().as_str() {
        "vi" => Ok(Language::Vi),
        "en" => Ok(Language::En),
        other => Err(format!("unknown language '{other}' (expected vi or en)")),
    }
}
