//! Run configuration.
//!
//! Settings come from an optional YAML file; every field has a default, so an
//! empty or partial file is valid. Command-line flags are applied on top by
//! [`Config::apply_cli`].
//!
//! ```yaml
//! database: ./reports.db
//! output_dir: ./bcpt_pdf
//! sources: [bsc, vcsc, vds-pinboard]
//! languages: [VI]
//! http:
//!   timeout_secs: 30
//! store:
//!   max_attempts: 3
//!   retry_delay_ms: 1000
//! politeness:
//!   page_delay_ms: [2000, 4000]
//!   item_delay_ms: [1000, 2000]
//! browserless:
//!   url: http://localhost:3000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::cli::Cli;
use crate::crawler::Politeness;
use crate::error::CrawlError;
use crate::http::DEFAULT_USER_AGENT;
use crate::models::Language;
use crate::sources::SourceName;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub max_attempts: usize,
    /// Unit of the jittered retry delay (1–3 units per retry).
    pub retry_delay_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Pause windows as `[min, max]` milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolitenessSettings {
    pub page_delay_ms: [u64; 2],
    pub item_delay_ms: [u64; 2],
}

impl Default for PolitenessSettings {
    fn default() -> Self {
        let p = Politeness::default();
        Self {
            page_delay_ms: [p.page_delay_ms.0, p.page_delay_ms.1],
            item_delay_ms: [p.item_delay_ms.0, p.item_delay_ms.1],
        }
    }
}

impl From<&PolitenessSettings> for Politeness {
    fn from(s: &PolitenessSettings) -> Self {
        Politeness {
            page_delay_ms: (s.page_delay_ms[0], s.page_delay_ms[1]),
            item_delay_ms: (s.item_delay_ms[0], s.item_delay_ms[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrowserlessSettings {
    pub url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BrowserlessSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            token: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: PathBuf,
    pub output_dir: PathBuf,
    pub sources: Vec<SourceName>,
    pub languages: Vec<Language>,
    pub http: HttpSettings,
    pub store: StoreSettings,
    pub politeness: PolitenessSettings,
    pub browserless: BrowserlessSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("reports.db"),
            output_dir: PathBuf::from("bcpt_pdf"),
            sources: SourceName::ALL.to_vec(),
            languages: Language::ALL.to_vec(),
            http: HttpSettings::default(),
            store: StoreSettings::default(),
            politeness: PolitenessSettings::default(),
            browserless: BrowserlessSettings::default(),
        }
    }
}

impl Config {
    /// Read a YAML configuration file.
    ///
    /// # Errors
    ///
    /// [`CrawlError::Config`] if the file cannot be read or parsed.
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self, CrawlError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CrawlError::Config(format!("reading {}: {e}", path.display())))?;
        let config = Self::from_yaml(&text)
            .map_err(|e| CrawlError::Config(format!("parsing {}: {e}", path.display())))?;
        debug!(?config, "Loaded configuration file");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Start from the `--config` file (or defaults) and apply CLI overrides.
    pub fn resolve(cli: &Cli) -> Result<Self, CrawlError> {
        let base = match cli.config {
            Some(ref path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(base.apply_cli(cli))
    }

    /// Flags given on the command line win over file values.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(ref db) = cli.database {
            self.database = db.clone();
        }
        if let Some(ref dir) = cli.output_dir {
            self.output_dir = dir.clone();
        }
        if !cli.sources.is_empty() {
            self.sources = cli.sources.clone();
        }
        if !cli.languages.is_empty() {
            self.languages = cli.languages.clone();
        }
        if let Some(ref url) = cli.browserless_url {
            self.browserless.url = url.clone();
        }
        if cli.browserless_token.is_some() {
            self.browserless.token = cli.browserless_token.clone();
        }
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn browserless_timeout(&self) -> Duration {
        Duration::from_secs(self.browserless.timeout_secs)
    }

    pub fn store_delay_unit(&self) -> Duration {
        Duration::from_millis(self.store.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let yaml = r#"
database: /data/reports.db
sources: [vcbs, vds-pinboard]
languages: [EN]
store:
  max_attempts: 5
politeness:
  item_delay_ms: [0, 0]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.database, PathBuf::from("/data/reports.db"));
        assert_eq!(config.sources, [SourceName::Vcbs, SourceName::VdsPinboard]);
        assert_eq!(config.languages, [Language::En]);
        assert_eq!(config.store.max_attempts, 5);
        assert_eq!(config.store.retry_delay_ms, 1000);
        assert_eq!(config.http.timeout_secs, 30);

        let politeness = Politeness::from(&config.politeness);
        assert_eq!(politeness.item_delay_ms, (0, 0));
        assert_eq!(politeness.page_delay_ms, (2000, 4000));
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        assert!(Config::from_yaml("sources: [hsc]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "output_dir: ./pdfs\nbrowserless:\n  token: abc").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("./pdfs"));
        assert_eq!(config.browserless.token.as_deref(), Some("abc"));
        assert_eq!(config.browserless.url, "http://localhost:3000");

        assert!(matches!(
            Config::load(Path::new("/nonexistent/bcpt.yaml")),
            Err(CrawlError::Config(_))
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = Config::from_yaml("database: file.db\nlanguages: [VI, EN]").unwrap();
        let cli = Cli::parse_from([
            "bcpt_crawler",
            "--database",
            "cli.db",
            "--language",
            "en",
            "--source",
            "dsc",
        ]);
        let config = file.apply_cli(&cli);
        assert_eq!(config.database, PathBuf::from("cli.db"));
        assert_eq!(config.languages, [Language::En]);
        assert_eq!(config.sources, [SourceName::Dsc]);
        assert_eq!(config.output_dir, PathBuf::from("bcpt_pdf"));
    }
}
