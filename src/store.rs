//! Report persistence with bounded retry.
//!
//! # Architecture
//!
//! - [`ReportSink`]: core trait for inserting one [`CanonicalReport`]
//! - [`SqliteStore`]: the `reports` table behind a single owned connection
//! - [`StoreGateway`]: decorator that adds retry with a randomized delay to
//!   any [`ReportSink`] and never lets an error escape
//!
//! # Idempotency
//!
//! An insert is skipped when a row with the same source, language, report
//! type, headline and date already exists. A retry after an ambiguous failure,
//! or a full re-run of the crawl, therefore never duplicates a report.
//!
//! # Sharing
//!
//! The connection sits behind a `Mutex`; every write is serialized through
//! the one [`SqliteStore`] value.

use rand::{Rng, rng};
use rusqlite::{Connection, params};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::error::StoreError;
use crate::models::CanonicalReport;
use crate::utils::truncate_for_log;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        source TEXT NOT NULL,
        ticker TEXT,
        date TEXT NOT NULL,
        reportType TEXT NOT NULL,
        recommendation TEXT,
        headline TEXT NOT NULL,
        content TEXT,
        analyst TEXT,
        language TEXT NOT NULL,
        linkWeb TEXT,
        linkDrive TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_reports_identity
        ON reports(source, language, reportType, headline, date);
";

const INSERT_REPORT: &str = "
    INSERT INTO reports (source, ticker, date, reportType, recommendation, headline, content, analyst, language, linkWeb, linkDrive)
    SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
    WHERE NOT EXISTS (
        SELECT 1 FROM reports
        WHERE source = ?1 AND language = ?9 AND reportType = ?4 AND headline = ?6 AND date = ?3
    )
";

/// Result of a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An identical report is already stored.
    Duplicate,
}

/// Trait for inserting reports into a store.
pub trait ReportSink {
    /// Insert one report.
    ///
    /// # Returns
    ///
    /// Whether a row was written, or the persistence error.
    async fn insert(&self, report: &CanonicalReport) -> Result<InsertOutcome, StoreError>;
}

/// SQLite-backed [`ReportSink`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Other(e.to_string()))?;
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.migrate()?;
        info!(path = %path.display(), "Opened report store");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Parameterized, idempotent insert.
    pub fn insert_report(&self, report: &CanonicalReport) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let changed = conn.execute(
            INSERT_REPORT,
            params![
                report.source.as_str(),
                report.ticker,
                report.date_string(),
                report.report_type.as_str(),
                report.recommendation,
                report.headline,
                report.content,
                report.analyst,
                report.language.as_str(),
                report.link_web,
                report.link_drive,
            ],
        )?;
        Ok(if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl ReportSink for SqliteStore {
    async fn insert(&self, report: &CanonicalReport) -> Result<InsertOutcome, StoreError> {
        self.insert_report(report)
    }
}

/// Outcome of [`StoreGateway::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    Duplicate,
    /// Every attempt failed; the report was not stored.
    Exhausted { attempts: usize },
}

/// Wrapper that adds bounded retry to any [`ReportSink`].
///
/// The delay before each retry is a random whole number of `delay_unit`s:
///
/// ```text
/// delay = delay_unit * random(1..=3)
/// ```
pub struct StoreGateway<S> {
    /// The underlying sink.
    inner: S,
    /// Total attempts, including the first.
    max_attempts: usize,
    delay_unit: Duration,
}

impl<S> StoreGateway<S>
where
    S: ReportSink,
{
    /// Create a gateway around a sink.
    ///
    /// # Arguments
    ///
    /// * `inner` - The sink to wrap
    /// * `max_attempts` - Attempts before giving up (3 recommended, at least 1)
    /// * `delay_unit` - Base unit of the randomized 1–3 unit delay
    ///
    /// # Example
    ///
    /// ```ignore
    /// let gateway = StoreGateway::new(SqliteStore::open(path)?, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: S, max_attempts: usize, delay_unit: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay_unit,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Persist a report, retrying on any error.
    ///
    /// Never fails: exhaustion is logged and reported as
    /// [`PersistOutcome::Exhausted`].
    #[instrument(level = "debug", skip_all, fields(source = %report.source, headline = %truncate_for_log(&report.headline, 80)))]
    pub async fn persist(&self, report: &CanonicalReport) -> PersistOutcome {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.inner.insert(report).await {
                Ok(InsertOutcome::Inserted) => {
                    debug!(attempt, "Report inserted");
                    return PersistOutcome::Inserted;
                }
                Ok(InsertOutcome::Duplicate) => {
                    debug!(attempt, "Report already stored");
                    return PersistOutcome::Duplicate;
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "persist() exhausted retries"
                        );
                        return PersistOutcome::Exhausted { attempts: attempt };
                    }

                    let units: u32 = rng().random_range(1..=3);
                    let delay = self.delay_unit.saturating_mul(units);
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "persist() failed; retrying after delay"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<S> fmt::Debug for StoreGateway<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreGateway")
            .field("max_attempts", &self.max_attempts)
            .field("delay_unit", &self.delay_unit)
            .finish()
    }
}

#[cfg(test)]
pub mod testing {
    //! Sinks for crawler tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then delegates to an in-memory store.
    /// With `commit_before_failing`, the failing calls still write the row.
    pub struct FlakySink {
        pub store: SqliteStore,
        pub failures: usize,
        pub commit_before_failing: bool,
        pub calls: AtomicUsize,
    }

    impl FlakySink {
        pub fn new(failures: usize) -> Self {
            Self {
                store: SqliteStore::in_memory().unwrap(),
                failures,
                commit_before_failing: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ReportSink for FlakySink {
        async fn insert(&self, report: &CanonicalReport) -> Result<InsertOutcome, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.commit_before_failing {
                    self.store.insert_report(report)?;
                }
                return Err(StoreError::Other("database is locked".to_string()));
            }
            self.store.insert_report(report)
        }
    }

    /// Delegates to an in-memory store and keeps every report it was handed.
    pub struct RecordingSink {
        pub store: SqliteStore,
        pub reports: Mutex<Vec<CanonicalReport>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                store: SqliteStore::in_memory().unwrap(),
                reports: Mutex::new(Vec::new()),
            }
        }
    }

    impl ReportSink for RecordingSink {
        async fn insert(&self, report: &CanonicalReport) -> Result<InsertOutcome, StoreError> {
            self.reports.lock().unwrap().push(report.clone());
            self.store.insert_report(report)
        }
    }

    /// Flips a cancel sender once `after` reports have been stored.
    pub struct CancellingSink {
        pub store: SqliteStore,
        pub after: usize,
        pub cancel: tokio::sync::watch::Sender<bool>,
        pub inserted: AtomicUsize,
    }

    impl CancellingSink {
        pub fn new(after: usize, cancel: tokio::sync::watch::Sender<bool>) -> Self {
            Self {
                store: SqliteStore::in_memory().unwrap(),
                after,
                cancel,
                inserted: AtomicUsize::new(0),
            }
        }
    }

    impl ReportSink for CancellingSink {
        async fn insert(&self, report: &CanonicalReport) -> Result<InsertOutcome, StoreError> {
            let outcome = self.store.insert_report(report)?;
            if self.inserted.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                let _ = self.cancel.send(true);
            }
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FlakySink;
    use super::*;
    use crate::models::{Language, ReportType, SourceId};
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;

    fn report(headline: &str) -> CanonicalReport {
        CanonicalReport {
            source: SourceId::Bsc,
            ticker: Some("ABC".to_string()),
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(9, 30, 0).unwrap(),
            report_type: ReportType::CompanyResearch,
            recommendation: Some("abc it's a buy".to_string()),
            headline: headline.to_string(),
            content: None,
            analyst: None,
            language: Language::Vi,
            link_web: Some("https://bvsc.com.vn/x".to_string()),
            link_drive: None,
        }
    }

    #[test]
    fn test_insert_stores_nulls_and_quotes() {
        let store = SqliteStore::in_memory().unwrap();
        let r = report("ABC's \"quoted\" update; DROP TABLE reports;");
        assert_eq!(store.insert_report(&r).unwrap(), InsertOutcome::Inserted);

        let conn = store.conn.lock().unwrap();
        let (headline, date, content, link_drive, report_type): (
            String,
            String,
            Option<String>,
            Option<String>,
            String,
        ) = conn
            .query_row(
                "SELECT headline, date, content, linkDrive, reportType FROM reports",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .unwrap();
        assert_eq!(headline, r.headline);
        assert_eq!(date, "2024-03-05 09:30:00");
        assert_eq!(content, None);
        assert_eq!(link_drive, None);
        assert_eq!(report_type, "Company Research");
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.insert_report(&report("A")).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_report(&report("A")).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.insert_report(&report("B")).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/reports.db");
        let store = SqliteStore::open(&path).unwrap();
        store.insert_report(&report("A")).unwrap();
        drop(store);
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_two_failures_then_success_writes_one_row() {
        let gateway = StoreGateway::new(FlakySink::new(2), 3, Duration::ZERO);
        assert_eq!(gateway.persist(&report("A")).await, PersistOutcome::Inserted);
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.inner().store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_failure_does_not_duplicate() {
        let mut sink = FlakySink::new(2);
        sink.commit_before_failing = true;
        let gateway = StoreGateway::new(sink, 3, Duration::ZERO);
        assert_eq!(gateway.persist(&report("A")).await, PersistOutcome::Duplicate);
        assert_eq!(gateway.inner().store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_indicator() {
        let gateway = StoreGateway::new(FlakySink::new(10), 3, Duration::ZERO);
        assert_eq!(
            gateway.persist(&report("A")).await,
            PersistOutcome::Exhausted { attempts: 3 }
        );
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.inner().store.count().unwrap(), 0);
    }
}
