//! Durable job store
//!
//! Trait-based storage abstraction for [`JobRecord`]s with a SQLite
//! implementation. Timestamps are persisted as fixed-width RFC 3339 strings
//! so lexicographic ordering in SQL matches chronological ordering.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};

use super::{JobRecord, JobStatus};

// ============================================================================
// Trait
// ============================================================================

/// Durable storage for crawl job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record
    async fn create(&self, record: &JobRecord) -> Result<()>;

    /// Overwrite an existing record
    async fn update(&self, record: &JobRecord) -> Result<()>;

    /// Load one record by job id
    async fn find_by_id(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Page through a crawler's records, newest start time first
    async fn find_by_crawler(
        &self,
        crawler_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<JobRecord>>;

    /// All RUNNING records, optionally restricted to one crawler
    async fn find_running(&self, crawler_id: Option<&str>) -> Result<Vec<JobRecord>>;

    /// Number of RUNNING records for a crawler
    async fn count_running(&self, crawler_id: &str) -> Result<u64>;

    /// Delete terminal records whose start time predates the cutoff
    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Records for a crawler whose start time falls inside the window
    async fn find_in_window(
        &self,
        crawler_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

/// SQLite-backed job store
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) a job store at the given path
    pub fn new(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // WAL mode for concurrent readers alongside the writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "Job store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> AnyResult<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> AnyResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS crawl_jobs (
                    job_id TEXT PRIMARY KEY,
                    crawler_id TEXT NOT NULL,
                    request_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    articles_processed INTEGER NOT NULL DEFAULT 0,
                    articles_skipped INTEGER NOT NULL DEFAULT 0,
                    articles_failed INTEGER NOT NULL DEFAULT 0,
                    current_activity TEXT,
                    error_message TEXT,
                    last_updated TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_crawl_jobs_crawler_start
                    ON crawl_jobs(crawler_id, start_time DESC);

                CREATE INDEX IF NOT EXISTS idx_crawl_jobs_status
                    ON crawl_jobs(status);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Poisoning only happens if another thread panicked mid-statement;
        // recover the guard rather than cascading the panic.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_record(row: &Row<'_>) -> std::result::Result<JobRecord, rusqlite::Error> {
    let status: String = row.get("status")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let last_updated: String = row.get("last_updated")?;

    Ok(JobRecord {
        job_id: row.get("job_id")?,
        crawler_id: row.get("crawler_id")?,
        request_id: row.get("request_id")?,
        status: status.parse::<JobStatus>().unwrap_or(JobStatus::Failed),
        start_time: decode_time(&start_time)?,
        end_time: end_time.as_deref().map(decode_time).transpose()?,
        articles_processed: row.get::<_, i64>("articles_processed")? as u64,
        articles_skipped: row.get::<_, i64>("articles_skipped")? as u64,
        articles_failed: row.get::<_, i64>("articles_failed")? as u64,
        current_activity: row.get("current_activity")?,
        error_message: row.get("error_message")?,
        last_updated: decode_time(&last_updated)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, record: &JobRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
                INSERT INTO crawl_jobs (
                    job_id, crawler_id, request_id, status, start_time, end_time,
                    articles_processed, articles_skipped, articles_failed,
                    current_activity, error_message, last_updated
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.job_id,
                record.crawler_id,
                record.request_id,
                record.status.as_str(),
                encode_time(record.start_time),
                record.end_time.map(encode_time),
                record.articles_processed as i64,
                record.articles_skipped as i64,
                record.articles_failed as i64,
                record.current_activity,
                record.error_message,
                encode_time(record.last_updated),
            ],
        )?;
        Ok(())
    }

    async fn update(&self, record: &JobRecord) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            r#"
                UPDATE crawl_jobs SET
                    status = ?2,
                    end_time = ?3,
                    articles_processed = ?4,
                    articles_skipped = ?5,
                    articles_failed = ?6,
                    current_activity = ?7,
                    error_message = ?8,
                    last_updated = ?9
                WHERE job_id = ?1
            "#,
            params![
                record.job_id,
                record.status.as_str(),
                record.end_time.map(encode_time),
                record.articles_processed as i64,
                record.articles_skipped as i64,
                record.articles_failed as i64,
                record.current_activity,
                record.error_message,
                encode_time(record.last_updated),
            ],
        )?;

        if changed == 0 {
            return Err(Error::Storage(anyhow::anyhow!(
                "job {} not found for update",
                record.job_id
            )));
        }
        Ok(())
    }

    async fn find_by_id(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT * FROM crawl_jobs WHERE job_id = ?1",
                params![job_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn find_by_crawler(
        &self,
        crawler_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<JobRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
                SELECT * FROM crawl_jobs
                WHERE crawler_id = ?1
                ORDER BY start_time DESC, job_id
                LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt.query_map(
            params![crawler_id, size as i64, (page as i64) * (size as i64)],
            row_to_record,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn find_running(&self, crawler_id: Option<&str>) -> Result<Vec<JobRecord>> {
        let conn = self.lock();
        let mut records = Vec::new();

        match crawler_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM crawl_jobs WHERE status = 'RUNNING' AND crawler_id = ?1
                     ORDER BY start_time DESC",
                )?;
                let rows = stmt.query_map(params![id], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM crawl_jobs WHERE status = 'RUNNING'
                     ORDER BY start_time DESC",
                )?;
                let rows = stmt.query_map([], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    async fn count_running(&self, crawler_id: &str) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM crawl_jobs WHERE status = 'RUNNING' AND crawler_id = ?1",
            params![crawler_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM crawl_jobs WHERE status != 'RUNNING' AND start_time < ?1",
            params![encode_time(cutoff)],
        )?;
        Ok(deleted as u64)
    }

    async fn find_in_window(
        &self,
        crawler_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
                SELECT * FROM crawl_jobs
                WHERE crawler_id = ?1 AND start_time >= ?2 AND start_time <= ?3
                ORDER BY start_time ASC
            "#,
        )?;
        let rows = stmt.query_map(
            params![crawler_id, encode_time(from), encode_time(to)],
            row_to_record,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

// ============================================================================
// Tests
// ============================================================================
