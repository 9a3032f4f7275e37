//! Crawl job lifecycle tracking
//!
//! A [`JobRecord`] is the durable representation of one crawl execution.
//! RUNNING is the sole initial state; COMPLETED, FAILED and CANCELLED are
//! terminal and nothing transitions out of them. The tracker always re-reads
//! the durable record before mutating it because progress updates arrive
//! concurrently from independent workers.

pub mod store;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::events::{EventBus, FleetEvent};

pub use store::{JobStore, SqliteJobStore};

// ============================================================================
// Job Record
// ============================================================================

/// Lifecycle status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Job is in progress
    Running,
    /// Job finished successfully
    Completed,
    /// Job failed, timed out or was interrupted
    Failed,
    /// Job was cancelled by an operator
    Cancelled,
}

impl JobStatus {
    /// String representation used in storage and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this status admits no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one crawl execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Generated unique job identifier
    pub job_id: String,

    /// Crawler this job runs on
    pub crawler_id: String,

    /// Request id supplied by the trigger path
    pub request_id: String,

    /// Current lifecycle status
    pub status: JobStatus,

    /// When the job started
    pub start_time: DateTime<Utc>,

    /// Set exactly when the job reaches a terminal status
    pub end_time: Option<DateTime<Utc>>,

    /// Articles processed so far
    pub articles_processed: u64,

    /// Articles skipped (duplicates, filtered)
    pub articles_skipped: u64,

    /// Articles that failed to process
    pub articles_failed: u64,

    /// Free-form description of what the crawler is doing
    pub current_activity: Option<String>,

    /// Failure description for FAILED/CANCELLED jobs
    pub error_message: Option<String>,

    /// Monotonically advancing update timestamp
    pub last_updated: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh RUNNING record
    pub fn start(crawler_id: &str, request_id: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            crawler_id: crawler_id.to_string(),
            request_id: request_id.to_string(),
            status: JobStatus::Running,
            start_time: now,
            end_time: None,
            articles_processed: 0,
            articles_skipped: 0,
            articles_failed: 0,
            current_activity: Some("started".to_string()),
            error_message: None,
            last_updated: now,
        }
    }

    /// Execution time in milliseconds, for terminal jobs
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

// ============================================================================
// Tracker Policy
// ============================================================================

/// Fixed lifecycle policy constants
#[derive(Debug, Clone)]
pub struct TrackerPolicy {
    /// A RUNNING job with no update for this long is presumed abandoned
    pub staleness_threshold: Duration,

    /// Terminal records older than this are deleted by retention cleanup
    pub retention_days: i64,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(3600),
            retention_days: 30,
        }
    }
}

// ============================================================================
// Job Tracker Service
// ============================================================================

/// Records the lifecycle of crawl jobs and answers history queries
pub struct JobTrackerService {
    store: Arc<dyn JobStore>,
    active: RwLock<HashMap<String, JobRecord>>,
    events: Arc<EventBus>,
    policy: TrackerPolicy,
}

impl JobTrackerService {
    /// Create a tracker over a durable store
    pub fn new(store: Arc<dyn JobStore>, events: Arc<EventBus>) -> Self {
        Self::with_policy(store, events, TrackerPolicy::default())
    }

    /// Create a tracker with a custom policy
    pub fn with_policy(
        store: Arc<dyn JobStore>,
        events: Arc<EventBus>,
        policy: TrackerPolicy,
    ) -> Self {
        Self {
            store,
            active: RwLock::new(HashMap::new()),
            events,
            policy,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    /// Start tracking a new crawl job
    pub async fn track_job_start(&self, crawler_id: &str, request_id: &str) -> Result<JobRecord> {
        let record = JobRecord::start(crawler_id, request_id);
        self.store.create(&record).await?;
        self.active
            .write()
            .await
            .insert(record.job_id.clone(), record.clone());

        tracing::info!(
            job_id = %record.job_id,
            crawler_id = %crawler_id,
            request_id = %request_id,
            "Job started"
        );
        crate::telemetry::record_job(crawler_id, "running");
        self.refresh_active_gauge(crawler_id).await;
        self.events
            .broadcast(FleetEvent::JobStarted(record.clone()))
            .await;

        Ok(record)
    }

    /// Record progress on a running job
    ///
    /// Reloads the authoritative record first; unknown or terminal jobs are
    /// a warned no-op so a late progress report can never resurrect a
    /// finished job.
    pub async fn track_job_progress(
        &self,
        job_id: &str,
        processed: u64,
        skipped: u64,
        failed: u64,
        activity: &str,
    ) -> Result<()> {
        let Some(mut record) = self.load_running(job_id, "progress").await? else {
            return Ok(());
        };

        record.articles_processed = processed;
        record.articles_skipped = skipped;
        record.articles_failed = failed;
        record.current_activity = Some(activity.to_string());
        record.last_updated = Utc::now();

        self.store.update(&record).await?;
        self.active
            .write()
            .await
            .insert(record.job_id.clone(), record.clone());

        tracing::debug!(
            job_id = %job_id,
            processed = processed,
            skipped = skipped,
            failed = failed,
            activity = %activity,
            "Job progress"
        );
        self.events.broadcast(FleetEvent::JobProgress(record)).await;
        Ok(())
    }

    /// Mark a running job COMPLETED with its final counters
    pub async fn track_job_completion(
        &self,
        job_id: &str,
        processed: u64,
        skipped: u64,
        failed: u64,
    ) -> Result<()> {
        let Some(mut record) = self.load_running(job_id, "completion").await? else {
            return Ok(());
        };

        record.articles_processed = processed;
        record.articles_skipped = skipped;
        record.articles_failed = failed;
        self.finish(&mut record, JobStatus::Completed, None).await?;

        tracing::info!(
            job_id = %job_id,
            crawler_id = %record.crawler_id,
            processed = processed,
            "Job completed"
        );
        self.events
            .broadcast(FleetEvent::JobCompleted(record))
            .await;
        Ok(())
    }

    /// Mark a running job FAILED with an error message
    pub async fn track_job_failure(&self, job_id: &str, error_message: &str) -> Result<()> {
        let Some(mut record) = self.load_running(job_id, "failure").await? else {
            return Ok(());
        };

        self.finish(&mut record, JobStatus::Failed, Some(error_message))
            .await?;

        tracing::warn!(job_id = %job_id, error = %error_message, "Job failed");
        self.events.broadcast(FleetEvent::JobFailed(record)).await;
        Ok(())
    }

    /// Cancel a running job
    ///
    /// Cancellation only updates bookkeeping; it does not signal the remote
    /// crawler. Broadcast uses the failed channel, matching subscriber
    /// expectations for jobs that did not complete.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let Some(mut record) = self.load_running(job_id, "cancel").await? else {
            return Ok(());
        };

        self.finish(&mut record, JobStatus::Cancelled, Some("cancelled by operator"))
            .await?;

        tracing::info!(job_id = %job_id, "Job cancelled");
        self.events.broadcast(FleetEvent::JobFailed(record)).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sweeps and recovery
    // ------------------------------------------------------------------

    /// Fail RUNNING jobs whose last update exceeded the staleness threshold
    pub async fn sweep_stale_jobs(&self) -> Result<u64> {
        let threshold =
            ChronoDuration::from_std(self.policy.staleness_threshold).unwrap_or_else(|_| {
                ChronoDuration::hours(1)
            });
        let cutoff = Utc::now() - threshold;
        let running = self.store.find_running(None).await?;

        let mut swept = 0;
        for mut record in running {
            if record.last_updated >= cutoff {
                continue;
            }
            self.finish(
                &mut record,
                JobStatus::Failed,
                Some("job timed out: no updates received before the staleness threshold"),
            )
            .await?;

            tracing::warn!(
                job_id = %record.job_id,
                crawler_id = %record.crawler_id,
                last_updated = %record.last_updated,
                "Stale job swept"
            );
            self.events.broadcast(FleetEvent::JobFailed(record)).await;
            swept += 1;
        }

        if swept > 0 {
            tracing::info!(count = swept, "Stale job sweep finished");
        }
        Ok(swept)
    }

    /// Delete terminal records older than the retention window
    pub async fn cleanup_expired_jobs(&self) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(self.policy.retention_days);
        let deleted = self.store.delete_terminal_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(count = deleted, cutoff = %cutoff, "Retention cleanup removed old jobs");
        }
        Ok(deleted)
    }

    /// Fail every job left RUNNING by a previous process instance
    ///
    /// Must run once at startup before new tracking calls are accepted.
    pub async fn recover_orphaned_jobs(&self) -> Result<u64> {
        let running = self.store.find_running(None).await?;
        let mut recovered = 0;

        for mut record in running {
            self.finish(
                &mut record,
                JobStatus::Failed,
                Some("job interrupted by orchestrator restart"),
            )
            .await?;
            recovered += 1;
        }
        self.active.write().await.clear();

        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered orphaned jobs from previous run");
        }
        Ok(recovered)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Most recent jobs for a crawler (newest first, limit 5)
    pub async fn get_recent_jobs(&self, crawler_id: &str) -> Result<Vec<JobRecord>> {
        self.store.find_by_crawler(crawler_id, 0, 5).await
    }

    /// Paged job history for a crawler, newest first
    pub async fn get_job_history(
        &self,
        crawler_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<JobRecord>> {
        self.store.find_by_crawler(crawler_id, page, size).await
    }

    /// Load a single job by id
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.store.find_by_id(job_id).await
    }

    /// All currently running jobs
    pub async fn get_running_jobs(&self) -> Result<Vec<JobRecord>> {
        self.store.find_running(None).await
    }

    /// Running jobs for one crawler
    pub async fn get_running_jobs_for(&self, crawler_id: &str) -> Result<Vec<JobRecord>> {
        self.store.find_running(Some(crawler_id)).await
    }

    /// Whether a crawler currently has running jobs (overlap prevention)
    pub async fn has_running_jobs(&self, crawler_id: &str) -> Result<bool> {
        Ok(self.store.count_running(crawler_id).await? > 0)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Reload a record and return it only if it is still RUNNING
    async fn load_running(&self, job_id: &str, operation: &str) -> Result<Option<JobRecord>> {
        match self.store.find_by_id(job_id).await? {
            Some(record) if record.status == JobStatus::Running => Ok(Some(record)),
            Some(record) => {
                tracing::warn!(
                    job_id = %job_id,
                    status = %record.status,
                    operation = operation,
                    "Ignoring update for terminal job"
                );
                Ok(None)
            }
            None => {
                tracing::warn!(
                    job_id = %job_id,
                    operation = operation,
                    "Ignoring update for unknown job"
                );
                Ok(None)
            }
        }
    }

    /// Transition a record to a terminal status and persist it
    async fn finish(
        &self,
        record: &mut JobRecord,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        record.status = status;
        record.end_time = Some(now);
        record.last_updated = now;
        if let Some(msg) = error_message {
            record.error_message = Some(msg.to_string());
        }

        self.store.update(record).await?;
        self.active.write().await.remove(&record.job_id);

        crate::telemetry::record_job(&record.crawler_id, match status {
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            _ => "failed",
        });
        self.refresh_active_gauge(&record.crawler_id).await;
        Ok(())
    }

    async fn refresh_active_gauge(&self, crawler_id: &str) {
        if let Ok(count) = self.store.count_running(crawler_id).await {
            crate::telemetry::set_active_jobs(crawler_id, count);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
