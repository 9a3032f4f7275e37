//! Per-crawler metrics aggregation
//!
//! Scans the durable job store on a schedule and rolls job records up into
//! per-crawler aggregates plus a per-job trend series. Aggregates are held
//! in a two-tier cache (in-process map plus the shared TTL cache) so reads
//! never hit the store unless both tiers miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::OptionalCache;
use crate::error::Result;
use crate::events::{EventBus, FleetEvent};
use crate::jobs::{JobRecord, JobStore};
use crate::registry::CrawlerRegistry;

// ============================================================================
// Types
// ============================================================================

/// One observed completed job, for per-job charting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    /// End time of the job this point describes
    pub timestamp: DateTime<Utc>,
    pub articles_processed: u64,
    /// Success rate of this job alone, in percent
    pub success_rate: f64,
    pub duration_ms: u64,
    pub failed_count: u64,
}

impl MetricPoint {
    fn from_job(job: &JobRecord) -> Option<Self> {
        let end_time = job.end_time?;
        let duration_ms = job.duration_ms()?.max(0) as u64;

        let denominator = job.articles_processed + job.articles_failed;
        let success_rate = if denominator > 0 {
            job.articles_processed as f64 / denominator as f64 * 100.0
        } else {
            0.0
        };

        Some(Self {
            timestamp: end_time,
            articles_processed: job.articles_processed,
            success_rate,
            duration_ms,
            failed_count: job.articles_failed,
        })
    }
}

/// Rolled-up metrics for one crawler over the aggregation window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerMetrics {
    pub crawler_id: String,

    /// Sum of processed articles across scanned jobs
    pub articles_processed: u64,

    /// Sum of failed articles across scanned jobs
    pub error_count: u64,

    /// Terminal jobs with a measurable duration
    pub total_crawls_executed: u64,

    pub total_execution_time_ms: u64,

    /// Jobs currently RUNNING, independent of the window
    pub active_crawls: u64,

    /// 0 when no crawl has completed in the window
    pub average_processing_time_ms: u64,

    /// processed / (processed + errors) in percent, 0 when both are 0
    pub success_rate: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crawl_time: Option<DateTime<Utc>>,

    /// One point per completed job, oldest first
    pub trend: Vec<MetricPoint>,

    pub collected_at: DateTime<Utc>,
}

impl CrawlerMetrics {
    /// Zeroed aggregate for a crawler with no scanned jobs
    pub fn empty(crawler_id: impl Into<String>) -> Self {
        Self {
            crawler_id: crawler_id.into(),
            articles_processed: 0,
            error_count: 0,
            total_crawls_executed: 0,
            total_execution_time_ms: 0,
            active_crawls: 0,
            average_processing_time_ms: 0,
            success_rate: 0.0,
            last_crawl_time: None,
            trend: Vec::new(),
            collected_at: Utc::now(),
        }
    }
}

/// Timing policy for metrics aggregation
#[derive(Debug, Clone)]
pub struct MetricsPolicy {
    /// Interval between scheduled aggregation passes
    pub collection_interval: Duration,
    /// Rolling window the scheduled pass scans
    pub window: chrono::Duration,
    /// TTL for entries in the shared cache
    pub cache_ttl: Duration,
}

impl Default for MetricsPolicy {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(30),
            window: chrono::Duration::hours(24),
            cache_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

fn cache_key(crawler_id: &str) -> String {
    format!("metrics:{crawler_id}")
}

// ============================================================================
// Service
// ============================================================================

/// Aggregates job records into per-crawler metrics
pub struct MetricsCollectorService {
    registry: Arc<CrawlerRegistry>,
    store: Arc<dyn JobStore>,
    cache: OptionalCache,
    local: RwLock<HashMap<String, CrawlerMetrics>>,
    events: Arc<EventBus>,
    policy: MetricsPolicy,
}

impl MetricsCollectorService {
    pub fn new(
        registry: Arc<CrawlerRegistry>,
        store: Arc<dyn JobStore>,
        cache: OptionalCache,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_policy(registry, store, cache, events, MetricsPolicy::default())
    }

    pub fn with_policy(
        registry: Arc<CrawlerRegistry>,
        store: Arc<dyn JobStore>,
        cache: OptionalCache,
        events: Arc<EventBus>,
        policy: MetricsPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            local: RwLock::new(HashMap::new()),
            events,
            policy,
        }
    }

    /// Aggregate the rolling window for one crawler and refresh both cache tiers
    pub async fn collect_crawler_metrics(&self, crawler_id: &str) -> Result<CrawlerMetrics> {
        let to = Utc::now();
        let from = to - self.policy.window;

        let mut metrics = self.compute(crawler_id, from, to).await?;
        metrics.active_crawls = self.store.count_running(crawler_id).await?;
        crate::telemetry::set_active_jobs(crawler_id, metrics.active_crawls);

        self.local
            .write()
            .await
            .insert(crawler_id.to_string(), metrics.clone());
        self.cache
            .set(&cache_key(crawler_id), &metrics, self.policy.cache_ttl)
            .await;

        Ok(metrics)
    }

    /// Latest rolling aggregate; recomputes synchronously on a full miss
    pub async fn get_metrics(&self, crawler_id: &str) -> Result<CrawlerMetrics> {
        if let Some(metrics) = self.local.read().await.get(crawler_id) {
            return Ok(metrics.clone());
        }

        if let Some(metrics) = self
            .cache
            .get::<CrawlerMetrics>(&cache_key(crawler_id))
            .await
        {
            self.local
                .write()
                .await
                .insert(crawler_id.to_string(), metrics.clone());
            return Ok(metrics);
        }

        self.collect_crawler_metrics(crawler_id).await
    }

    /// Aggregate over an arbitrary window, without touching the rolling cache
    pub async fn get_metrics_in_range(
        &self,
        crawler_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CrawlerMetrics> {
        let mut metrics = self.compute(crawler_id, from, to).await?;
        metrics.active_crawls = self.store.count_running(crawler_id).await?;
        Ok(metrics)
    }

    /// Rolling aggregates for every configured crawler
    pub async fn get_all_metrics(&self) -> HashMap<String, CrawlerMetrics> {
        let configs = self.registry.all().await;
        let mut result = HashMap::with_capacity(configs.len());

        for config in configs {
            match self.get_metrics(&config.id).await {
                Ok(metrics) => {
                    result.insert(config.id, metrics);
                }
                Err(e) => {
                    tracing::warn!(crawler_id = %config.id, error = %e, "Metrics lookup failed");
                    result.insert(config.id.clone(), CrawlerMetrics::empty(config.id));
                }
            }
        }
        result
    }

    /// One scheduled aggregation pass over every enabled crawler
    ///
    /// A failure for one crawler is logged and does not stop the pass.
    pub async fn run_scheduled_pass(&self) {
        let configs = self.registry.enabled().await;

        for config in configs {
            match self.collect_crawler_metrics(&config.id).await {
                Ok(metrics) => {
                    self.events
                        .broadcast(FleetEvent::MetricsUpdated(metrics))
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        crawler_id = %config.id,
                        error = %e,
                        "Scheduled metrics collection failed"
                    );
                }
            }
        }
    }

    async fn compute(
        &self,
        crawler_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CrawlerMetrics> {
        let jobs = self.store.find_in_window(crawler_id, from, to).await?;

        let mut metrics = CrawlerMetrics::empty(crawler_id);
        let mut trend: Vec<MetricPoint> = Vec::new();

        for job in &jobs {
            metrics.articles_processed += job.articles_processed;
            metrics.error_count += job.articles_failed;

            if let Some(point) = MetricPoint::from_job(job) {
                metrics.total_crawls_executed += 1;
                metrics.total_execution_time_ms += point.duration_ms;
                trend.push(point);
            }

            if job.status.is_terminal() {
                if let Some(end) = job.end_time {
                    metrics.last_crawl_time = Some(match metrics.last_crawl_time {
                        Some(current) => current.max(end),
                        None => end,
                    });
                }
            }
        }

        if metrics.total_crawls_executed > 0 {
            metrics.average_processing_time_ms =
                metrics.total_execution_time_ms / metrics.total_crawls_executed;
        }

        let denominator = metrics.articles_processed + metrics.error_count;
        if denominator > 0 {
            metrics.success_rate =
                metrics.articles_processed as f64 / denominator as f64 * 100.0;
        }

        trend.sort_by_key(|p| p.timestamp);
        metrics.trend = trend;

        Ok(metrics)
    }

    pub fn policy(&self) -> &MetricsPolicy {
        &self.policy
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, SqliteJobStore};
    use crate::registry::test_config;
    use chrono::Duration as ChronoDuration;

    async fn seed_job(
        store: &SqliteJobStore,
        crawler: &str,
        processed: u64,
        failed: u64,
        duration_ms: i64,
        status: JobStatus,
    ) -> JobRecord {
        let mut job = JobRecord::start(crawler, "req");
        job.start_time = Utc::now() - ChronoDuration::hours(1);
        job.articles_processed = processed;
        job.articles_failed = failed;
        job.status = status;
        if status.is_terminal() {
            job.end_time = Some(job.start_time + ChronoDuration::milliseconds(duration_ms));
        }
        store.create(&job).await.unwrap();
        job
    }

    fn service(store: Arc<SqliteJobStore>) -> MetricsCollectorService {
        let registry = Arc::new(
            CrawlerRegistry::from_configs(vec![test_config("alpha", "http://localhost:9")])
                .unwrap(),
        );
        MetricsCollectorService::new(
            registry,
            store,
            OptionalCache::disabled(),
            Arc::new(EventBus::new()),
        )
    }

    #[tokio::test]
    async fn test_empty_window_yields_zeroes() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let service = service(store);

        let metrics = service.collect_crawler_metrics("alpha").await.unwrap();
        assert_eq!(metrics.total_crawls_executed, 0);
        assert_eq!(metrics.average_processing_time_ms, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert!(metrics.last_crawl_time.is_none());
        assert!(metrics.trend.is_empty());
    }

    #[tokio::test]
    async fn test_aggregation_formulas() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        seed_job(&store, "alpha", 90, 10, 1000, JobStatus::Completed).await;
        seed_job(&store, "alpha", 60, 40, 3000, JobStatus::Failed).await;
        // A running job contributes counters but no duration
        seed_job(&store, "alpha", 30, 0, 0, JobStatus::Running).await;

        let service = service(store);
        let metrics = service.collect_crawler_metrics("alpha").await.unwrap();

        assert_eq!(metrics.articles_processed, 180);
        assert_eq!(metrics.error_count, 50);
        assert_eq!(metrics.total_crawls_executed, 2);
        assert_eq!(metrics.total_execution_time_ms, 4000);
        assert_eq!(metrics.average_processing_time_ms, 2000);
        assert_eq!(metrics.active_crawls, 1);
        assert!((metrics.success_rate - 180.0 / 230.0 * 100.0).abs() < 1e-9);
        assert!(metrics.last_crawl_time.is_some());
        assert_eq!(metrics.trend.len(), 2);
    }

    #[tokio::test]
    async fn test_trend_points_hold_per_job_values() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        seed_job(&store, "alpha", 50, 50, 2000, JobStatus::Completed).await;

        let service = service(store);
        let metrics = service.collect_crawler_metrics("alpha").await.unwrap();

        let point = &metrics.trend[0];
        assert_eq!(point.articles_processed, 50);
        assert_eq!(point.failed_count, 50);
        assert_eq!(point.duration_ms, 2000);
        assert!((point.success_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_range_query_does_not_touch_cache() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        seed_job(&store, "alpha", 10, 0, 500, JobStatus::Completed).await;

        let service = service(store);
        let now = Utc::now();
        let ranged = service
            .get_metrics_in_range("alpha", now - ChronoDuration::hours(2), now)
            .await
            .unwrap();
        assert_eq!(ranged.total_crawls_executed, 1);

        assert!(service.local.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_pass_broadcasts() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        seed_job(&store, "alpha", 5, 0, 100, JobStatus::Completed).await;

        let service = service(store);
        let mut subscription = service.events.subscribe().await;

        service.run_scheduled_pass().await;

        match subscription.receiver.try_recv().unwrap() {
            FleetEvent::MetricsUpdated(metrics) => {
                assert_eq!(metrics.crawler_id, "alpha");
                assert_eq!(metrics.total_crawls_executed, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_metrics_uses_local_cache() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        seed_job(&store, "alpha", 10, 0, 500, JobStatus::Completed).await;

        let service = service(store.clone());
        let first = service.get_metrics("alpha").await.unwrap();
        assert_eq!(first.total_crawls_executed, 1);

        // New job lands, but the cached snapshot is served until recollection
        seed_job(&store, "alpha", 10, 0, 500, JobStatus::Completed).await;
        let second = service.get_metrics("alpha").await.unwrap();
        assert_eq!(second.total_crawls_executed, 1);

        let recollected = service.collect_crawler_metrics("alpha").await.unwrap();
        assert_eq!(recollected.total_crawls_executed, 2);
    }
}
