//! End-to-end job lifecycle and metrics aggregation tests
//!
//! Drives the job tracker through full lifecycles over a real SQLite store
//! and verifies the metrics collector observes the resulting records.

use std::sync::Arc;

use armada::events::{EventBus, FleetEvent};
use armada::jobs::{JobStatus, JobStore, JobTrackerService, SqliteJobStore};
use armada::metrics::MetricsCollectorService;
use armada::cache::OptionalCache;
use armada::registry::{AuthorMeta, CrawlerConfiguration, CrawlerRegistry};

fn crawler_config(id: &str) -> CrawlerConfiguration {
    CrawlerConfiguration {
        id: id.to_string(),
        name: format!("{id} crawler"),
        base_url: "http://127.0.0.1:9".to_string(),
        health_endpoint: "/health".to_string(),
        crawl_endpoint: "/crawl".to_string(),
        status_endpoint: "/status".to_string(),
        enabled: true,
        author: AuthorMeta::default(),
    }
}

struct Harness {
    store: Arc<SqliteJobStore>,
    tracker: JobTrackerService,
    metrics: MetricsCollectorService,
    events: Arc<EventBus>,
}

fn harness(ids: &[&str]) -> Harness {
    let store = Arc::new(SqliteJobStore::in_memory().unwrap());
    let events = Arc::new(EventBus::new());
    let registry = Arc::new(
        CrawlerRegistry::from_configs(ids.iter().map(|id| crawler_config(id)).collect()).unwrap(),
    );

    let tracker = JobTrackerService::new(store.clone(), events.clone());
    let metrics = MetricsCollectorService::new(
        registry,
        store.clone(),
        OptionalCache::disabled(),
        events.clone(),
    );

    Harness {
        store,
        tracker,
        metrics,
        events,
    }
}

/// A job flows start -> progress -> completion, with events at each step
#[tokio::test]
async fn test_full_lifecycle_with_events() {
    let h = harness(&["alpha"]);
    let mut subscription = h.events.subscribe().await;

    let job = h.tracker.track_job_start("alpha", "req-1").await.unwrap();
    h.tracker
        .track_job_progress(&job.job_id, 40, 2, 1, "crawling list pages")
        .await
        .unwrap();
    h.tracker
        .track_job_completion(&job.job_id, 100, 5, 2)
        .await
        .unwrap();

    let started = subscription.receiver.try_recv().unwrap();
    let progressed = subscription.receiver.try_recv().unwrap();
    let completed = subscription.receiver.try_recv().unwrap();

    assert!(matches!(started, FleetEvent::JobStarted(_)));
    match progressed {
        FleetEvent::JobProgress(record) => {
            assert_eq!(record.articles_processed, 40);
            assert_eq!(record.current_activity.as_deref(), Some("crawling list pages"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match completed {
        FleetEvent::JobCompleted(record) => {
            assert_eq!(record.status, JobStatus::Completed);
            assert!(record.end_time.is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let stored = h.store.find_by_id(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.articles_processed, 100);
    assert!(!h.tracker.has_running_jobs("alpha").await.unwrap());
}

/// Progress after a terminal transition is ignored
#[tokio::test]
async fn test_terminal_jobs_are_immutable() {
    let h = harness(&["alpha"]);

    let job = h.tracker.track_job_start("alpha", "req-1").await.unwrap();
    h.tracker.track_job_failure(&job.job_id, "boom").await.unwrap();

    h.tracker
        .track_job_progress(&job.job_id, 999, 0, 0, "zombie update")
        .await
        .unwrap();

    let stored = h.store.find_by_id(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_ne!(stored.articles_processed, 999);
    assert_eq!(stored.error_message.as_deref(), Some("boom"));
}

/// Cancellation is terminal, keeps CANCELLED status, and uses the failed channel
#[tokio::test]
async fn test_cancellation() {
    let h = harness(&["alpha"]);
    let job = h.tracker.track_job_start("alpha", "req-1").await.unwrap();

    let mut subscription = h.events.subscribe().await;
    h.tracker.cancel_job(&job.job_id).await.unwrap();

    match subscription.receiver.try_recv().unwrap() {
        FleetEvent::JobFailed(record) => {
            assert_eq!(record.status, JobStatus::Cancelled);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // A second cancel is a no-op
    h.tracker.cancel_job(&job.job_id).await.unwrap();
    let stored = h.store.find_by_id(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

/// Metrics aggregate the records the tracker produced
#[tokio::test]
async fn test_metrics_observe_tracked_jobs() {
    let h = harness(&["alpha"]);

    let done = h.tracker.track_job_start("alpha", "req-1").await.unwrap();
    h.tracker
        .track_job_completion(&done.job_id, 90, 0, 10)
        .await
        .unwrap();
    h.tracker.track_job_start("alpha", "req-2").await.unwrap();

    let metrics = h.metrics.collect_crawler_metrics("alpha").await.unwrap();

    assert_eq!(metrics.articles_processed, 90);
    assert_eq!(metrics.error_count, 10);
    assert_eq!(metrics.total_crawls_executed, 1);
    assert_eq!(metrics.active_crawls, 1);
    assert!((metrics.success_rate - 90.0).abs() < 1e-9);
    assert_eq!(metrics.trend.len(), 1);
    assert!(metrics.last_crawl_time.is_some());
}

/// Jobs on different crawlers stay independent across tracker and metrics
#[tokio::test]
async fn test_crawler_isolation() {
    let h = harness(&["alpha", "beta"]);

    let a = h.tracker.track_job_start("alpha", "req-a").await.unwrap();
    h.tracker.track_job_completion(&a.job_id, 10, 0, 0).await.unwrap();
    h.tracker.track_job_start("beta", "req-b").await.unwrap();

    assert!(!h.tracker.has_running_jobs("alpha").await.unwrap());
    assert!(h.tracker.has_running_jobs("beta").await.unwrap());

    let all = h.metrics.get_all_metrics().await;
    assert_eq!(all["alpha"].total_crawls_executed, 1);
    assert_eq!(all["beta"].total_crawls_executed, 0);
    assert_eq!(all["beta"].active_crawls, 1);
}

/// Restart recovery fails over RUNNING records before any new tracking
#[tokio::test]
async fn test_orphan_recovery_across_instances() {
    let store = Arc::new(SqliteJobStore::in_memory().unwrap());
    let events = Arc::new(EventBus::new());

    let first = JobTrackerService::new(store.clone(), events.clone());
    let job = first.track_job_start("alpha", "req-1").await.unwrap();
    drop(first);

    // Second tracker over the same store simulates a process restart
    let second = JobTrackerService::new(store.clone(), events);
    let recovered = second.recover_orphaned_jobs().await.unwrap();
    assert_eq!(recovered, 1);

    let stored = store.find_by_id(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("interrupted"));
    assert!(!second.has_running_jobs("alpha").await.unwrap());
}
