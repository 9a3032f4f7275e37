//! Fleet orchestrator
//!
//! Wires the registry, circuit breaker, job store and the four services
//! together, recovers orphaned jobs from the previous run, and drives the
//! recurring background tasks until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheConfig, OptionalCache};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::health::HealthMonitorService;
use crate::jobs::{JobTrackerService, SqliteJobStore};
use crate::metrics::MetricsCollectorService;
use crate::proxy::CrawlerProxyService;
use crate::registry::CrawlerRegistry;

const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Owns every service and the background task lifecycle
pub struct Orchestrator {
    pub registry: Arc<CrawlerRegistry>,
    pub breaker: Arc<CircuitBreaker>,
    pub events: Arc<EventBus>,
    pub tracker: Arc<JobTrackerService>,
    pub proxy: Arc<CrawlerProxyService>,
    pub health: Arc<HealthMonitorService>,
    pub metrics: Arc<MetricsCollectorService>,
    config: AppConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    /// Build the full service graph and run startup recovery
    ///
    /// Orphan recovery runs here, before any background task is spawned and
    /// before the caller can hand out references, so no job-tracking call
    /// can race the recovery pass.
    pub async fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(
            CrawlerRegistry::load(&config.fleet.fleet_file)
                .context("Failed to load fleet file")?,
        );
        tracing::info!(
            crawlers = registry.len().await,
            fleet_file = %config.fleet.fleet_file.display(),
            "Crawler registry loaded"
        );

        let store = Arc::new(
            SqliteJobStore::new(&config.fleet.database_path)
                .context("Failed to open job store")?,
        );

        let cache = match &config.cache.redis_url {
            Some(url) => {
                let cache_config = CacheConfig {
                    url: url.clone(),
                    pool_size: config.cache.pool_size,
                    key_prefix: config.cache.key_prefix.clone(),
                };
                OptionalCache::from_config(&cache_config).await
            }
            None => {
                tracing::info!("No Redis URL configured, shared cache disabled");
                OptionalCache::disabled()
            }
        };

        let breaker = Arc::new(CircuitBreaker::new());
        let events = Arc::new(EventBus::new());

        let tracker = Arc::new(JobTrackerService::new(store.clone(), events.clone()));
        let proxy = Arc::new(CrawlerProxyService::new(registry.clone(), breaker.clone()));
        let health = Arc::new(HealthMonitorService::new(
            registry.clone(),
            breaker.clone(),
            cache.clone(),
            events.clone(),
        ));
        let metrics = Arc::new(MetricsCollectorService::new(
            registry.clone(),
            store,
            cache,
            events.clone(),
        ));

        let recovered = tracker.recover_orphaned_jobs().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Marked orphaned jobs as failed after restart");
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            registry,
            breaker,
            events,
            tracker,
            proxy,
            health,
            metrics,
            config,
            shutdown_tx,
        })
    }

    /// Spawn the recurring background tasks
    pub fn spawn_background_tasks(&self) {
        self.spawn_loop(
            "health_cycle",
            self.config.health_interval(),
            self.health.clone(),
            |health| async move { health.run_cycle().await },
        );

        self.spawn_loop(
            "metrics_pass",
            self.config.metrics_interval(),
            self.metrics.clone(),
            |metrics| async move { metrics.run_scheduled_pass().await },
        );

        self.spawn_loop(
            "stale_sweep",
            STALE_SWEEP_INTERVAL,
            self.tracker.clone(),
            |tracker| async move {
                if let Err(e) = tracker.sweep_stale_jobs().await {
                    tracing::error!(error = %e, "Stale job sweep failed");
                }
            },
        );

        self.spawn_loop(
            "retention_cleanup",
            RETENTION_INTERVAL,
            self.tracker.clone(),
            |tracker| async move {
                if let Err(e) = tracker.cleanup_expired_jobs().await {
                    tracing::error!(error = %e, "Retention cleanup failed");
                }
            },
        );
    }

    fn spawn_loop<S, F, Fut>(&self, name: &'static str, period: Duration, service: Arc<S>, body: F)
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        body(service.clone()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!(task = name, "Background task stopping");
                            break;
                        }
                    }
                }
            }
        });

        tracing::info!(task = name, period_secs = period.as_secs(), "Background task spawned");
    }

    /// Signal every background task to stop
    pub fn shutdown(&self) {
        tracing::info!("Orchestrator shutting down");
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fleet_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("fleet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
                [[crawler]]
                id = "alpha"
                name = "Alpha"
                base_url = "http://localhost:9"
            "#
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_build_recovers_and_wires_services() {
        let dir = tempfile::tempdir().unwrap();
        let fleet_file = write_fleet_file(&dir);

        let mut config = AppConfig::default();
        config.fleet.fleet_file = fleet_file;
        config.fleet.database_path = dir.path().join("jobs.db");

        let orchestrator = Orchestrator::build(config).await.unwrap();
        assert_eq!(orchestrator.registry.len().await, 1);
        assert!(!orchestrator
            .tracker
            .has_running_jobs("alpha")
            .await
            .unwrap());

        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_build_rejects_missing_fleet_file() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = AppConfig::default();
        config.fleet.fleet_file = dir.path().join("missing.toml");
        config.fleet.database_path = dir.path().join("jobs.db");

        assert!(Orchestrator::build(config).await.is_err());
    }
}
