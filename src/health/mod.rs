//! Crawler health monitoring
//!
//! Periodically probes every enabled crawler's health endpoint, records the
//! result against the shared circuit breaker, and keeps a two-tier cache of
//! the latest status (fast in-process map plus the shared TTL cache).
//! Status transitions are broadcast on the event bus; unchanged results are
//! cached silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::breaker::CircuitBreaker;
use crate::cache::OptionalCache;
use crate::events::{EventBus, FleetEvent};
use crate::proxy::CrawlerOp;
use crate::registry::{CrawlerConfiguration, CrawlerRegistry};

// ============================================================================
// Types
// ============================================================================

/// Liveness classification for a crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    /// Never probed, or no cached result survives
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Healthy => "HEALTHY",
            HealthState::Unhealthy => "UNHEALTHY",
            HealthState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Latest health observation for one crawler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub crawler_id: String,
    pub status: HealthState,

    /// Probe failure description, absent when healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Measured round-trip time, absent unless the probe completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    pub last_check: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(crawler_id: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            crawler_id: crawler_id.into(),
            status: HealthState::Healthy,
            message: None,
            response_time_ms: Some(response_time_ms),
            last_check: Utc::now(),
        }
    }

    pub fn unhealthy(crawler_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            crawler_id: crawler_id.into(),
            status: HealthState::Unhealthy,
            message: Some(message.into()),
            response_time_ms: None,
            last_check: Utc::now(),
        }
    }

    pub fn unknown(crawler_id: impl Into<String>) -> Self {
        Self {
            crawler_id: crawler_id.into(),
            status: HealthState::Unknown,
            message: None,
            response_time_ms: None,
            last_check: Utc::now(),
        }
    }
}

/// Timing policy for health probing
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Interval between full probe cycles
    pub check_interval: Duration,
    /// Timeout for a single probe
    pub probe_timeout: Duration,
    /// Upper bound on one whole cycle
    pub batch_timeout: Duration,
    /// TTL for entries in the shared cache
    pub cache_ttl: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            batch_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

fn cache_key(crawler_id: &str) -> String {
    format!("health:{crawler_id}")
}

// ============================================================================
// Service
// ============================================================================

/// Probes crawler liveness and caches the observations
pub struct HealthMonitorService {
    registry: Arc<CrawlerRegistry>,
    breaker: Arc<CircuitBreaker>,
    client: reqwest::Client,
    cache: OptionalCache,
    local: RwLock<HashMap<String, HealthStatus>>,
    events: Arc<EventBus>,
    policy: HealthPolicy,
}

impl HealthMonitorService {
    pub fn new(
        registry: Arc<CrawlerRegistry>,
        breaker: Arc<CircuitBreaker>,
        cache: OptionalCache,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_policy(registry, breaker, cache, events, HealthPolicy::default())
    }

    pub fn with_policy(
        registry: Arc<CrawlerRegistry>,
        breaker: Arc<CircuitBreaker>,
        cache: OptionalCache,
        events: Arc<EventBus>,
        policy: HealthPolicy,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(policy.probe_timeout)
            .build()
            .unwrap_or_default();

        Self {
            registry,
            breaker,
            client,
            cache,
            local: RwLock::new(HashMap::new()),
            events,
            policy,
        }
    }

    /// One full probe cycle over every enabled crawler
    ///
    /// Probes run concurrently, bounded by the batch timeout so one hung
    /// instance cannot stall the cycle.
    pub async fn run_cycle(&self) {
        let configs = self.registry.enabled().await;
        if configs.is_empty() {
            return;
        }

        let probes = configs.iter().map(|config| self.check_and_store(config));
        let cycle = join_all(probes);

        if tokio::time::timeout(self.policy.batch_timeout, cycle)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.policy.batch_timeout.as_secs(),
                "Health check cycle exceeded batch timeout"
            );
        }
    }

    /// Probe one crawler and record the outcome on the circuit breaker
    pub async fn perform_health_check(&self, config: &CrawlerConfiguration) -> HealthStatus {
        let crawler_id = &config.id;

        if !self.breaker.allow_request(crawler_id).await {
            crate::telemetry::record_health_check(crawler_id, "skipped", 0.0);
            return HealthStatus::unhealthy(crawler_id, "circuit breaker is open");
        }

        let url = match CrawlerOp::Health.url(config) {
            Ok(url) => url,
            Err(e) => {
                self.breaker.record_failure(crawler_id).await;
                return HealthStatus::unhealthy(
                    crawler_id,
                    format!("invalid health endpoint: {e}"),
                );
            }
        };

        let started = Instant::now();
        let result = self
            .client
            .get(url)
            .timeout(self.policy.probe_timeout)
            .send()
            .await;
        let elapsed = started.elapsed();

        let status = match result {
            Ok(response) if response.status().as_u16() == 200 => {
                self.breaker.record_success(crawler_id).await;
                HealthStatus::healthy(crawler_id, elapsed.as_millis() as u64)
            }
            Ok(response) => {
                self.breaker.record_failure(crawler_id).await;
                HealthStatus::unhealthy(
                    crawler_id,
                    format!("health endpoint returned HTTP {}", response.status().as_u16()),
                )
            }
            Err(e) => {
                self.breaker.record_failure(crawler_id).await;
                HealthStatus::unhealthy(crawler_id, format!("health probe failed: {e}"))
            }
        };

        let result_label = match status.status {
            HealthState::Healthy => "healthy",
            _ => "unhealthy",
        };
        crate::telemetry::record_health_check(crawler_id, result_label, elapsed.as_secs_f64());

        status
    }

    async fn check_and_store(&self, config: &CrawlerConfiguration) {
        let status = self.perform_health_check(config).await;
        self.store_status(status).await;
    }

    /// Write to both cache tiers, broadcasting only on state transitions
    async fn store_status(&self, status: HealthStatus) {
        let crawler_id = status.crawler_id.clone();

        let previous = {
            let mut local = self.local.write().await;
            local.insert(crawler_id.clone(), status.clone())
        };

        self.cache
            .set(&cache_key(&crawler_id), &status, self.policy.cache_ttl)
            .await;

        let changed = previous
            .map(|p| p.status != status.status)
            .unwrap_or(true);
        if changed {
            tracing::info!(
                crawler_id = %crawler_id,
                status = %status.status,
                "Crawler health changed"
            );
            self.events.broadcast(FleetEvent::HealthChanged(status)).await;
        }
    }

    /// Latest known health for a crawler, without probing
    pub async fn get_crawler_health(&self, crawler_id: &str) -> HealthStatus {
        if let Some(status) = self.local.read().await.get(crawler_id) {
            return status.clone();
        }

        if let Some(status) = self
            .cache
            .get::<HealthStatus>(&cache_key(crawler_id))
            .await
        {
            // Warm the in-process tier for subsequent reads
            self.local
                .write()
                .await
                .insert(crawler_id.to_string(), status.clone());
            return status;
        }

        HealthStatus::unknown(crawler_id)
    }

    /// Latest known health for every configured crawler
    pub async fn get_all_crawler_health(&self) -> HashMap<String, HealthStatus> {
        let configs = self.registry.all().await;
        let mut result = HashMap::with_capacity(configs.len());

        for config in configs {
            let status = self.get_crawler_health(&config.id).await;
            result.insert(config.id, status);
        }
        result
    }

    /// Immediate probe that bypasses an open circuit
    pub async fn force_health_check(&self, crawler_id: &str) -> HealthStatus {
        let Some(config) = self.registry.get(crawler_id).await else {
            return HealthStatus::unknown(crawler_id);
        };

        self.breaker.reset(crawler_id).await;
        let status = self.perform_health_check(&config).await;
        self.store_status(status.clone()).await;
        status
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }
}

// ============================================================================
// Tests
// ============================================================================
