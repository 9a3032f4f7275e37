//! Prometheus metrics for the orchestration core
//!
//! Call [`init_telemetry`] once at application startup to register all
//! metrics. If initialization fails or is skipped (as in most tests), every
//! recording function becomes a no-op, so business logic never depends on
//! the metrics registry being alive.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

use crate::breaker::CircuitState;

/// Container for all fleet metrics
struct FleetTelemetry {
    crawl_requests: CounterVec,
    breaker_state: GaugeVec,
    health_checks: CounterVec,
    health_check_duration: HistogramVec,
    jobs: CounterVec,
    active_jobs: GaugeVec,
}

static TELEMETRY: OnceLock<FleetTelemetry> = OnceLock::new();

/// Register all Prometheus metrics
///
/// Safe to call more than once; only the first call registers.
pub fn init_telemetry() -> anyhow::Result<()> {
    if TELEMETRY.get().is_some() {
        return Ok(());
    }

    let telemetry = FleetTelemetry {
        crawl_requests: register_counter_vec!(
            "armada_crawl_requests_total",
            "Crawl trigger requests by crawler and outcome",
            &["crawler", "outcome"]
        )?,
        breaker_state: register_gauge_vec!(
            "armada_breaker_state",
            "Circuit breaker state per crawler (0=closed, 1=half_open, 2=open)",
            &["crawler"]
        )?,
        health_checks: register_counter_vec!(
            "armada_health_checks_total",
            "Health probes by crawler and result",
            &["crawler", "result"]
        )?,
        health_check_duration: register_histogram_vec!(
            "armada_health_check_duration_seconds",
            "Health probe round-trip time",
            &["crawler"]
        )?,
        jobs: register_counter_vec!(
            "armada_jobs_total",
            "Job lifecycle transitions by crawler and terminal status",
            &["crawler", "status"]
        )?,
        active_jobs: register_gauge_vec!(
            "armada_active_jobs",
            "Currently running jobs per crawler",
            &["crawler"]
        )?,
    };

    TELEMETRY.set(telemetry).ok();
    tracing::debug!("Prometheus telemetry registered");
    Ok(())
}

/// Count one crawl trigger request outcome (accepted, conflict, error, ...)
pub fn record_crawl_request(crawler: &str, outcome: &str) {
    if let Some(t) = TELEMETRY.get() {
        t.crawl_requests.with_label_values(&[crawler, outcome]).inc();
    }
}

/// Record the breaker state gauge for a crawler
pub fn set_breaker_state(crawler: &str, state: CircuitState) {
    if let Some(t) = TELEMETRY.get() {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        t.breaker_state.with_label_values(&[crawler]).set(value);
    }
}

/// Count one health probe and its round-trip time
pub fn record_health_check(crawler: &str, result: &str, duration_secs: f64) {
    if let Some(t) = TELEMETRY.get() {
        t.health_checks.with_label_values(&[crawler, result]).inc();
        t.health_check_duration
            .with_label_values(&[crawler])
            .observe(duration_secs);
    }
}

/// Count one job lifecycle transition
pub fn record_job(crawler: &str, status: &str) {
    if let Some(t) = TELEMETRY.get() {
        t.jobs.with_label_values(&[crawler, status]).inc();
    }
}

/// Record the currently running job count for a crawler
pub fn set_active_jobs(crawler: &str, count: u64) {
    if let Some(t) = TELEMETRY.get() {
        t.active_jobs
            .with_label_values(&[crawler])
            .set(count as f64);
    }
}

/// Encode the default registry in Prometheus text format
pub fn gather() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
