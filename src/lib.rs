//! armada - Crawler Fleet Orchestration Core
//!
//! Coordinates a fleet of independent crawler instances: triggering crawls
//! through a circuit-breaker-guarded proxy, tracking job lifecycles in a
//! durable store, probing crawler health, and rolling job records up into
//! per-crawler metrics.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Orchestrator settings loaded from env or TOML
//! - [`registry`] - Fleet file parsing and per-crawler configuration
//! - [`breaker`] - Per-crawler circuit breaker shared by proxy and health paths
//! - [`proxy`] - Crawl trigger and status forwarding with bounded retry
//! - [`jobs`] - Job lifecycle tracking over a SQLite store
//! - [`health`] - Periodic liveness probing with two-tier caching
//! - [`metrics`] - Scheduled per-crawler aggregation of job records
//! - [`events`] - Fire-and-forget broadcast of fleet events
//! - [`cache`] - Optional shared Redis cache with graceful degradation
//!
//! # Example
//!
//! ```no_run
//! use armada::config::AppConfig;
//! use armada::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let orchestrator = Orchestrator::build(config).await?;
//!     orchestrator.spawn_background_tasks();
//!     // serve requests through orchestrator.proxy / orchestrator.tracker ...
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod proxy;
pub mod registry;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::breaker::{CircuitBreaker, CircuitState};
    pub use crate::config::AppConfig;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::events::{EventBus, FleetEvent};
    pub use crate::health::{HealthMonitorService, HealthState, HealthStatus};
    pub use crate::jobs::{JobRecord, JobStatus, JobTrackerService};
    pub use crate::metrics::{CrawlerMetrics, MetricsCollectorService};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::proxy::{CrawlOutcome, CrawlRequest, CrawlResponse, CrawlerOp, CrawlerProxyService};
    pub use crate::registry::{CrawlerConfiguration, CrawlerRegistry};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
