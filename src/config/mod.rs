//! Application configuration
//!
//! Loads orchestrator settings from environment variables with sensible
//! defaults, or from a TOML file. The per-crawler fleet definition lives in
//! its own file and is handled by the registry module.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fleet and storage paths
    pub fleet: FleetConfig,

    /// Shared cache configuration
    pub cache: SharedCacheConfig,

    /// Background scheduling intervals
    pub scheduling: SchedulingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Fleet file and job store locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// TOML file listing the crawler instances
    pub fleet_file: PathBuf,

    /// SQLite job store path
    pub database_path: PathBuf,
}

/// Shared TTL cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedCacheConfig {
    /// Redis connection URL; absent disables the shared tier
    pub redis_url: Option<String>,

    /// Connection pool size
    pub pool_size: usize,

    /// Namespace prefix for every cache key
    pub key_prefix: String,
}

/// Background task intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Seconds between health check cycles
    pub health_interval_secs: u64,

    /// Seconds between metrics aggregation passes
    pub metrics_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let fleet_file = std::env::var("ARMADA_FLEET_FILE")
            .unwrap_or_else(|_| String::from("config/fleet.toml"))
            .into();

        let database_path = std::env::var("ARMADA_SQLITE_PATH")
            .unwrap_or_else(|_| String::from("data/jobs.db"))
            .into();

        let redis_url = std::env::var("REDIS_URL").ok();

        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(8);

        let key_prefix =
            std::env::var("ARMADA_CACHE_PREFIX").unwrap_or_else(|_| String::from("armada"));

        let health_interval_secs = std::env::var("ARMADA_HEALTH_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let metrics_interval_secs = std::env::var("ARMADA_METRICS_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let level = std::env::var("ARMADA_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format = std::env::var("ARMADA_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            fleet: FleetConfig {
                fleet_file,
                database_path,
            },
            cache: SharedCacheConfig {
                redis_url,
                pool_size,
                key_prefix,
            },
            scheduling: SchedulingConfig {
                health_interval_secs,
                metrics_interval_secs,
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fleet.fleet_file.as_os_str().is_empty() {
            anyhow::bail!("fleet_file must not be empty");
        }

        if self.cache.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if self.scheduling.health_interval_secs == 0 {
            anyhow::bail!("health_interval_secs must be greater than 0");
        }

        if self.scheduling.metrics_interval_secs == 0 {
            anyhow::bail!("metrics_interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get health cycle interval as Duration
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.scheduling.health_interval_secs)
    }

    /// Get metrics pass interval as Duration
    #[must_use]
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.scheduling.metrics_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fleet: FleetConfig {
                fleet_file: PathBuf::from("config/fleet.toml"),
                database_path: PathBuf::from("data/jobs.db"),
            },
            cache: SharedCacheConfig {
                redis_url: None,
                pool_size: 8,
                key_prefix: String::from("armada"),
            },
            scheduling: SchedulingConfig {
                health_interval_secs: 10,
                metrics_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
