//! Crawler configuration registry
//!
//! The registry holds an immutable snapshot of every configured crawler
//! instance, loaded from a TOML fleet file. Snapshots are refreshable on
//! demand via [`CrawlerRegistry::reload`]; individual entries are never
//! mutated in place.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

// ============================================================================
// Crawler Configuration
// ============================================================================

/// Author metadata attached to a crawler entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorMeta {
    /// Maintainer name
    #[serde(default)]
    pub name: Option<String>,

    /// Contact email
    #[serde(default)]
    pub email: Option<String>,
}

/// Configuration for a single crawler instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlerConfiguration {
    /// Unique crawler identifier
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Base URL of the crawler instance
    pub base_url: String,

    /// Health endpoint path
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,

    /// Crawl trigger endpoint path
    #[serde(default = "default_crawl_endpoint")]
    pub crawl_endpoint: String,

    /// Status endpoint path
    #[serde(default = "default_status_endpoint")]
    pub status_endpoint: String,

    /// Whether this crawler participates in the fleet
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maintainer metadata
    #[serde(default)]
    pub author: AuthorMeta,
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

fn default_crawl_endpoint() -> String {
    "/crawl".to_string()
}

fn default_status_endpoint() -> String {
    "/status".to_string()
}

fn default_enabled() -> bool {
    true
}

impl CrawlerConfiguration {
    /// Resolve an endpoint path against this crawler's base URL
    pub fn endpoint_url(&self, path: &str) -> Result<Url, RegistryError> {
        let base = Url::parse(&self.base_url).map_err(|e| RegistryError::InvalidBaseUrl {
            id: self.id.clone(),
            reason: e.to_string(),
        })?;
        base.join(path).map_err(|e| RegistryError::InvalidBaseUrl {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Full URL of the health endpoint
    pub fn health_url(&self) -> Result<Url, RegistryError> {
        self.endpoint_url(&self.health_endpoint)
    }

    /// Full URL of the crawl trigger endpoint
    pub fn crawl_url(&self) -> Result<Url, RegistryError> {
        self.endpoint_url(&self.crawl_endpoint)
    }

    /// Full URL of the status endpoint
    pub fn status_url(&self) -> Result<Url, RegistryError> {
        self.endpoint_url(&self.status_endpoint)
    }
}

/// Top-level structure of the fleet TOML file
#[derive(Debug, Deserialize)]
struct FleetFile {
    #[serde(default, rename = "crawler")]
    crawlers: Vec<CrawlerConfiguration>,
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of all configured crawler instances
///
/// Lookups return cloned snapshots; callers never observe a half-reloaded
/// registry because the inner map is swapped atomically under the write lock.
pub struct CrawlerRegistry {
    /// Source file, kept for reload
    path: Option<PathBuf>,

    /// Current snapshot keyed by crawler id
    entries: Arc<RwLock<HashMap<String, CrawlerConfiguration>>>,
}

impl CrawlerRegistry {
    /// Load the registry from a fleet TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let entries = Self::read_file(path)?;

        tracing::info!(
            path = %path.display(),
            crawlers = entries.len(),
            "Crawler registry loaded"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Build a registry from in-memory configurations (tests, embedding)
    pub fn from_configs(
        configs: Vec<CrawlerConfiguration>,
    ) -> Result<Self, RegistryError> {
        let entries = Self::validate(configs)?;
        Ok(Self {
            path: None,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    fn read_file(path: &Path) -> Result<HashMap<String, CrawlerConfiguration>, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|e| RegistryError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let fleet: FleetFile = toml::from_str(&raw).map_err(|e| RegistryError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::validate(fleet.crawlers)
    }

    fn validate(
        configs: Vec<CrawlerConfiguration>,
    ) -> Result<HashMap<String, CrawlerConfiguration>, RegistryError> {
        let mut entries = HashMap::with_capacity(configs.len());

        for config in configs {
            if config.id.trim().is_empty() {
                return Err(RegistryError::BlankId);
            }
            Url::parse(&config.base_url).map_err(|e| RegistryError::InvalidBaseUrl {
                id: config.id.clone(),
                reason: e.to_string(),
            })?;
            let id = config.id.clone();
            if entries.insert(id.clone(), config).is_some() {
                return Err(RegistryError::DuplicateId(id));
            }
        }

        Ok(entries)
    }

    /// Re-read the fleet file and swap in the new snapshot
    pub async fn reload(&self) -> Result<usize, RegistryError> {
        let path = self.path.as_ref().ok_or(RegistryError::NoSourceFile)?;
        let fresh = Self::read_file(path)?;
        let count = fresh.len();

        *self.entries.write().await = fresh;

        tracing::info!(crawlers = count, "Crawler registry reloaded");
        Ok(count)
    }

    /// Look up a crawler by id
    pub async fn get(&self, id: &str) -> Option<CrawlerConfiguration> {
        self.entries.read().await.get(id).cloned()
    }

    /// All configured crawlers
    pub async fn all(&self) -> Vec<CrawlerConfiguration> {
        self.entries.read().await.values().cloned().collect()
    }

    /// All enabled crawlers
    pub async fn enabled(&self) -> Vec<CrawlerConfiguration> {
        self.entries
            .read()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }

    /// Number of configured crawlers
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Fleet file could not be read
    #[error("Failed to read fleet file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// Fleet file is not valid TOML
    #[error("Failed to parse fleet file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    /// A crawler entry has a blank id
    #[error("Crawler entry has a blank id")]
    BlankId,

    /// Two entries share the same id
    #[error("Duplicate crawler id: {0}")]
    DuplicateId(String),

    /// A base URL does not parse
    #[error("Invalid base URL for crawler {id}: {reason}")]
    InvalidBaseUrl { id: String, reason: String },

    /// Reload requested on a registry built without a file
    #[error("Registry was not loaded from a file, cannot reload")]
    NoSourceFile,
}

impl From<RegistryError> for crate::error::Error {
    fn from(err: RegistryError) -> Self {
        crate::error::Error::Registry(err.to_string())
    }
}

/// In-memory configuration for unit tests across the crate
#[cfg(test)]
pub(crate) fn test_config(id: &str, base_url: &str) -> CrawlerConfiguration {
    CrawlerConfiguration {
        id: id.to_string(),
        name: format!("{id} crawler"),
        base_url: base_url.to_string(),
        health_endpoint: "/health".to_string(),
        crawl_endpoint: "/crawl".to_string(),
        status_endpoint: "/status".to_string(),
        enabled: true,
        author: AuthorMeta::default(),
    }
}

// ============================================================================
// Tests
// ============================================================================
