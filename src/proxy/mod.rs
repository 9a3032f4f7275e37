//! Crawl trigger proxy
//!
//! Forwards crawl-trigger and status requests to crawler instances,
//! consulting the configuration registry and the per-crawler circuit
//! breaker before any outbound call. Transport failures are retried with
//! a fixed delay; HTTP-level outcomes are mapped once and never retried.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::error::{Error, ErrorCategory, Result};
use crate::registry::{CrawlerConfiguration, CrawlerRegistry, RegistryError};

// ============================================================================
// Operations
// ============================================================================

/// Remote crawler operation
///
/// Outbound calls are dispatched by this enum rather than one client method
/// per crawler; the URL is resolved from the configuration at call time, so
/// adding a crawler never requires new client code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerOp {
    TriggerCrawl,
    Status,
    Health,
}

impl CrawlerOp {
    pub fn method(&self) -> reqwest::Method {
        match self {
            Self::TriggerCrawl => reqwest::Method::POST,
            Self::Status | Self::Health => reqwest::Method::GET,
        }
    }

    pub fn url(&self, config: &CrawlerConfiguration) -> std::result::Result<Url, RegistryError> {
        match self {
            Self::TriggerCrawl => config.crawl_url(),
            Self::Status => config.status_url(),
            Self::Health => config.health_url(),
        }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

/// Inbound crawl-trigger request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    /// Target crawler id
    pub crawler_id: String,

    /// Opaque parameters forwarded to the crawler as the POST body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl CrawlRequest {
    pub fn new(crawler_id: impl Into<String>) -> Self {
        Self {
            crawler_id: crawler_id.into(),
            parameters: None,
        }
    }
}

/// Outcome classification for a crawl-trigger call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlOutcome {
    /// Crawler accepted the job (HTTP 202)
    Accepted,
    /// A crawl is already running on this crawler (HTTP 409, not a fault)
    Conflict,
    /// Crawler or breaker refused the request
    ServiceUnavailable,
    /// Validation, configuration, HTTP or transport failure
    Error,
}

/// Result of a crawl-trigger call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResponse {
    pub status: CrawlOutcome,
    pub crawler_id: String,
    pub request_id: String,
    pub message: String,

    /// Crawler-assigned crawl identifier, present on ACCEPTED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_id: Option<String>,

    /// Status-poll URL for the accepted crawl
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,

    /// Failure category, present on ERROR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
}

impl CrawlResponse {
    fn new(status: CrawlOutcome, crawler_id: &str, request_id: &str, message: String) -> Self {
        Self {
            status,
            crawler_id: crawler_id.to_string(),
            request_id: request_id.to_string(),
            message,
            crawl_id: None,
            status_url: None,
            error_category: None,
        }
    }

    fn error(crawler_id: &str, request_id: &str, category: ErrorCategory, message: String) -> Self {
        let mut response = Self::new(CrawlOutcome::Error, crawler_id, request_id, message);
        response.error_category = Some(category.as_str().to_string());
        response
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Retry and timeout policy for outbound crawl triggers
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    /// Attempts per trigger, transport failures only
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Per-attempt request timeout
    pub request_timeout: Duration,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Proxies crawl-trigger and status calls to crawler instances
pub struct CrawlerProxyService {
    registry: Arc<CrawlerRegistry>,
    breaker: Arc<CircuitBreaker>,
    client: reqwest::Client,
    policy: ProxyPolicy,
}

impl CrawlerProxyService {
    pub fn new(registry: Arc<CrawlerRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_policy(registry, breaker, ProxyPolicy::default())
    }

    pub fn with_policy(
        registry: Arc<CrawlerRegistry>,
        breaker: Arc<CircuitBreaker>,
        policy: ProxyPolicy,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            registry,
            breaker,
            client,
            policy,
        }
    }

    /// Trigger a crawl on the requested crawler
    ///
    /// Never returns `Err`; every failure mode is folded into the response
    /// so callers get a uniform shape to report.
    pub async fn trigger_crawl(&self, request: &CrawlRequest) -> CrawlResponse {
        let request_id = Uuid::new_v4().to_string();
        let crawler_id = request.crawler_id.trim();

        if crawler_id.is_empty() {
            return CrawlResponse::error(
                &request.crawler_id,
                &request_id,
                ErrorCategory::Validation,
                "crawler id must not be blank".to_string(),
            );
        }

        let config = match self.registry.get(crawler_id).await {
            Some(config) => config,
            None => {
                return CrawlResponse::error(
                    crawler_id,
                    &request_id,
                    ErrorCategory::Configuration,
                    format!("no configuration for crawler '{crawler_id}'"),
                );
            }
        };

        if !config.enabled {
            return CrawlResponse::error(
                crawler_id,
                &request_id,
                ErrorCategory::Configuration,
                format!("crawler '{crawler_id}' is disabled"),
            );
        }

        if !self.breaker.allow_request(crawler_id).await {
            tracing::warn!(crawler_id, "Circuit breaker open, refusing crawl trigger");
            crate::telemetry::record_crawl_request(crawler_id, "breaker_open");
            return CrawlResponse::new(
                CrawlOutcome::ServiceUnavailable,
                crawler_id,
                &request_id,
                "circuit breaker is open".to_string(),
            );
        }

        let response = self.execute_with_retry(&config, request, &request_id).await;
        let outcome = match response.status {
            CrawlOutcome::Accepted => "accepted",
            CrawlOutcome::Conflict => "conflict",
            CrawlOutcome::ServiceUnavailable => "unavailable",
            CrawlOutcome::Error => "error",
        };
        crate::telemetry::record_crawl_request(crawler_id, outcome);
        response
    }

    /// Build and send one outbound request for an operation
    ///
    /// The URL comes from the target's configuration, never from a
    /// per-crawler code path.
    async fn invoke(
        &self,
        config: &CrawlerConfiguration,
        op: CrawlerOp,
        payload: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = op
            .url(config)
            .map_err(|e| Error::Registry(format!("invalid {op:?} endpoint for '{}': {e}", config.id)))?;

        let mut builder = self
            .client
            .request(op.method(), url)
            .timeout(self.policy.request_timeout);
        if let Some(payload) = payload {
            builder = builder.json(payload);
        }
        Ok(builder.send().await?)
    }

    async fn execute_with_retry(
        &self,
        config: &CrawlerConfiguration,
        request: &CrawlRequest,
        request_id: &str,
    ) -> CrawlResponse {
        let crawler_id = &config.id;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.policy.max_attempts {
            match self
                .invoke(config, CrawlerOp::TriggerCrawl, request.parameters.as_ref())
                .await
            {
                Ok(response) => {
                    return self
                        .map_http_response(config, request_id, response)
                        .await;
                }
                // URL resolution failure: a configuration fault, never retried
                Err(error @ Error::Registry(_)) => {
                    return CrawlResponse::error(
                        crawler_id,
                        request_id,
                        error.category(),
                        error.to_string(),
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        crawler_id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %error,
                        "Crawl trigger attempt failed"
                    );
                    last_error = Some(error);

                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        self.breaker.record_failure(crawler_id).await;
        let error = last_error.unwrap_or_else(|| Error::Internal("no attempts made".to_string()));
        CrawlResponse::error(
            crawler_id,
            request_id,
            error.category(),
            format!(
                "crawl trigger failed after {} attempts: {error}",
                self.policy.max_attempts
            ),
        )
    }

    async fn map_http_response(
        &self,
        config: &CrawlerConfiguration,
        request_id: &str,
        response: reqwest::Response,
    ) -> CrawlResponse {
        let crawler_id = &config.id;
        let status = response.status();

        match status.as_u16() {
            202 => {
                self.breaker.record_success(crawler_id).await;
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let crawl_id = extract_crawl_id(&body);
                let status_url = config.status_url().ok().map(|u| u.to_string());

                tracing::info!(crawler_id, ?crawl_id, "Crawl accepted");
                let mut accepted = CrawlResponse::new(
                    CrawlOutcome::Accepted,
                    crawler_id,
                    request_id,
                    "crawl accepted".to_string(),
                );
                accepted.crawl_id = crawl_id;
                accepted.status_url = status_url;
                accepted
            }
            // An already-running crawl is an expected outcome, not a fault
            409 => {
                tracing::info!(crawler_id, "Crawl already in progress");
                CrawlResponse::new(
                    CrawlOutcome::Conflict,
                    crawler_id,
                    request_id,
                    "a crawl is already running on this crawler".to_string(),
                )
            }
            503 => {
                self.breaker.record_failure(crawler_id).await;
                CrawlResponse::new(
                    CrawlOutcome::ServiceUnavailable,
                    crawler_id,
                    request_id,
                    "crawler reported service unavailable".to_string(),
                )
            }
            code => {
                self.breaker.record_failure(crawler_id).await;
                let message = extract_error_message(response).await;
                tracing::warn!(crawler_id, code, message, "Crawl trigger rejected");
                CrawlResponse::error(
                    crawler_id,
                    request_id,
                    ErrorCategory::Http,
                    format!("crawler returned HTTP {code}: {message}"),
                )
            }
        }
    }

    /// Fetch a crawler's current run status
    ///
    /// No retry and no circuit breaker interaction: status polling must
    /// never trip the breaker on behalf of the trigger path.
    pub async fn get_crawler_status(&self, crawler_id: &str) -> Result<Value> {
        let config = self
            .registry
            .get(crawler_id)
            .await
            .ok_or_else(|| Error::UnknownCrawler(crawler_id.to_string()))?;

        let response = self.invoke(&config, CrawlerOp::Status, None).await?;

        let status = response.status();
        if !status.is_success() {
            let message = extract_error_message(response).await;
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

/// Pull the crawl identifier out of an acceptance body
fn extract_crawl_id(body: &Value) -> Option<String> {
    for key in ["crawlId", "crawl_id", "id"] {
        match body.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Best-effort error message from a failed response body
async fn extract_error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        return "no response body".to_string();
    }
    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        for key in ["message", "error", "detail"] {
            if let Some(Value::String(s)) = value.get(key) {
                if !s.is_empty() {
                    return s.clone();
                }
            }
        }
    }
    body.chars().take(200).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&CrawlOutcome::Accepted).unwrap(),
            "\"ACCEPTED\""
        );
        assert_eq!(
            serde_json::to_string(&CrawlOutcome::ServiceUnavailable).unwrap(),
            "\"SERVICE_UNAVAILABLE\""
        );
    }

    #[test]
    fn test_op_dispatch() {
        let config = crate::registry::test_config("alpha", "http://localhost:9001");

        assert_eq!(CrawlerOp::TriggerCrawl.method(), reqwest::Method::POST);
        assert_eq!(CrawlerOp::Status.method(), reqwest::Method::GET);
        assert_eq!(
            CrawlerOp::TriggerCrawl.url(&config).unwrap().path(),
            "/crawl"
        );
        assert_eq!(CrawlerOp::Status.url(&config).unwrap().path(), "/status");
        assert_eq!(CrawlerOp::Health.url(&config).unwrap().path(), "/health");
    }

    #[test]
    fn test_extract_crawl_id_variants() {
        let camel = serde_json::json!({ "crawlId": "c-1" });
        let snake = serde_json::json!({ "crawl_id": "c-2" });
        let numeric = serde_json::json!({ "id": 42 });
        let missing = serde_json::json!({ "status": "accepted" });

        assert_eq!(extract_crawl_id(&camel).as_deref(), Some("c-1"));
        assert_eq!(extract_crawl_id(&snake).as_deref(), Some("c-2"));
        assert_eq!(extract_crawl_id(&numeric).as_deref(), Some("42"));
        assert_eq!(extract_crawl_id(&missing), None);
    }

    #[test]
    fn test_error_response_carries_category() {
        let response = CrawlResponse::error(
            "alpha",
            "req-1",
            ErrorCategory::Validation,
            "crawler id must not be blank".to_string(),
        );
        assert_eq!(response.status, CrawlOutcome::Error);
        assert_eq!(response.error_category.as_deref(), Some("validation"));
        assert!(response.crawl_id.is_none());
    }

    #[test]
    fn test_response_json_shape() {
        let mut response = CrawlResponse::new(
            CrawlOutcome::Accepted,
            "alpha",
            "req-1",
            "crawl accepted".to_string(),
        );
        response.crawl_id = Some("c-9".to_string());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ACCEPTED");
        assert_eq!(json["crawlerId"], "alpha");
        assert_eq!(json["crawlId"], "c-9");
        assert!(json.get("errorCategory").is_none());
    }
}
