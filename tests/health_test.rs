//! Integration tests for the health monitor using wiremock
//!
//! These tests validate probe outcome handling, circuit breaker coupling
//! and the two-tier status cache against mock crawler instances.

use std::sync::Arc;
use std::time::Duration;

use armada::breaker::{CircuitBreaker, CircuitState};
use armada::cache::{MemoryCache, OptionalCache};
use armada::events::{EventBus, FleetEvent};
use armada::health::{HealthMonitorService, HealthPolicy, HealthState};
use armada::registry::{AuthorMeta, CrawlerConfiguration, CrawlerRegistry};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn crawler_config(id: &str, base_url: &str) -> CrawlerConfiguration {
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

fn fast_policy() -> HealthPolicy {
    HealthPolicy {
        check_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_secs(2),
        batch_timeout: Duration::from_secs(5),
        cache_ttl: Duration::from_secs(60),
    }
}

struct Harness {
    service: HealthMonitorService,
    breaker: Arc<CircuitBreaker>,
    events: Arc<EventBus>,
}

fn harness(configs: Vec<CrawlerConfiguration>, cache: OptionalCache) -> Harness {
    let registry = Arc::new(CrawlerRegistry::from_configs(configs).unwrap());
    let breaker = Arc::new(CircuitBreaker::new());
    let events = Arc::new(EventBus::new());
    let service = HealthMonitorService::with_policy(
        registry,
        breaker.clone(),
        cache,
        events.clone(),
        fast_policy(),
    );
    Harness {
        service,
        breaker,
        events,
    }
}

/// A 200 probe yields HEALTHY with a measured round trip and breaker success
#[tokio::test]
async fn test_healthy_probe() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = crawler_config("alpha", &mock_server.uri());
    let h = harness(vec![config.clone()], OptionalCache::disabled());

    let status = h.service.perform_health_check(&config).await;

    assert_eq!(status.status, HealthState::Healthy);
    assert!(status.response_time_ms.is_some());
    assert_eq!(h.breaker.failure_count("alpha").await, 0);
}

/// A non-200 probe yields UNHEALTHY and a breaker failure
#[tokio::test]
async fn test_unhealthy_probe() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = crawler_config("alpha", &mock_server.uri());
    let h = harness(vec![config.clone()], OptionalCache::disabled());

    let status = h.service.perform_health_check(&config).await;

    assert_eq!(status.status, HealthState::Unhealthy);
    assert!(status.message.as_deref().unwrap().contains("HTTP 500"));
    assert_eq!(h.breaker.failure_count("alpha").await, 1);
}

/// Repeated probe failures open the circuit and subsequent probes skip I/O
#[tokio::test]
async fn test_failures_open_circuit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = crawler_config("alpha", &mock_server.uri());
    let h = harness(vec![config.clone()], OptionalCache::disabled());

    for _ in 0..3 {
        h.service.perform_health_check(&config).await;
    }
    assert_eq!(h.breaker.state("alpha").await, CircuitState::Open);

    // Fourth check never reaches the mock (expect(3) above verifies that)
    let status = h.service.perform_health_check(&config).await;
    assert_eq!(status.status, HealthState::Unhealthy);
    assert_eq!(status.message.as_deref(), Some("circuit breaker is open"));
}

/// A forced check resets an open circuit and probes immediately
#[tokio::test]
async fn test_force_check_resets_breaker() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = crawler_config("alpha", &mock_server.uri());
    let h = harness(vec![config], OptionalCache::disabled());

    for _ in 0..3 {
        h.breaker.record_failure("alpha").await;
    }
    assert_eq!(h.breaker.state("alpha").await, CircuitState::Open);

    let status = h.service.force_health_check("alpha").await;

    assert_eq!(status.status, HealthState::Healthy);
    assert_eq!(h.breaker.state("alpha").await, CircuitState::Closed);
    assert_eq!(h.breaker.failure_count("alpha").await, 0);
}

/// A full cycle probes every enabled crawler and caches the results
#[tokio::test]
async fn test_cycle_populates_cache() {
    let healthy_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy_server)
        .await;

    let configs = vec![
        crawler_config("alpha", &healthy_server.uri()),
        // Nothing listens on this port
        crawler_config("beta", "http://127.0.0.1:9"),
    ];
    let h = harness(configs, OptionalCache::disabled());

    h.service.run_cycle().await;

    let all = h.service.get_all_crawler_health().await;
    assert_eq!(all["alpha"].status, HealthState::Healthy);
    assert_eq!(all["beta"].status, HealthState::Unhealthy);
}

/// Status transitions are broadcast; repeats are cached silently
#[tokio::test]
async fn test_transition_broadcast() {
    let mock_server = MockServer::start().await;

    // Healthy twice, then failing
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let h = harness(
        vec![crawler_config("alpha", &mock_server.uri())],
        OptionalCache::disabled(),
    );
    let mut subscription = h.events.subscribe().await;

    h.service.run_cycle().await;
    h.service.run_cycle().await;
    h.service.run_cycle().await;

    let first = subscription.receiver.try_recv().unwrap();
    let second = subscription.receiver.try_recv().unwrap();
    assert!(subscription.receiver.try_recv().is_err());

    match (first, second) {
        (FleetEvent::HealthChanged(a), FleetEvent::HealthChanged(b)) => {
            assert_eq!(a.status, HealthState::Healthy);
            assert_eq!(b.status, HealthState::Unhealthy);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

/// The shared cache tier answers when the in-process map is cold
#[tokio::test]
async fn test_shared_cache_fallback() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let shared = OptionalCache::new(Arc::new(MemoryCache::new()));
    let config = crawler_config("alpha", &mock_server.uri());

    // First instance probes and writes through to the shared tier
    let writer = harness(vec![config.clone()], shared.clone());
    writer.service.run_cycle().await;

    // Second instance has a cold local map but the same shared tier
    let reader = harness(vec![config], shared);
    let status = reader.service.get_crawler_health("alpha").await;
    assert_eq!(status.status, HealthState::Healthy);
}
