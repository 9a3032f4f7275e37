//! Per-crawler circuit breaker
//!
//! Each crawler id owns an independent CLOSED / OPEN / HALF_OPEN state
//! machine protecting the fleet from hammering an unhealthy instance. The
//! breaker is shared between the proxy's request path and the health
//! monitor's background path; every mutation happens under the write lock so
//! concurrent callers observe consistent per-key transitions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

// ============================================================================
// State
// ============================================================================

/// Circuit state for a single crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are denied until the open timeout elapses
    Open,
    /// A probe request is allowed to test recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-crawler breaker bookkeeping
#[derive(Debug, Clone)]
struct CircuitEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_success: None,
        }
    }
}

/// Read-only view of a crawler's breaker state for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub crawler_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Seconds since the last recorded failure, if any
    pub last_failure_age_secs: Option<u64>,
    /// Seconds since the last recorded success, if any
    pub last_success_age_secs: Option<u64>,
}

// ============================================================================
// Policy
// ============================================================================

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    /// Consecutive failures before a CLOSED circuit opens
    pub failure_threshold: u32,

    /// How long an OPEN circuit stays open before allowing a probe
    pub open_timeout: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Per-key circuit breaker over crawler ids
///
/// Entries are created lazily on first reference and live for the process
/// lifetime. Unknown ids always read as CLOSED with zero failures.
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    entries: RwLock<HashMap<String, CircuitEntry>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Create a breaker with the default policy (threshold 3, 1 minute open)
    pub fn new() -> Self {
        Self::with_policy(BreakerPolicy::default())
    }

    /// Create a breaker with a custom policy
    pub fn with_policy(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether a request to this crawler may proceed
    ///
    /// An OPEN circuit whose timeout has elapsed transitions to HALF_OPEN and
    /// admits the caller as a probe. HALF_OPEN admits callers without
    /// serializing concurrent probes; the first recorded outcome settles the
    /// state.
    pub async fn allow_request(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(CircuitEntry::new);

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = entry
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.policy.open_timeout {
                    entry.state = CircuitState::HalfOpen;
                    tracing::info!(crawler_id = %id, "Circuit breaker half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call: reset failures and close the circuit
    pub async fn record_success(&self, id: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(CircuitEntry::new);

        entry.failure_count = 0;
        entry.last_success = Some(Instant::now());

        if entry.state != CircuitState::Closed {
            tracing::info!(
                crawler_id = %id,
                from = %entry.state,
                "Circuit breaker closed after success"
            );
            entry.state = CircuitState::Closed;
        }

        crate::telemetry::set_breaker_state(id, entry.state);
    }

    /// Record a failed call
    ///
    /// A failed HALF_OPEN probe reopens the circuit immediately; a CLOSED
    /// circuit opens once the consecutive failure count reaches the
    /// threshold.
    pub async fn record_failure(&self, id: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(CircuitEntry::new);

        entry.last_failure = Some(Instant::now());
        entry.failure_count = entry.failure_count.saturating_add(1);

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                tracing::warn!(crawler_id = %id, "Circuit breaker reopened after failed probe");
            }
            CircuitState::Closed if entry.failure_count >= self.policy.failure_threshold => {
                entry.state = CircuitState::Open;
                tracing::warn!(
                    crawler_id = %id,
                    failures = entry.failure_count,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }

        crate::telemetry::set_breaker_state(id, entry.state);
    }

    /// Current state for a crawler; unknown ids read as CLOSED
    pub async fn state(&self, id: &str) -> CircuitState {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Current consecutive failure count; unknown ids read as zero
    pub async fn failure_count(&self, id: &str) -> u32 {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.failure_count)
            .unwrap_or(0)
    }

    /// Force a crawler's circuit back to CLOSED
    pub async fn reset(&self, id: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(CircuitEntry::new);

        entry.state = CircuitState::Closed;
        entry.failure_count = 0;
        entry.last_success = Some(Instant::now());

        tracing::info!(crawler_id = %id, "Circuit breaker reset");
        crate::telemetry::set_breaker_state(id, entry.state);
    }

    /// Diagnostic snapshot for a crawler
    pub async fn snapshot(&self, id: &str) -> CircuitSnapshot {
        let entries = self.entries.read().await;
        let entry = entries.get(id).cloned().unwrap_or_else(CircuitEntry::new);

        CircuitSnapshot {
            crawler_id: id.to_string(),
            state: entry.state,
            failure_count: entry.failure_count,
            last_failure_age_secs: entry.last_failure.map(|t| t.elapsed().as_secs()),
            last_success_age_secs: entry.last_success.map(|t| t.elapsed().as_secs()),
        }
    }

    /// Drop all tracked entries
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
