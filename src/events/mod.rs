//! Real-time fleet event broadcasting
//!
//! The [`EventBus`] is the in-process boundary between the orchestration
//! core and whatever transport pushes updates to subscribers. Broadcasting
//! is fire-and-forget: a send never blocks the emitting service, and a
//! subscriber whose channel has closed is pruned on the next broadcast.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::health::HealthStatus;
use crate::jobs::JobRecord;
use crate::metrics::CrawlerMetrics;

// ============================================================================
// Events
// ============================================================================

/// State-change events emitted by the orchestration core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A crawler's health status changed since the last probe
    HealthChanged(HealthStatus),

    /// A new crawl job entered RUNNING
    JobStarted(JobRecord),

    /// Progress counters updated on a running job
    JobProgress(JobRecord),

    /// A job reached COMPLETED
    JobCompleted(JobRecord),

    /// A job reached FAILED or CANCELLED
    JobFailed(JobRecord),

    /// Scheduled aggregation refreshed a crawler's metrics
    MetricsUpdated(CrawlerMetrics),
}

impl FleetEvent {
    /// Short event name for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HealthChanged(_) => "health_changed",
            Self::JobStarted(_) => "job_started",
            Self::JobProgress(_) => "job_progress",
            Self::JobCompleted(_) => "job_completed",
            Self::JobFailed(_) => "job_failed",
            Self::MetricsUpdated(_) => "metrics_updated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Handle identifying one subscriber
pub type SubscriberId = u64;

/// A live subscription to fleet events
pub struct Subscription {
    /// Identifier usable with [`EventBus::unsubscribe`]
    pub id: SubscriberId,

    /// Receiving end of the event stream
    pub receiver: mpsc::UnboundedReceiver<FleetEvent>,
}

/// Broadcast hub over a concurrent set of subscriber channels
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriberId, mpsc::UnboundedSender<FleetEvent>)>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers.write().await.push((id, tx));
        tracing::debug!(subscriber_id = id, "Event subscriber connected");

        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber explicitly (disconnect hook)
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        if subscribers.len() < before {
            tracing::debug!(subscriber_id = id, "Event subscriber disconnected");
        }
    }

    /// Broadcast an event to all live subscribers
    ///
    /// Subscribers whose receiving end has been dropped are pruned here
    /// rather than eagerly; the send itself never blocks or fails the
    /// triggering operation.
    pub async fn broadcast(&self, event: FleetEvent) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.is_empty() {
            return;
        }

        let kind = event.kind();
        let before = subscribers.len();
        subscribers.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(subscriber_id = id, "Pruning closed event subscriber");
            }
            alive
        });

        tracing::trace!(
            event = kind,
            delivered = subscribers.len(),
            pruned = before - subscribers.len(),
            "Broadcast fleet event"
        );
    }

    /// Number of currently registered subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthState, HealthStatus};

    fn health_event(id: &str) -> FleetEvent {
        FleetEvent::HealthChanged(HealthStatus::healthy(id, 12))
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(health_event("alpha").kind(), "health_changed");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe().await;

        bus.broadcast(health_event("alpha")).await;

        let event = sub.receiver.recv().await.unwrap();
        match event {
            FleetEvent::HealthChanged(status) => {
                assert_eq!(status.crawler_id, "alpha");
                assert_eq!(status.status, HealthState::Healthy);
            }
            other => panic!("unexpected event: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned_on_next_send() {
        let bus = EventBus::new();
        let sub = bus.subscribe().await;
        let _keep = bus.subscribe().await;
        assert_eq!(bus.subscriber_count().await, 2);

        drop(sub.receiver);
        // Still registered until the next broadcast touches it
        assert_eq!(bus.subscriber_count().await, 2);

        bus.broadcast(health_event("alpha")).await;
        assert_eq!(bus.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let sub = bus.subscribe().await;

        bus.unsubscribe(sub.id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.broadcast(health_event("alpha")).await;
    }
}
