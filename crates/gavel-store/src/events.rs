//! # Lifecycle Events
//!
//! Publish/subscribe gateway for approval lifecycle events. Consumers such
//! as notification and audit services live outside the engine and are
//! reached through an [`EventSink`].
//!
//! Delivery is best-effort and decoupled from the state machine: a state
//! transition is durably committed before its event is published, and a
//! failed publish is retried in the background by [`EventPublisher`]
//! without ever rolling the transition back.
//!
//! ## Ordering
//!
//! Events for one request are published in commit order while the
//! request's lock is held. A retried event may arrive after later events
//! for the same request; consumers order by `(step_index,
//! escalation_level)`, which every event carries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::error::PublishError;

/// Lifecycle topic of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A request is waiting on a step.
    Pending,
    /// A step deadline elapsed and the request moved on.
    Escalated,
    /// The request reached a terminal status.
    Completed,
}

impl EventKind {
    /// Topic name.
    pub fn topic(&self) -> &'static str {
        match self {
            EventKind::Pending => "pending",
            EventKind::Escalated => "escalated",
            EventKind::Completed => "completed",
        }
    }
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Topic.
    pub kind: EventKind,
    /// The request the event is about.
    pub request_id: String,
    /// Chain id for approval requests, item id for deliberation items.
    pub subject_id: String,
    /// Status of the request after the transition, in its wire form.
    pub status: String,
    /// Owning tenant.
    pub tenant: String,
    /// Current step index.
    pub step_index: usize,
    /// Current escalation level.
    pub escalation_level: u32,
    /// When the transition was committed.
    pub timestamp: DateTime<Utc>,
}

/// Destination for lifecycle events.
pub trait EventSink: Send + Sync {
    /// Hands one event to the transport. Must not block on subscribers.
    fn publish(&self, event: &LifecycleEvent) -> Result<(), PublishError>;
}

/// In-process event bus backed by a tokio broadcast channel.
///
/// Having no subscribers is not a failure: events are simply dropped.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastBus {
    /// Creates a bus retaining up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to every subsequent event.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for BroadcastBus {
    fn publish(&self, event: &LifecycleEvent) -> Result<(), PublishError> {
        match self.sender.send(event.clone()) {
            Ok(receivers) => {
                debug!(
                    topic = event.kind.topic(),
                    request_id = %event.request_id,
                    receivers,
                    "event published"
                );
            }
            Err(_) => {
                debug!(
                    topic = event.kind.topic(),
                    request_id = %event.request_id,
                    "event dropped, no subscribers"
                );
            }
        }
        Ok(())
    }
}

/// Backoff policy for failed publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the inline one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

/// Publishes events without letting delivery failures reach the caller.
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
}

impl EventPublisher {
    /// Wraps a sink with the default retry policy.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_policy(sink, RetryPolicy::default())
    }

    /// Wraps a sink with a custom retry policy.
    pub fn with_policy(sink: Arc<dyn EventSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Publishes an event.
    ///
    /// The first attempt happens inline. On failure the event is handed to
    /// a background task that retries with exponential backoff; the caller
    /// is never blocked or failed.
    pub fn publish(&self, event: LifecycleEvent) {
        let err = match self.sink.publish(&event) {
            Ok(()) => return,
            Err(err) => err,
        };

        warn!(
            topic = event.kind.topic(),
            request_id = %event.request_id,
            error = %err,
            "event publish failed, scheduling retry"
        );

        if self.policy.max_attempts <= 1 {
            error!(request_id = %event.request_id, "event dropped after 1 attempt");
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!(
                    request_id = %event.request_id,
                    "no runtime available for event retry, event dropped"
                );
                return;
            }
        };

        let sink = Arc::clone(&self.sink);
        let policy = self.policy;
        handle.spawn(async move {
            retry_publish(sink, policy, event).await;
        });
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("policy", &self.policy)
            .finish()
    }
}

async fn retry_publish(sink: Arc<dyn EventSink>, policy: RetryPolicy, event: LifecycleEvent) {
    for retry in 1..policy.max_attempts {
        tokio::time::sleep(policy.delay_for(retry)).await;
        match sink.publish(&event) {
            Ok(()) => {
                debug!(request_id = %event.request_id, retry, "event delivered on retry");
                return;
            }
            Err(err) => {
                warn!(request_id = %event.request_id, retry, error = %err, "event retry failed");
            }
        }
    }
    error!(
        topic = event.kind.topic(),
        request_id = %event.request_id,
        attempts = policy.max_attempts,
        "event dropped after exhausting retries"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn event(kind: EventKind) -> LifecycleEvent {
        LifecycleEvent {
            kind,
            request_id: "req-1".to_string(),
            subject_id: "standard".to_string(),
            status: "pending".to_string(),
            tenant: "acme".to_string(),
            step_index: 0,
            escalation_level: 0,
            timestamp: Utc::now(),
        }
    }

    /// Fails the first `failures` publishes, then records events.
    struct FlakySink {
        failures: AtomicU32,
        delivered: Mutex<Vec<LifecycleEvent>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSink for FlakySink {
        fn publish(&self, event: &LifecycleEvent) -> Result<(), PublishError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PublishError("sink offline".to_string()));
            }
            self.delivered.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_event_kind_topics() {
        assert_eq!(EventKind::Pending.topic(), "pending");
        assert_eq!(EventKind::Escalated.topic(), "escalated");
        assert_eq!(EventKind::Completed.topic(), "completed");
    }

    #[test]
    fn test_event_serialization_uses_snake_case_kind() {
        let json = serde_json::to_string(&event(EventKind::Escalated)).unwrap();
        assert!(json.contains("\"escalated\""));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_broadcast_bus_delivers_to_subscriber() {
        let bus = BroadcastBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(&event(EventKind::Pending)).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::Pending);
        assert_eq!(received.request_id, "req-1");
    }

    #[test]
    fn test_broadcast_bus_without_subscribers_is_ok() {
        let bus = BroadcastBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.publish(&event(EventKind::Completed)).is_ok());
    }

    #[tokio::test]
    async fn test_publisher_inline_success() {
        let sink = Arc::new(FlakySink::new(0));
        let publisher = EventPublisher::new(sink.clone());

        publisher.publish(event(EventKind::Pending));

        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_retries_in_background() {
        let sink = Arc::new(FlakySink::new(2));
        let publisher =
            EventPublisher::with_policy(sink.clone(), RetryPolicy::new(5, Duration::from_millis(50)));

        publisher.publish(event(EventKind::Completed));
        assert!(sink.delivered.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_gives_up_after_max_attempts() {
        let sink = Arc::new(FlakySink::new(10));
        let publisher =
            EventPublisher::with_policy(sink.clone(), RetryPolicy::new(3, Duration::from_millis(10)));

        publisher.publish(event(EventKind::Escalated));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(sink.delivered.lock().unwrap().is_empty());
        // one inline attempt plus two retries
        assert_eq!(sink.failures.load(Ordering::SeqCst), 7);
    }
}
