//! In-process status bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`StatusEvent`]s to every subscriber. It is shared
//! via `Arc<EventBus>` between the engine and its executions. Publishing is a
//! plain synchronous call, so execution threads never need a runtime.

use chrono::{DateTime, Utc};
use eashell_core::execution::ExecutionState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// A script execution entered a new state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub script_name: String,
    /// Run id of the execution, distinguishing successive runs of one script.
    pub execution_id: Uuid,
    pub state: ExecutionState,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(script_name: impl Into<String>, execution_id: Uuid, state: ExecutionState) -> Self {
        Self {
            script_name: script_name.into(),
            execution_id,
            state,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out bus for [`StatusEvent`]s.
///
/// # Usage
///
/// ```rust
/// use eashell_core::execution::ExecutionState;
/// use eashell_events::bus::{EventBus, StatusEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(StatusEvent::new("build", uuid::Uuid::now_v7(), ExecutionState::Running));
/// assert_eq!(rx.try_recv().unwrap().state, ExecutionState::Running);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unread events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: StatusEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::now_v7();

        bus.publish(StatusEvent::new("build", id, ExecutionState::Succeeded));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.script_name, "build");
        assert_eq!(received.execution_id, id);
        assert_eq!(received.state, ExecutionState::Succeeded);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(StatusEvent::new("deploy", Uuid::now_v7(), ExecutionState::Running));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1, e2);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(StatusEvent::new("orphan", Uuid::now_v7(), ExecutionState::Failed));
    }

    #[test]
    fn event_serializes_state_as_snake_case() {
        let event = StatusEvent::new("build", Uuid::now_v7(), ExecutionState::Terminated);
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["script_name"], "build");
        assert_eq!(value["state"], "terminated");
        assert!(value["timestamp"].is_string());
    }
}
