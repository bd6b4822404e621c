use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ActionResultCode, TabId, TaskId, TaskState, Timestamp};

/// Domain events emitted by the task and engine layers.
///
/// Consumed by whoever drives tasks (to learn when a task was resumed and
/// needs fresh context), by UIs, and by tests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DomainEvent {
    /// A task was registered and received its id.
    TaskCreated {
        task_id: TaskId,
        tab: Option<TabId>,
        timestamp: Timestamp,
    },

    /// A task moved between lifecycle states.
    TaskStateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        timestamp: Timestamp,
    },

    /// A paused task was resumed; the driver must supply fresh context before
    /// issuing further actions.
    TaskResumed { task_id: TaskId, timestamp: Timestamp },

    /// The engine accepted a batch.
    BatchStarted {
        task_id: TaskId,
        action_count: usize,
        timestamp: Timestamp,
    },

    /// The engine finished a batch (successfully or not).
    BatchCompleted {
        task_id: TaskId,
        result: ActionResultCode,
        actions_completed: usize,
        timestamp: Timestamp,
    },
}

/// Broadcast channel for [`DomainEvent`]s.
///
/// Publishing never fails: with no subscribers the event is dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Domain event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
