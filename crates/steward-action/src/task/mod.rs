//! Task lifecycle management.
//!
//! A [`Task`] owns exactly one [`ExecutionEngine`] and tracks the coarse
//! lifecycle state the engine and the client drive it through.

pub mod state_machine;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use steward_core::{ActionResultCode, DomainEvent, EventBus, TabId, TaskId, TaskState, Timestamp};

use crate::collaborator::Collaborators;
use crate::engine::{ActCallback, ExecutionEngine};
use crate::error::TaskError;
use crate::task::state_machine::validate_transition;
use crate::types::{ActionBatch, ObservedContent, TaskSummary};

/// Identity and lifecycle state shared between a task and its engine.
///
/// The engine holds an `Arc` to this rather than to the task itself, so the
/// handle stays valid for as long as any in-flight batch needs it.
pub struct TaskLifecycle {
    id: OnceLock<TaskId>,
    state: Mutex<TaskState>,
    events: EventBus,
}

impl TaskLifecycle {
    pub fn new(events: EventBus) -> Self {
        Self {
            id: OnceLock::new(),
            state: Mutex::new(TaskState::Created),
            events,
        }
    }

    /// The task's id, or [`TaskId::UNASSIGNED`] before registration.
    pub fn id(&self) -> TaskId {
        self.id.get().copied().unwrap_or(TaskId::UNASSIGNED)
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Assign the id. Only the first call has any effect.
    pub(crate) fn assign_id(&self, id: TaskId) -> bool {
        self.id.set(id).is_ok()
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if the state machine allows it.
    pub(crate) fn transition(&self, to: TaskState) -> Result<TaskState, TaskError> {
        let state = self.lock_state();
        let from = *state;
        self.apply(state, to).map(|()| from)
    }

    /// Move to `to` only if the current state satisfies `expected`. The check
    /// and the change happen under one lock. Returns whether the state moved.
    pub(crate) fn transition_if(
        &self,
        expected: impl FnOnce(TaskState) -> bool,
        to: TaskState,
    ) -> Result<bool, TaskError> {
        let state = self.lock_state();
        if !expected(*state) {
            return Ok(false);
        }
        self.apply(state, to).map(|()| true)
    }

    fn apply(&self, mut state: MutexGuard<'_, TaskState>, to: TaskState) -> Result<(), TaskError> {
        let from = *state;
        validate_transition(from, to)?;
        *state = to;
        drop(state);

        tracing::debug!(task_id = %self.id(), %from, %to, "Task state changed");
        self.events.publish(DomainEvent::TaskStateChanged {
            task_id: self.id(),
            from,
            to,
            timestamp: Timestamp::now(),
        });
        Ok(())
    }

    /// A batch was accepted. Called with the engine lock held.
    pub(crate) fn begin_acting(&self) {
        let result = self.transition_if(
            |s| matches!(s, TaskState::Created | TaskState::Reflecting),
            TaskState::Acting,
        );
        if let Err(e) = result {
            tracing::warn!(task_id = %self.id(), error = %e, "Failed to start acting");
        }
    }

    /// A batch ended. Only an acting task starts reflecting; a paused or
    /// finished task keeps its state. Called with the engine lock held.
    pub(crate) fn end_acting(&self) {
        let result = self.transition_if(|s| s == TaskState::Acting, TaskState::Reflecting);
        if let Err(e) = result {
            tracing::warn!(task_id = %self.id(), error = %e, "Failed to start reflecting");
        }
    }

    pub(crate) fn on_batch_started(&self, action_count: usize) {
        self.events.publish(DomainEvent::BatchStarted {
            task_id: self.id(),
            action_count,
            timestamp: Timestamp::now(),
        });
    }

    pub(crate) fn on_batch_finished(&self, result: ActionResultCode, actions_completed: usize) {
        self.events.publish(DomainEvent::BatchCompleted {
            task_id: self.id(),
            result,
            actions_completed,
            timestamp: Timestamp::now(),
        });
    }
}

/// A long-lived automation session owning one execution engine.
pub struct Task {
    lifecycle: Arc<TaskLifecycle>,
    engine: ExecutionEngine,
    title: String,
    bound_tab: Option<TabId>,
    created_at: Timestamp,
}

impl Task {
    /// Build an unregistered task bound to `tab`.
    ///
    /// The task has no id until [`TaskRegistry::add_task`](crate::registry::TaskRegistry::add_task).
    pub fn new(
        title: impl Into<String>,
        tab: Option<TabId>,
        collaborators: Collaborators,
        events: EventBus,
    ) -> Self {
        let lifecycle = Arc::new(TaskLifecycle::new(events));
        let engine = ExecutionEngine::new(Arc::clone(&lifecycle), collaborators, tab);
        Self {
            lifecycle,
            engine,
            title: title.into(),
            bound_tab: tab,
            created_at: Timestamp::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.lifecycle.id()
    }

    pub fn state(&self) -> TaskState {
        self.lifecycle.state()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub(crate) fn assign_id(&self, id: TaskId) {
        if self.lifecycle.assign_id(id) {
            self.lifecycle.events().publish(DomainEvent::TaskCreated {
                task_id: id,
                tab: self.bound_tab,
                timestamp: Timestamp::now(),
            });
        }
    }

    /// Submit a batch to this task's engine.
    pub fn act(&self, batch: ActionBatch, callback: ActCallback) {
        self.engine.act(batch, callback);
    }

    /// Cancel in-flight work and finish the task. Idempotent.
    pub fn stop(&self) {
        let stopped = self.engine.drive_task(
            |s| s != TaskState::Finished,
            TaskState::Finished,
            Some(ActionResultCode::TaskWentAway),
        );
        if stopped {
            tracing::info!(task_id = %self.id(), "Task stopped");
        }
    }

    /// Cancel in-flight work and hand control back to the client.
    pub fn pause(&self) {
        let paused = self.engine.drive_task(
            |s| !matches!(s, TaskState::Finished | TaskState::PausedByClient),
            TaskState::PausedByClient,
            Some(ActionResultCode::TaskPaused),
        );
        if paused {
            tracing::info!(task_id = %self.id(), "Task paused");
        }
    }

    /// Flip a task back to `Reflecting`.
    ///
    /// This does not restart anything: a [`DomainEvent::TaskResumed`] is
    /// published and whoever drives the task must observe the page again
    /// before sending further actions.
    pub fn resume(&self) {
        let resumed = self.engine.drive_task(
            |s| !matches!(s, TaskState::Finished | TaskState::Reflecting),
            TaskState::Reflecting,
            None,
        );
        if !resumed {
            return;
        }
        self.lifecycle.events().publish(DomainEvent::TaskResumed {
            task_id: self.id(),
            timestamp: Timestamp::now(),
        });
        tracing::info!(task_id = %self.id(), "Task resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state() == TaskState::PausedByClient
    }

    pub fn did_observe_content(&self, snapshot: ObservedContent) {
        self.engine.did_observe_content(snapshot);
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id(),
            title: self.title.clone(),
            state: self.state(),
            bound_tab: self.engine.bound_tab(),
            has_batch_in_flight: self.engine.has_task(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{NoopUiHooks, SafetyEvaluator, TabHost, ToolInvoker};
    use crate::journal::MemoryJournal;
    use crate::types::{Action, ActionResult, ToolRequest};
    use async_trait::async_trait;
    use std::time::Duration;
    use steward_core::Origin;
    use tokio::sync::{oneshot, Barrier};

    struct OneTab;

    impl TabHost for OneTab {
        fn committed_origin(&self, tab: TabId) -> Option<Origin> {
            (tab == TabId(1)).then(|| Origin::from_url("https://a.test/").unwrap())
        }

        fn create_tab(&self, _url: Option<&str>) -> Option<TabId> {
            None
        }
    }

    struct Allow;

    #[async_trait]
    impl SafetyEvaluator for Allow {
        async fn may_act(&self, _tab: TabId, _task_id: TaskId, _origin: &Origin) -> bool {
            true
        }
    }

    /// Tool that never finishes, keeping a batch in flight.
    struct Hang;

    #[async_trait]
    impl ToolInvoker for Hang {
        async fn invoke(
            &self,
            _request: &ToolRequest,
            _last_observation: Option<&ObservedContent>,
        ) -> ActionResult {
            std::future::pending::<()>().await;
            ActionResult::ok()
        }
    }

    fn make_task() -> Task {
        let collaborators = Collaborators {
            tabs: Arc::new(OneTab),
            safety: Arc::new(Allow),
            hooks: Arc::new(NoopUiHooks),
            tools: Arc::new(Hang),
            journal: Arc::new(MemoryJournal::new(64)),
        };
        let task = Task::new("test", Some(TabId(1)), collaborators, EventBus::new(64));
        task.assign_id(TaskId(1));
        task
    }

    fn click_batch() -> ActionBatch {
        ActionBatch::Legacy {
            actions: vec![Action::click_at(1.0, 1.0)],
        }
    }

    async fn wait_for_tool(task: &Task) {
        for _ in 0..100 {
            if task.engine().action_index() == 1 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("batch never reached the tool");
    }

    #[test]
    fn test_new_task_is_created_and_unassigned_until_registered() {
        let collaborators = Collaborators {
            tabs: Arc::new(OneTab),
            safety: Arc::new(Allow),
            hooks: Arc::new(NoopUiHooks),
            tools: Arc::new(Hang),
            journal: Arc::new(MemoryJournal::new(64)),
        };
        let task = Task::new("fresh", None, collaborators, EventBus::new(4));
        assert_eq!(task.state(), TaskState::Created);
        assert_eq!(task.id(), TaskId::UNASSIGNED);
        task.assign_id(TaskId(5));
        task.assign_id(TaskId(6));
        assert_eq!(task.id(), TaskId(5));
    }

    #[tokio::test]
    async fn test_stop_finishes_and_is_idempotent() {
        let task = make_task();
        task.stop();
        assert_eq!(task.state(), TaskState::Finished);
        task.stop();
        assert_eq!(task.state(), TaskState::Finished);
        assert!(!task.engine().has_task());
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_batch_with_task_went_away() {
        let task = make_task();
        let (tx, rx) = oneshot::channel();
        task.act(click_batch(), Box::new(move |o| {
            let _ = tx.send(o);
        }));
        assert_eq!(task.state(), TaskState::Acting);
        wait_for_tool(&task).await;

        task.stop();
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.result.code, ActionResultCode::TaskWentAway);
        assert_eq!(task.state(), TaskState::Finished);
        assert!(!task.engine().has_task());
    }

    #[tokio::test]
    async fn test_pause_cancels_with_task_paused_and_resume_reflects() {
        let task = make_task();
        let mut events = task.lifecycle.events().subscribe();
        let (tx, rx) = oneshot::channel();
        task.act(click_batch(), Box::new(move |o| {
            let _ = tx.send(o);
        }));
        wait_for_tool(&task).await;

        task.pause();
        assert!(task.is_paused());
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.result.code, ActionResultCode::TaskPaused);
        assert!(task.is_paused(), "completion must not overwrite the pause");

        task.resume();
        assert_eq!(task.state(), TaskState::Reflecting);

        let mut saw_resumed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DomainEvent::TaskResumed { .. }) {
                saw_resumed = true;
            }
        }
        assert!(saw_resumed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pause_racing_act_always_wins() {
        for _ in 0..200 {
            let task = Arc::new(make_task());
            let start = Arc::new(Barrier::new(2));
            let (tx, rx) = oneshot::channel();

            let acting = {
                let task = Arc::clone(&task);
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    task.act(click_batch(), Box::new(move |o| {
                        let _ = tx.send(o);
                    }));
                })
            };
            let pausing = {
                let task = Arc::clone(&task);
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    task.pause();
                })
            };
            acting.await.unwrap();
            pausing.await.unwrap();

            let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
                .await
                .expect("batch outcome was never delivered")
                .unwrap();
            assert_eq!(outcome.result.code, ActionResultCode::TaskPaused);
            assert!(task.is_paused());
            assert!(!task.engine().has_task());
        }
    }

    #[test]
    fn test_transition_if_checks_and_moves_atomically() {
        let lifecycle = TaskLifecycle::new(EventBus::new(8));

        let moved = lifecycle
            .transition_if(|s| s == TaskState::Reflecting, TaskState::Acting)
            .unwrap();
        assert!(!moved);
        assert_eq!(lifecycle.state(), TaskState::Created);

        let moved = lifecycle
            .transition_if(|s| s == TaskState::Created, TaskState::Acting)
            .unwrap();
        assert!(moved);
        assert_eq!(lifecycle.state(), TaskState::Acting);

        lifecycle.transition(TaskState::Finished).unwrap();
        assert!(lifecycle
            .transition_if(|_| true, TaskState::Acting)
            .is_err());
        assert_eq!(lifecycle.state(), TaskState::Finished);
    }

    #[test]
    fn test_ending_a_batch_only_moves_an_acting_task() {
        let lifecycle = TaskLifecycle::new(EventBus::new(8));
        lifecycle.begin_acting();
        assert_eq!(lifecycle.state(), TaskState::Acting);
        lifecycle.end_acting();
        assert_eq!(lifecycle.state(), TaskState::Reflecting);

        lifecycle.transition(TaskState::PausedByClient).unwrap();
        lifecycle.end_acting();
        assert_eq!(lifecycle.state(), TaskState::PausedByClient);
        lifecycle.begin_acting();
        assert_eq!(lifecycle.state(), TaskState::PausedByClient);
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_noops_once_finished() {
        let task = make_task();
        task.stop();
        task.pause();
        assert_eq!(task.state(), TaskState::Finished);
        task.resume();
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_summary_reflects_engine() {
        let task = make_task();
        let summary = task.summary();
        assert_eq!(summary.id, TaskId(1));
        assert_eq!(summary.title, "test");
        assert_eq!(summary.bound_tab, Some(TabId(1)));
        assert!(!summary.has_batch_in_flight);
    }
}
