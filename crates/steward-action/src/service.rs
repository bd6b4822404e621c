//! Actuation service: the per-session entry point for clients.
//!
//! Owns the task registry and the shared collaborators, turns target
//! descriptors into bound tasks and exposes `act` as an awaitable call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use steward_core::{ActionResultCode, DomainEvent, EventBus, StewardError, TabId, TaskId};
use tokio::sync::{broadcast, oneshot};

use crate::collaborator::Collaborators;
use crate::registry::TaskRegistry;
use crate::task::Task;
use crate::types::{
    ActionBatch, ActionResult, BatchOutcome, DetachReason, ObservedContent, StartTaskResponse,
    StartTaskStatus, TargetDescriptor, TaskSummary,
};

pub struct ActuationService {
    registry: Mutex<TaskRegistry>,
    collaborators: Collaborators,
    events: EventBus,
    shutting_down: AtomicBool,
}

impl ActuationService {
    pub fn new(collaborators: Collaborators, events: EventBus) -> Self {
        Self {
            registry: Mutex::new(TaskRegistry::new()),
            collaborators,
            events,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Create a task bound to the tab described by `target`.
    ///
    /// Fails (without registering anything) when the tab does not exist, a new
    /// tab cannot be opened, or the service is shutting down.
    pub fn start_task(&self, target: TargetDescriptor, title: &str) -> StartTaskResponse {
        if let Err(e) = self.ensure_running() {
            tracing::warn!(error = %e, "Refusing to start task");
            return failed();
        }

        let tab = match self.resolve_target(&target) {
            Some(tab) => tab,
            None => {
                tracing::warn!(?target, "Could not resolve task target");
                return failed();
            }
        };

        let task = Task::new(
            title,
            Some(tab),
            self.collaborators.clone(),
            self.events.clone(),
        );
        let task_id = self.lock().add_task(task);
        tracing::info!(%task_id, %tab, title, "Task started");

        StartTaskResponse {
            task_id: Some(task_id),
            bound_tab: Some(tab),
            status: StartTaskStatus::Success,
        }
    }

    /// Run `batch` on the task and wait for its outcome.
    pub async fn act(&self, task_id: TaskId, batch: ActionBatch) -> BatchOutcome {
        let protocol = batch.protocol();
        let Some(task) = self.task(task_id) else {
            tracing::debug!(%task_id, "Act on unknown task");
            return BatchOutcome::rejected(
                protocol,
                ActionResult::new(ActionResultCode::TaskWentAway),
            );
        };

        let (tx, rx) = oneshot::channel();
        task.act(
            batch,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        drop(task);

        match rx.await {
            Ok(outcome) => outcome,
            // The engine was torn down before the batch completed.
            Err(_) => BatchOutcome::rejected(
                protocol,
                ActionResult::new(ActionResultCode::TaskWentAway),
            ),
        }
    }

    pub fn stop_task(&self, task_id: TaskId) {
        self.lock().stop_task(task_id);
    }

    pub fn pause_task(&self, task_id: TaskId) {
        if let Some(task) = self.task(task_id) {
            task.pause();
        }
    }

    pub fn resume_task(&self, task_id: TaskId) {
        if let Some(task) = self.task(task_id) {
            task.resume();
        }
    }

    pub fn did_observe_content(&self, task_id: TaskId, snapshot: ObservedContent) {
        if let Some(task) = self.task(task_id) {
            task.did_observe_content(snapshot);
        }
    }

    /// Forward a tab detach to every task's engine.
    pub fn on_tab_detached(&self, tab: TabId, reason: DetachReason) {
        let tasks: Vec<Arc<Task>> = self.lock().tasks().map(|(_, t)| Arc::clone(t)).collect();
        for task in tasks {
            task.engine().on_tab_detached(tab, reason);
        }
    }

    pub fn task_summaries(&self) -> Vec<TaskSummary> {
        self.lock().tasks().map(|(_, t)| t.summary()).collect()
    }

    pub fn task(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.lock().get_task(task_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    /// Stop every task. New tasks are refused afterwards.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = self.lock();
        tracing::info!(tasks = registry.len(), "Shutting down actuation service");
        registry.stop_all();
    }

    fn ensure_running(&self) -> steward_core::Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StewardError::ShuttingDown);
        }
        Ok(())
    }

    fn resolve_target(&self, target: &TargetDescriptor) -> Option<TabId> {
        match target {
            TargetDescriptor::ExistingTab { tab } => {
                self.collaborators.tabs.tab_exists(*tab).then_some(*tab)
            }
            TargetDescriptor::NewTab { url } => self.collaborators.tabs.create_tab(url.as_deref()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn failed() -> StartTaskResponse {
    StartTaskResponse {
        task_id: None,
        bound_tab: None,
        status: StartTaskStatus::Failed,
    }
}
