//! Per-task action execution engine.
//!
//! Runs one batch at a time: every action is safety-checked, wrapped in UI
//! pre/post hooks and handed to the tool layer, strictly in order. The first
//! failure ends the batch. Outcomes are always delivered on a later turn.

pub mod state_machine;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use steward_core::{ActionResultCode, TabId, TaskId, TaskState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collaborator::Collaborators;
use crate::engine::state_machine::{validate_transition, EngineState};
use crate::task::TaskLifecycle;
use crate::types::{
    Action, ActionBatch, ActionResult, BatchOutcome, BatchProtocol, DetachReason, HookContext,
    ObservedContent, ToolRequest,
};

/// Receives the aggregate outcome of one `act` call.
pub type ActCallback = Box<dyn FnOnce(BatchOutcome) + Send + 'static>;

/// The state machine driving one task's batches.
///
/// Dropping the engine abandons any in-flight batch: its callback is never
/// invoked and late collaborator results are ignored.
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    lifecycle: Arc<TaskLifecycle>,
    collaborators: Collaborators,
    core: Mutex<EngineCore>,
}

struct EngineCore {
    state: EngineState,
    tab: Option<TabId>,
    batch: Option<InFlightBatch>,
    action_index: usize,
    last_observed: Option<Arc<ObservedContent>>,
}

/// The single batch slot. Legacy and multi-target batches share it, so at
/// most one of them can ever be in flight.
struct InFlightBatch {
    protocol: BatchProtocol,
    actions: Vec<Action>,
    callback: ActCallback,
    token: CancellationToken,
    results: Vec<ActionResult>,
}

/// A finished batch waiting to be reported.
struct Delivery {
    callback: ActCallback,
    outcome: BatchOutcome,
}

/// What the loop should do with the action under the cursor.
struct NextAction {
    action: Action,
    tab: Option<TabId>,
    index: usize,
}

impl ExecutionEngine {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        collaborators: Collaborators,
        tab: Option<TabId>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                lifecycle,
                collaborators,
                core: Mutex::new(EngineCore {
                    state: EngineState::Init,
                    tab,
                    batch: None,
                    action_index: 0,
                    last_observed: None,
                }),
            }),
        }
    }

    /// Start executing `batch`. `callback` fires exactly once, on a later
    /// turn, unless the engine is dropped first.
    pub fn act(&self, batch: ActionBatch, callback: ActCallback) {
        let inner = &self.inner;
        let task_id = inner.lifecycle.id();
        let protocol = batch.protocol();

        let (token, action_count, tab) = {
            let mut core = inner.lock();
            let rejection = match inner.lifecycle.state() {
                TaskState::PausedByClient => Some(ActionResult::with_message(
                    ActionResultCode::TaskPaused,
                    "task is paused",
                )),
                TaskState::Finished => Some(ActionResult::with_message(
                    ActionResultCode::TaskWentAway,
                    "task has finished",
                )),
                _ if core.batch.is_some() => Some(ActionResult::with_message(
                    ActionResultCode::Error,
                    "a batch is already in flight",
                )),
                _ => None,
            };
            if let Some(result) = rejection {
                let tab = core.tab;
                drop(core);
                inner.journal(tab, "Act rejected", &result.to_string());
                post(callback, BatchOutcome::rejected(protocol, result));
                return;
            }

            let (protocol, actions) = batch.into_parts();
            let token = CancellationToken::new();
            let action_count = actions.len();
            core.batch = Some(InFlightBatch {
                protocol,
                actions,
                callback,
                token: token.clone(),
                results: Vec::new(),
            });
            core.action_index = 0;
            inner.set_state(&mut core, EngineState::StartAction);
            inner.lifecycle.begin_acting();
            (token, action_count, core.tab)
        };

        debug!(task_id = %task_id, action_count, ?protocol, "Batch accepted");
        inner.journal(tab, "Act", &format!("{action_count} action(s), {protocol:?}"));
        inner.lifecycle.on_batch_started(action_count);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Arc::clone(inner).run_batch(token));
            }
            Err(_) => {
                warn!(task_id = %task_id, "No async runtime; failing batch");
                inner.finish(
                    &token,
                    ActionResult::with_message(ActionResultCode::Error, "no async runtime"),
                );
            }
        }
    }

    /// Move the task to `to` if its current state passes `allowed_from`,
    /// first completing any in-flight batch with `cancel`. Runs under the
    /// engine lock, so no batch can be accepted between the cancel and the
    /// transition. Returns whether the task moved.
    pub(crate) fn drive_task(
        &self,
        allowed_from: impl FnOnce(TaskState) -> bool,
        to: TaskState,
        cancel: Option<ActionResultCode>,
    ) -> bool {
        let inner = &self.inner;
        let (moved, delivery) = {
            let mut core = inner.lock();
            if !allowed_from(inner.lifecycle.state()) {
                return false;
            }
            let delivery = cancel
                .and_then(|reason| inner.complete_locked(&mut core, ActionResult::new(reason)));
            let moved = match inner.lifecycle.transition(to) {
                Ok(_) => true,
                Err(e) => {
                    warn!(task_id = %inner.task_id(), error = %e, "Rejected task transition");
                    false
                }
            };
            (moved, delivery)
        };
        if let Some(delivery) = delivery {
            inner.deliver(delivery, "Cancelled");
        }
        moved
    }

    /// Complete the in-flight batch, if any, with `reason`.
    pub fn cancel_ongoing_actions(&self, reason: ActionResultCode) {
        let delivery = {
            let mut core = self.inner.lock();
            self.inner
                .complete_locked(&mut core, ActionResult::new(reason))
        };
        if let Some(delivery) = delivery {
            self.inner.deliver(delivery, "Cancelled");
        }
    }

    /// React to a tab leaving its strip. Deleting the bound tab drops the
    /// tab reference and fails a legacy batch with `TabWentAway`.
    pub fn on_tab_detached(&self, tab: TabId, reason: DetachReason) {
        if reason != DetachReason::Delete {
            return;
        }
        let delivery = {
            let mut core = self.inner.lock();
            if core.tab != Some(tab) {
                return;
            }
            core.tab = None;
            let legacy_in_flight = core
                .batch
                .as_ref()
                .is_some_and(|b| b.protocol == BatchProtocol::Legacy);
            if legacy_in_flight {
                self.inner.complete_locked(
                    &mut core,
                    ActionResult::with_message(ActionResultCode::TabWentAway, "bound tab closed"),
                )
            } else {
                None
            }
        };
        debug!(task_id = %self.inner.lifecycle.id(), tab = %tab, "Bound tab detached");
        if let Some(delivery) = delivery {
            self.inner.journal(Some(tab), "Tab detached", "bound tab destroyed");
            self.inner.deliver(delivery, "Complete");
        }
    }

    /// Whether a batch is in flight.
    pub fn has_task(&self) -> bool {
        self.inner.lock().batch.is_some()
    }

    /// Whether a batch is in flight on an engine bound to `tab`.
    pub fn has_task_for_tab(&self, tab: TabId) -> bool {
        let core = self.inner.lock();
        core.batch.is_some() && core.tab == Some(tab)
    }

    pub fn last_observed_content(&self) -> Option<Arc<ObservedContent>> {
        self.inner.lock().last_observed.clone()
    }

    /// Replace the cached observation.
    pub fn did_observe_content(&self, snapshot: ObservedContent) {
        self.inner.lock().last_observed = Some(Arc::new(snapshot));
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    pub fn action_index(&self) -> usize {
        self.inner.lock().action_index
    }

    pub fn bound_tab(&self) -> Option<TabId> {
        self.inner.lock().tab
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        let abandoned = self.inner.lock().batch.take();
        if let Some(batch) = abandoned {
            batch.token.cancel();
            debug!(task_id = %self.inner.lifecycle.id(), "Engine dropped with a batch in flight");
        }
    }
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task_id(&self) -> TaskId {
        self.lifecycle.id()
    }

    fn journal(&self, tab: Option<TabId>, event: &str, detail: &str) {
        self.collaborators
            .journal
            .log(tab, self.task_id(), event, detail);
    }

    fn set_state(&self, core: &mut EngineCore, to: EngineState) {
        if let Err(e) = validate_transition(core.state, to) {
            tracing::error!(task_id = %self.task_id(), error = %e, "Rejected engine transition");
            debug_assert!(false, "{e}");
            return;
        }
        core.state = to;
    }

    /// Take the batch out of `core` and build its delivery. `None` when no
    /// batch is in flight.
    fn complete_locked(&self, core: &mut EngineCore, result: ActionResult) -> Option<Delivery> {
        let batch = core.batch.take()?;
        batch.token.cancel();
        let action_index = core.action_index;
        core.action_index = 0;
        self.set_state(core, EngineState::Complete);
        self.lifecycle.end_acting();

        let observation = match batch.protocol {
            BatchProtocol::Legacy => core.last_observed.clone(),
            BatchProtocol::MultiTarget => None,
        };
        Some(Delivery {
            callback: batch.callback,
            outcome: BatchOutcome {
                protocol: batch.protocol,
                result,
                action_index,
                action_results: batch.results,
                observation,
            },
        })
    }

    /// Journal, report to the task and post the callback.
    fn deliver(&self, delivery: Delivery, event: &str) {
        let outcome = &delivery.outcome;
        self.journal(None, event, &outcome.result.to_string());
        debug!(
            task_id = %self.task_id(),
            result = %outcome.result.code,
            action_index = outcome.action_index,
            "Batch complete"
        );
        self.lifecycle
            .on_batch_finished(outcome.result.code, outcome.action_results.len());
        post(delivery.callback, delivery.outcome);
    }

    /// Complete the batch owned by `token` with `result`. A no-op when that
    /// batch has already been completed.
    fn finish(&self, token: &CancellationToken, result: ActionResult) {
        let delivery = {
            let mut core = self.lock();
            if token.is_cancelled() {
                return;
            }
            self.complete_locked(&mut core, result)
        };
        if let Some(delivery) = delivery {
            self.deliver(delivery, "Complete");
        }
    }

    /// Drop a collaborator result that arrived after its batch ended.
    fn is_stale(&self, token: &CancellationToken, step: &str) -> bool {
        if token.is_cancelled() {
            debug!(task_id = %self.task_id(), step, "Ignoring late result for finished batch");
            return true;
        }
        false
    }

    /// Step to `to` if the batch is still current.
    fn advance(&self, token: &CancellationToken, to: EngineState) -> bool {
        let mut core = self.lock();
        if token.is_cancelled() {
            return false;
        }
        self.set_state(&mut core, to);
        true
    }

    /// The action under the cursor, or `None` after completing an exhausted
    /// batch (or when the batch is gone).
    fn next_action(&self, token: &CancellationToken, previous: ActionResult) -> Option<NextAction> {
        let delivery = {
            let mut core = self.lock();
            if token.is_cancelled() {
                return None;
            }
            let index = core.action_index;
            let batch = core.batch.as_ref()?;
            match batch.actions.get(index) {
                Some(action) => {
                    let tab = match batch.protocol {
                        BatchProtocol::Legacy => core.tab,
                        BatchProtocol::MultiTarget => action.tab,
                    };
                    return Some(NextAction {
                        action: action.clone(),
                        tab,
                        index,
                    });
                }
                None => self.complete_locked(&mut core, previous),
            }
        };
        if let Some(delivery) = delivery {
            self.deliver(delivery, "Complete");
        }
        None
    }

    async fn run_batch(self: Arc<Self>, token: CancellationToken) {
        let mut previous = ActionResult::ok();
        while let Some(next) = self.next_action(&token, previous) {
            match self.run_action(&token, next).await {
                Some(result) => previous = result,
                None => return,
            }
        }
    }

    /// Run one action through safety checks and the hook chain. Returns the
    /// post-hook result when the loop should continue.
    async fn run_action(&self, token: &CancellationToken, next: NextAction) -> Option<ActionResult> {
        let NextAction { action, tab, index } = next;
        let task_id = self.task_id();

        if action.kind.requires_tab_scope() {
            if let Err(result) = self.safety_check(token, &action, tab).await {
                self.finish(token, result);
                return None;
            }
            if token.is_cancelled() {
                return None;
            }
        }

        let request = match ToolRequest::from_action(task_id, tab, &action) {
            Ok(request) => request,
            Err(e) => {
                self.journal(tab, "Invalid arguments", &e.to_string());
                self.finish(token, e.into());
                return None;
            }
        };
        let ctx = HookContext {
            task_id,
            tab,
            action_index: index,
        };
        debug!(task_id = %task_id, index, tool = %request.kind(), "Executing action");

        if !self.advance(token, EngineState::UiPreTool) {
            return None;
        }
        let pre = self.collaborators.hooks.on_pre_tool(&ctx, &request).await;
        if self.is_stale(token, "ui_pre_tool") {
            return None;
        }
        if !pre.is_ok() {
            self.finish(token, pre);
            return None;
        }

        let observation = {
            let mut core = self.lock();
            if token.is_cancelled() {
                return None;
            }
            core.action_index += 1;
            self.set_state(&mut core, EngineState::ToolController);
            core.last_observed.clone()
        };
        let tool = self
            .collaborators
            .tools
            .invoke(&request, observation.as_deref())
            .await;
        drop(observation);
        if self.is_stale(token, "tool") {
            return None;
        }
        self.journal(tab, &format!("Tool {}", request.kind()), &tool.to_string());
        if !tool.is_ok() {
            self.finish(token, tool);
            return None;
        }

        if !self.advance(token, EngineState::UiPostTool) {
            return None;
        }
        let post_result = self.collaborators.hooks.on_post_tool(&ctx, &request).await;
        if self.is_stale(token, "ui_post_tool") {
            return None;
        }
        if !post_result.is_ok() {
            self.finish(token, post_result);
            return None;
        }

        let delivery = {
            let mut core = self.lock();
            if token.is_cancelled() {
                return None;
            }
            let index = core.action_index;
            let batch = core.batch.as_mut()?;
            batch.results.push(post_result.clone());
            if index >= batch.actions.len() {
                self.complete_locked(&mut core, post_result)
            } else {
                self.set_state(&mut core, EngineState::StartAction);
                return Some(post_result);
            }
        };
        if let Some(delivery) = delivery {
            self.deliver(delivery, "Complete");
        }
        None
    }

    /// Resolve the action's tab, ask the safety evaluator, and make sure the
    /// tab still shows the origin that was checked.
    async fn safety_check(
        &self,
        token: &CancellationToken,
        action: &Action,
        tab: Option<TabId>,
    ) -> Result<(), ActionResult> {
        let Some(tab) = tab else {
            self.journal(None, "Safety check", "no target tab");
            return Err(ActionResult::with_message(
                ActionResultCode::TabWentAway,
                format!("{} has no target tab", action.kind.tool_kind()),
            ));
        };

        let tabs = &self.collaborators.tabs;
        let Some(origin) = tabs.committed_origin(tab) else {
            self.journal(Some(tab), "Safety check", "tab went away");
            return Err(ActionResult::with_message(
                ActionResultCode::TabWentAway,
                format!("{tab} no longer exists"),
            ));
        };

        let allowed = self
            .collaborators
            .safety
            .may_act(tab, self.task_id(), &origin)
            .await;
        if self.is_stale(token, "safety") {
            return Ok(());
        }

        match tabs.committed_origin(tab) {
            None => {
                self.journal(Some(tab), "Safety check", "tab went away during check");
                Err(ActionResult::with_message(
                    ActionResultCode::TabWentAway,
                    format!("{tab} closed during safety check"),
                ))
            }
            Some(current) if !current.is_same_origin_with(&origin) => {
                self.journal(
                    Some(tab),
                    "Safety check",
                    &format!("origin changed from {origin} to {current}"),
                );
                Err(ActionResult::with_message(
                    ActionResultCode::CrossOriginNavigation,
                    format!("{tab} navigated from {origin} to {current}"),
                ))
            }
            Some(_) if !allowed => {
                self.journal(Some(tab), "Safety check", &format!("blocked {origin}"));
                Err(ActionResult::with_message(
                    ActionResultCode::UrlBlocked,
                    format!("acting on {origin} is not allowed"),
                ))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Hand `outcome` to `callback` on a later turn of the runtime.
fn post(callback: ActCallback, outcome: BatchOutcome) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { callback(outcome) });
        }
        Err(_) => warn!(result = %outcome.result, "No async runtime; dropping batch outcome"),
    }
}
