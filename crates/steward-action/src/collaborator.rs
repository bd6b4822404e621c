//! Boundary traits for the engine's external collaborators.
//!
//! The engine only ever talks to tabs, the safety evaluator, UI hooks, the
//! tool layer and the journal through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use steward_core::{Origin, TabId, TaskId};

use crate::journal::Journal;
use crate::types::{ActionResult, HookContext, ObservedContent, ToolRequest};

/// Read access to the host's tabs.
pub trait TabHost: Send + Sync {
    /// Origin of the document currently committed in `tab`, or `None` if the
    /// tab no longer exists.
    fn committed_origin(&self, tab: TabId) -> Option<Origin>;

    /// Open a new tab, optionally navigating it to `url`.
    fn create_tab(&self, url: Option<&str>) -> Option<TabId>;

    fn tab_exists(&self, tab: TabId) -> bool {
        self.committed_origin(tab).is_some()
    }
}

/// Decides whether an action may touch `tab` while it shows `origin`.
#[async_trait]
pub trait SafetyEvaluator: Send + Sync {
    async fn may_act(&self, tab: TabId, task_id: TaskId, origin: &Origin) -> bool;
}

/// Runs user-visible hooks around every tool invocation.
#[async_trait]
pub trait UiHookDispatcher: Send + Sync {
    async fn on_pre_tool(&self, ctx: &HookContext, request: &ToolRequest) -> ActionResult;
    async fn on_post_tool(&self, ctx: &HookContext, request: &ToolRequest) -> ActionResult;
}

/// Performs a single tool request.
///
/// `last_observation` is borrowed for the duration of the call only.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: &ToolRequest,
        last_observation: Option<&ObservedContent>,
    ) -> ActionResult;
}

/// UI hooks that do nothing and always succeed.
pub struct NoopUiHooks;

#[async_trait]
impl UiHookDispatcher for NoopUiHooks {
    async fn on_pre_tool(&self, _ctx: &HookContext, _request: &ToolRequest) -> ActionResult {
        ActionResult::ok()
    }

    async fn on_post_tool(&self, _ctx: &HookContext, _request: &ToolRequest) -> ActionResult {
        ActionResult::ok()
    }
}

/// The full set of collaborators an engine needs. Cheap to clone.
#[derive(Clone)]
pub struct Collaborators {
    pub tabs: Arc<dyn TabHost>,
    pub safety: Arc<dyn SafetyEvaluator>,
    pub hooks: Arc<dyn UiHookDispatcher>,
    pub tools: Arc<dyn ToolInvoker>,
    pub journal: Arc<dyn Journal>,
}
