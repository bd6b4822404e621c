//! In-memory browser used by `steward run`.
//!
//! Tabs are URL histories; tools mutate them the way a real browser would
//! (navigate pushes an entry, back/forward move through it, close removes
//! the tab). Page interactions only check that the tab exists.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use steward_action::{
    ActionKind, ActionResult, HookContext, ObservedContent, PageStability, TabHost, ToolError,
    ToolHandler, ToolKind, ToolRegistry, ToolRequest, UiHookDispatcher,
};
use steward_core::{Origin, TabId};
use tokio::sync::mpsc;

/// A committed document: its URL and the origin derived when it committed.
struct HistoryEntry {
    url: String,
    origin: Origin,
}

impl HistoryEntry {
    fn commit(url: &str) -> Self {
        Self {
            url: url.to_string(),
            origin: Origin::from_url(url).unwrap_or_else(|_| Origin::opaque()),
        }
    }
}

struct SimTab {
    history: Vec<HistoryEntry>,
    position: usize,
}

impl SimTab {
    fn new(url: &str) -> Self {
        Self {
            history: vec![HistoryEntry::commit(url)],
            position: 0,
        }
    }

    fn current(&self) -> &HistoryEntry {
        &self.history[self.position]
    }
}

#[derive(Default)]
pub struct SimulatedBrowser {
    tabs: Mutex<BTreeMap<TabId, SimTab>>,
    next_tab: AtomicU64,
    detached: Mutex<Option<mpsc::UnboundedSender<TabId>>>,
}

impl SimulatedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tab at `url` and return its id. Ids start at 1.
    pub fn open(&self, url: &str) -> TabId {
        let tab = TabId(self.next_tab.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock().insert(tab, SimTab::new(url));
        tracing::debug!(%tab, url, "Tab opened");
        tab
    }

    pub fn url(&self, tab: TabId) -> Option<String> {
        self.lock().get(&tab).map(|t| t.current().url.clone())
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.lock().keys().copied().collect()
    }

    /// Commit a navigation, dropping any forward history.
    pub fn navigate(&self, tab: TabId, url: &str) -> Result<(), ToolError> {
        let mut tabs = self.lock();
        let entry = tabs.get_mut(&tab).ok_or(ToolError::TabWentAway)?;
        entry.history.truncate(entry.position + 1);
        entry.history.push(HistoryEntry::commit(url));
        entry.position += 1;
        tracing::debug!(%tab, url, "Navigation committed");
        Ok(())
    }

    /// Step one entry back or forward through the tab's history.
    pub fn traverse(&self, tab: TabId, forward: bool) -> Result<(), ToolError> {
        let mut tabs = self.lock();
        let entry = tabs.get_mut(&tab).ok_or(ToolError::TabWentAway)?;
        let target = if forward {
            Some(entry.position + 1).filter(|p| *p < entry.history.len())
        } else {
            entry.position.checked_sub(1)
        };
        match target {
            Some(position) => {
                entry.position = position;
                Ok(())
            }
            None => Err(ToolError::Failed("no history entry".to_string())),
        }
    }

    /// Close `tab`. Returns whether it existed.
    pub fn close(&self, tab: TabId) -> bool {
        let existed = self.lock().remove(&tab).is_some();
        if existed {
            tracing::debug!(%tab, "Tab closed");
            let sender = self.detached.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(sender) = sender.as_ref() {
                let _ = sender.send(tab);
            }
        }
        existed
    }

    /// Receive the id of every tab closed from now on.
    pub fn subscribe_detached(&self) -> mpsc::UnboundedReceiver<TabId> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.detached.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Snapshot of what `tab` currently shows.
    pub fn observe(&self, tab: TabId, text: &str) -> Option<ObservedContent> {
        let (url, origin) = {
            let tabs = self.lock();
            let current = tabs.get(&tab)?.current();
            (current.url.clone(), current.origin.clone())
        };
        Some(ObservedContent {
            tab,
            origin,
            url,
            text: text.to_string(),
            screenshot: None,
            captured_at: steward_core::Timestamp::now(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TabId, SimTab>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TabHost for SimulatedBrowser {
    fn committed_origin(&self, tab: TabId) -> Option<Origin> {
        self.lock().get(&tab).map(|t| t.current().origin.clone())
    }

    fn create_tab(&self, url: Option<&str>) -> Option<TabId> {
        Some(self.open(url.unwrap_or("about:blank")))
    }
}

// =============================================================================
// Tools
// =============================================================================

/// Register a simulated handler for every tool the browser supports.
///
/// Window management is left unregistered and reports `tool_unavailable`.
pub fn register_tools(registry: &mut ToolRegistry, browser: &Arc<SimulatedBrowser>) {
    for kind in [
        ToolKind::Click,
        ToolKind::Type,
        ToolKind::Scroll,
        ToolKind::Select,
        ToolKind::DragAndRelease,
    ] {
        registry.register(Arc::new(PageInteraction {
            kind,
            browser: Arc::clone(browser),
        }));
    }
    for kind in [
        ToolKind::Navigate,
        ToolKind::HistoryBack,
        ToolKind::HistoryForward,
        ToolKind::CreateTab,
        ToolKind::ActivateTab,
        ToolKind::CloseTab,
    ] {
        registry.register(Arc::new(TabTool {
            kind,
            browser: Arc::clone(browser),
        }));
    }
    registry.register(Arc::new(WaitTool));
    registry.register(Arc::new(YieldTool));
}

struct PageInteraction {
    kind: ToolKind,
    browser: Arc<SimulatedBrowser>,
}

#[async_trait]
impl ToolHandler for PageInteraction {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn execute(
        &self,
        request: &ToolRequest,
        _observation: Option<&ObservedContent>,
    ) -> Result<(), ToolError> {
        let tab = request.tab.ok_or(ToolError::TabWentAway)?;
        let url = self.browser.url(tab).ok_or(ToolError::TabWentAway)?;
        tracing::info!(%tab, url = %url, tool = %self.kind, target = ?request.target, "Simulated interaction");
        Ok(())
    }
}

struct TabTool {
    kind: ToolKind,
    browser: Arc<SimulatedBrowser>,
}

#[async_trait]
impl ToolHandler for TabTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn execute(
        &self,
        request: &ToolRequest,
        _observation: Option<&ObservedContent>,
    ) -> Result<(), ToolError> {
        let browser = &self.browser;
        match &request.action {
            ActionKind::Navigate { url } => browser.navigate(current(request)?, url),
            ActionKind::HistoryBack => browser.traverse(current(request)?, false),
            ActionKind::HistoryForward => browser.traverse(current(request)?, true),
            ActionKind::CreateTab { url, .. } => {
                browser.open(url.as_deref().unwrap_or("about:blank"));
                Ok(())
            }
            ActionKind::ActivateTab { target_tab } => match browser.url(*target_tab) {
                Some(_) => Ok(()),
                None => Err(ToolError::InvalidArguments(format!("{target_tab} does not exist"))),
            },
            ActionKind::CloseTab { target_tab } => {
                if browser.close(*target_tab) {
                    Ok(())
                } else {
                    Err(ToolError::InvalidArguments(format!("{target_tab} does not exist")))
                }
            }
            other => Err(ToolError::InvalidArguments(format!(
                "{} cannot run {}",
                self.kind,
                other.tool_kind()
            ))),
        }
    }
}

fn current(request: &ToolRequest) -> Result<TabId, ToolError> {
    request.tab.ok_or(ToolError::TabWentAway)
}

struct WaitTool;

#[async_trait]
impl ToolHandler for WaitTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Wait
    }

    async fn execute(
        &self,
        request: &ToolRequest,
        _observation: Option<&ObservedContent>,
    ) -> Result<(), ToolError> {
        if let ActionKind::Wait { duration_ms } = request.action {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }
        Ok(())
    }
}

struct YieldTool;

#[async_trait]
impl ToolHandler for YieldTool {
    fn kind(&self) -> ToolKind {
        ToolKind::YieldToUser
    }

    async fn execute(
        &self,
        request: &ToolRequest,
        _observation: Option<&ObservedContent>,
    ) -> Result<(), ToolError> {
        tracing::info!(task_id = %request.task_id, "Task yielded to the user");
        Ok(())
    }
}

/// Pages settle after a fixed delay.
pub struct SettleDelay(pub Duration);

impl Default for SettleDelay {
    fn default() -> Self {
        Self(Duration::from_millis(5))
    }
}

#[async_trait]
impl PageStability for SettleDelay {
    async fn wait_until_stable(&self, _tab: TabId) {
        tokio::time::sleep(self.0).await;
    }
}

/// UI hooks that only log.
pub struct LoggingHooks;

#[async_trait]
impl UiHookDispatcher for LoggingHooks {
    async fn on_pre_tool(&self, ctx: &HookContext, request: &ToolRequest) -> ActionResult {
        tracing::debug!(task_id = %ctx.task_id, index = ctx.action_index, tool = %request.kind(), "Before tool");
        ActionResult::ok()
    }

    async fn on_post_tool(&self, ctx: &HookContext, request: &ToolRequest) -> ActionResult {
        tracing::debug!(task_id = %ctx.task_id, index = ctx.action_index, tool = %request.kind(), "After tool");
        ActionResult::ok()
    }
}
