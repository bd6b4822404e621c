//! Tool controller: dispatches tool requests to registered handlers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use steward_core::config::ToolConfig;
use steward_core::{ActionResultCode, TabId, TaskId};
use tokio::time::Instant;

use crate::collaborator::{TabHost, ToolInvoker};
use crate::handler::ToolRegistry;
use crate::types::{ActionKind, ActionResult, ObservedContent, ToolRequest};

/// Reports when a tab has settled after a tool touched it.
#[async_trait]
pub trait PageStability: Send + Sync {
    async fn wait_until_stable(&self, tab: TabId);
}

/// The production `ToolInvoker`.
///
/// At most one invocation per task runs at a time; a second concurrent request
/// for the same task is answered with `ToolBusy`.
pub struct ToolController {
    registry: ToolRegistry,
    tabs: Arc<dyn TabHost>,
    stability: Option<Arc<dyn PageStability>>,
    config: ToolConfig,
    active: Mutex<HashSet<TaskId>>,
}

impl ToolController {
    pub fn new(registry: ToolRegistry, tabs: Arc<dyn TabHost>, config: ToolConfig) -> Self {
        Self {
            registry,
            tabs,
            stability: None,
            config,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_stability(mut self, stability: Arc<dyn PageStability>) -> Self {
        self.stability = Some(stability);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn begin(&self, task_id: TaskId) -> Option<ActiveInvocation<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(task_id) {
            return None;
        }
        Some(ActiveInvocation {
            active: &self.active,
            task_id,
        })
    }

    /// `Some(result)` when the observation no longer describes the tab.
    fn check_drift(
        &self,
        request: &ToolRequest,
        observation: Option<&ObservedContent>,
    ) -> Option<ActionResult> {
        let tab = request.tab?;
        let observation = observation.filter(|o| o.tab == tab)?;
        let Some(current) = self.tabs.committed_origin(tab) else {
            return Some(ActionResult::new(ActionResultCode::TabWentAway));
        };
        if current.is_same_origin_with(&observation.origin) {
            return None;
        }
        Some(ActionResult::with_message(
            ActionResultCode::ObservationStale,
            format!("observed {} but {} now shows {}", observation.origin, tab, current),
        ))
    }

    async fn wait_for_stability(&self, request: &ToolRequest, started: Instant) {
        if !self.config.wait_for_stability || !settles_page(&request.action) {
            return;
        }
        let (Some(stability), Some(tab)) = (&self.stability, request.tab) else {
            return;
        };

        let remaining = self
            .config
            .global_timeout()
            .saturating_sub(started.elapsed());
        let budget = self.config.local_timeout().min(remaining);
        if budget.is_zero() {
            tracing::debug!(%tab, "No time left to wait for page stability");
            return;
        }

        if tokio::time::timeout(budget, stability.wait_until_stable(tab))
            .await
            .is_err()
        {
            tracing::warn!(
                %tab,
                budget_ms = budget.as_millis() as u64,
                "Page did not settle in time, forcing completion"
            );
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolController {
    async fn invoke(
        &self,
        request: &ToolRequest,
        last_observation: Option<&ObservedContent>,
    ) -> ActionResult {
        let started = Instant::now();
        let kind = request.kind();

        let Some(handler) = self.registry.get(kind) else {
            tracing::warn!(tool = %kind, "No handler registered");
            return ActionResult::with_message(
                ActionResultCode::ToolUnavailable,
                format!("no handler for {kind}"),
            );
        };

        let Some(_guard) = self.begin(request.task_id) else {
            tracing::warn!(task_id = %request.task_id, tool = %kind, "Tool already running for task");
            return ActionResult::new(ActionResultCode::ToolBusy);
        };

        if let Some(stale) = self.check_drift(request, last_observation) {
            tracing::info!(task_id = %request.task_id, result = %stale, "Rejected tool request");
            return stale;
        }

        tracing::debug!(task_id = %request.task_id, "Executing: {}", handler.describe(request));
        if let Err(e) = handler.execute(request, last_observation).await {
            tracing::info!(task_id = %request.task_id, tool = %kind, error = %e, "Tool failed");
            return e.into();
        }

        self.wait_for_stability(request, started).await;
        ActionResult::ok()
    }
}

/// Clears the task's busy flag when the invocation ends, however it ends.
struct ActiveInvocation<'a> {
    active: &'a Mutex<HashSet<TaskId>>,
    task_id: TaskId,
}

impl Drop for ActiveInvocation<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

/// Whether the page may still be changing after this action.
fn settles_page(action: &ActionKind) -> bool {
    !matches!(
        action,
        ActionKind::Wait { .. }
            | ActionKind::YieldToUser
            | ActionKind::CreateWindow
            | ActionKind::CloseWindow { .. }
            | ActionKind::CloseTab { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::handler::ToolHandler;
    use crate::types::{Action, ToolKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use steward_core::{Origin, Timestamp};
    use tokio::sync::Notify;

    struct StaticTabs(Origin);

    impl TabHost for StaticTabs {
        fn committed_origin(&self, tab: TabId) -> Option<Origin> {
            (tab == TabId(1)).then(|| self.0.clone())
        }

        fn create_tab(&self, _url: Option<&str>) -> Option<TabId> {
            None
        }
    }

    struct CountingClick {
        calls: AtomicUsize,
        outcome: fn() -> Result<(), ToolError>,
    }

    #[async_trait]
    impl ToolHandler for CountingClick {
        fn kind(&self) -> ToolKind {
            ToolKind::Click
        }

        async fn execute(
            &self,
            _request: &ToolRequest,
            _observation: Option<&ObservedContent>,
        ) -> Result<(), ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    /// Blocks until released.
    struct GatedClick {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ToolHandler for GatedClick {
        fn kind(&self) -> ToolKind {
            ToolKind::Click
        }

        async fn execute(
            &self,
            _request: &ToolRequest,
            _observation: Option<&ObservedContent>,
        ) -> Result<(), ToolError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    struct NeverSettles;

    #[async_trait]
    impl PageStability for NeverSettles {
        async fn wait_until_stable(&self, _tab: TabId) {
            std::future::pending::<()>().await
        }
    }

    fn origin(url: &str) -> Origin {
        Origin::from_url(url).unwrap()
    }

    fn click_request(task: u64) -> ToolRequest {
        ToolRequest::from_action(TaskId(task), Some(TabId(1)), &Action::click_at(5.0, 5.0))
            .unwrap()
    }

    fn observation(url: &str) -> ObservedContent {
        ObservedContent {
            tab: TabId(1),
            url: url.to_string(),
            origin: origin(url),
            text: String::new(),
            screenshot: None,
            captured_at: Timestamp::now(),
        }
    }

    fn controller(handler: Arc<dyn ToolHandler>, config: ToolConfig) -> ToolController {
        let mut registry = ToolRegistry::new();
        registry.register(handler);
        ToolController::new(
            registry,
            Arc::new(StaticTabs(origin("https://example.com"))),
            config,
        )
    }

    fn counting(outcome: fn() -> Result<(), ToolError>) -> Arc<CountingClick> {
        Arc::new(CountingClick {
            calls: AtomicUsize::new(0),
            outcome,
        })
    }

    #[tokio::test]
    async fn test_dispatches_to_registered_handler() {
        let handler = counting(|| Ok(()));
        let tools = controller(handler.clone(), ToolConfig::default());
        let result = tools.invoke(&click_request(1), None).await;
        assert!(result.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_unavailable() {
        let tools = controller(counting(|| Ok(())), ToolConfig::default());
        let request =
            ToolRequest::from_action(TaskId(1), Some(TabId(1)), &Action::navigate("https://a.test"))
                .unwrap();
        let result = tools.invoke(&request, None).await;
        assert_eq!(result.code, ActionResultCode::ToolUnavailable);
    }

    #[tokio::test]
    async fn test_handler_error_maps_to_code() {
        let handler = counting(|| Err(ToolError::ElementNotFound("#buy".to_string())));
        let tools = controller(handler, ToolConfig::default());
        let result = tools.invoke(&click_request(1), None).await;
        assert_eq!(result.code, ActionResultCode::ElementNotFound);
        assert_eq!(result.message.as_deref(), Some("Element not found: #buy"));
    }

    #[tokio::test]
    async fn test_stale_observation_is_rejected() {
        let handler = counting(|| Ok(()));
        let tools = controller(handler.clone(), ToolConfig::default());

        let stale = observation("https://other.test/page");
        let result = tools.invoke(&click_request(1), Some(&stale)).await;
        assert_eq!(result.code, ActionResultCode::ObservationStale);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let fresh = observation("https://example.com/cart");
        assert!(tools.invoke(&click_request(1), Some(&fresh)).await.is_ok());
    }

    #[tokio::test]
    async fn test_opaque_tab_observation_tracks_document() {
        let blank = Origin::opaque();
        let handler = counting(|| Ok(()));
        let mut registry = ToolRegistry::new();
        registry.register(handler.clone());
        let tools = ToolController::new(
            registry,
            Arc::new(StaticTabs(blank.clone())),
            ToolConfig::default(),
        );

        let mut same_document = observation("https://example.com");
        same_document.url = "about:blank".to_string();
        same_document.origin = blank;
        assert!(tools.invoke(&click_request(1), Some(&same_document)).await.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let mut earlier_document = same_document.clone();
        earlier_document.origin = Origin::opaque();
        let result = tools.invoke(&click_request(1), Some(&earlier_document)).await;
        assert_eq!(result.code, ActionResultCode::ObservationStale);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observation_of_other_tab_is_ignored() {
        let tools = controller(counting(|| Ok(())), ToolConfig::default());
        let mut other = observation("https://other.test");
        other.tab = TabId(2);
        assert!(tools.invoke(&click_request(1), Some(&other)).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_invocation_for_same_task_is_busy() {
        let handler = Arc::new(GatedClick {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let tools = Arc::new(controller(handler.clone(), ToolConfig::default()));

        let first = {
            let tools = tools.clone();
            tokio::spawn(async move { tools.invoke(&click_request(1), None).await })
        };
        handler.entered.notified().await;

        let busy = tools.invoke(&click_request(1), None).await;
        assert_eq!(busy.code, ActionResultCode::ToolBusy);

        handler.release.notify_one();
        assert!(first.await.unwrap().is_ok());

        // The busy flag is cleared once the first invocation ends.
        let again = tokio::spawn({
            let tools = tools.clone();
            async move { tools.invoke(&click_request(1), None).await }
        });
        handler.entered.notified().await;
        handler.release.notify_one();
        assert!(again.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stability_timeout_completes_as_ok() {
        let config = ToolConfig {
            wait_for_stability: true,
            stability_local_timeout_ms: 30,
            stability_global_timeout_ms: 1_000,
        };
        let tools =
            controller(counting(|| Ok(())), config).with_stability(Arc::new(NeverSettles));

        let started = std::time::Instant::now();
        let result = tools.invoke(&click_request(1), None).await;
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stability_wait_skipped_when_disabled() {
        let config = ToolConfig {
            wait_for_stability: false,
            ..ToolConfig::default()
        };
        let tools =
            controller(counting(|| Ok(())), config).with_stability(Arc::new(NeverSettles));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            tools.invoke(&click_request(1), None),
        )
        .await
        .expect("invoke must not wait for stability");
        assert!(result.is_ok());
    }

    #[test]
    fn test_settles_page() {
        assert!(settles_page(&Action::click_at(1.0, 1.0).kind));
        assert!(!settles_page(&ActionKind::Wait { duration_ms: 10 }));
        assert!(!settles_page(&ActionKind::YieldToUser));
    }
}
