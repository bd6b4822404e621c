//! Core types and value objects for the action engine.
//!
//! Defines actions and batches, the tool requests they translate into,
//! per-action and aggregate results, and observation snapshots.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use steward_core::{ActionResultCode, DocumentId, Origin, TabId, TaskId, TaskState, Timestamp};

use crate::error::TranslateError;

/// Longest wait a single `wait` action may request.
pub const MAX_WAIT_MS: u64 = 60_000;

// =============================================================================
// Actions
// =============================================================================

/// Where inside a tab an action applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    /// A DOM node inside a specific document (frame).
    Node { document: DocumentId, node_id: u64 },
    /// A viewport coordinate in CSS pixels.
    Point { x: f64, y: f64 },
    #[default]
    None,
}

impl Target {
    fn is_locatable(&self) -> bool {
        !matches!(self, Target::None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// The operation an action performs. The tag doubles as the tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Click {
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_click_count")]
        count: u8,
    },
    Type {
        text: String,
        #[serde(default)]
        follow_by_enter: bool,
    },
    Scroll {
        direction: ScrollDirection,
        distance: f64,
    },
    Navigate {
        url: String,
    },
    Select {
        value: String,
    },
    DragAndRelease {
        to_x: f64,
        to_y: f64,
    },
    Wait {
        duration_ms: u64,
    },
    HistoryBack,
    HistoryForward,
    CreateTab {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        foreground: bool,
    },
    ActivateTab {
        target_tab: TabId,
    },
    CloseTab {
        target_tab: TabId,
    },
    CreateWindow,
    CloseWindow {
        window_id: u64,
    },
    YieldToUser,
}

fn default_click_count() -> u8 {
    1
}

impl ActionKind {
    /// Tool that performs this action.
    pub fn tool_kind(&self) -> ToolKind {
        match self {
            ActionKind::Click { .. } => ToolKind::Click,
            ActionKind::Type { .. } => ToolKind::Type,
            ActionKind::Scroll { .. } => ToolKind::Scroll,
            ActionKind::Navigate { .. } => ToolKind::Navigate,
            ActionKind::Select { .. } => ToolKind::Select,
            ActionKind::DragAndRelease { .. } => ToolKind::DragAndRelease,
            ActionKind::Wait { .. } => ToolKind::Wait,
            ActionKind::HistoryBack => ToolKind::HistoryBack,
            ActionKind::HistoryForward => ToolKind::HistoryForward,
            ActionKind::CreateTab { .. } => ToolKind::CreateTab,
            ActionKind::ActivateTab { .. } => ToolKind::ActivateTab,
            ActionKind::CloseTab { .. } => ToolKind::CloseTab,
            ActionKind::CreateWindow => ToolKind::CreateWindow,
            ActionKind::CloseWindow { .. } => ToolKind::CloseWindow,
            ActionKind::YieldToUser => ToolKind::YieldToUser,
        }
    }

    /// Whether the action operates inside a tab's content and therefore has
    /// to pass the safety evaluator first. Tab/window lifecycle operations,
    /// waits and yields do not.
    pub fn requires_tab_scope(&self) -> bool {
        matches!(
            self,
            ActionKind::Click { .. }
                | ActionKind::Type { .. }
                | ActionKind::Scroll { .. }
                | ActionKind::Navigate { .. }
                | ActionKind::Select { .. }
                | ActionKind::DragAndRelease { .. }
                | ActionKind::HistoryBack
                | ActionKind::HistoryForward
        )
    }
}

/// One automation step.
///
/// `tab` and `target` sit beside the flattened `kind`, so no action kind may
/// declare fields with those names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Tab addressed by a multi-target batch. Ignored by legacy batches,
    /// which always act on the task's bound tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabId>,
    #[serde(default)]
    pub target: Target,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            tab: None,
            target: Target::None,
            kind,
        }
    }

    pub fn with_tab(mut self, tab: TabId) -> Self {
        self.tab = Some(tab);
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn click_at(x: f64, y: f64) -> Self {
        Self::new(ActionKind::Click {
            button: MouseButton::Left,
            count: 1,
        })
        .with_target(Target::Point { x, y })
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate { url: url.into() })
    }
}

/// Which submission protocol a batch arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchProtocol {
    /// Every action acts on the task's bound tab.
    Legacy,
    /// Every action names its own tab.
    MultiTarget,
}

/// An ordered group of actions submitted in one `act` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ActionBatch {
    Legacy { actions: Vec<Action> },
    MultiTarget { actions: Vec<Action> },
}

impl ActionBatch {
    pub fn protocol(&self) -> BatchProtocol {
        match self {
            ActionBatch::Legacy { .. } => BatchProtocol::Legacy,
            ActionBatch::MultiTarget { .. } => BatchProtocol::MultiTarget,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            ActionBatch::Legacy { actions } | ActionBatch::MultiTarget { actions } => actions,
        }
    }

    pub fn into_parts(self) -> (BatchProtocol, Vec<Action>) {
        match self {
            ActionBatch::Legacy { actions } => (BatchProtocol::Legacy, actions),
            ActionBatch::MultiTarget { actions } => (BatchProtocol::MultiTarget, actions),
        }
    }
}

// =============================================================================
// Tool requests
// =============================================================================

/// Tool identifiers, one per action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Click,
    Type,
    Scroll,
    Navigate,
    Select,
    DragAndRelease,
    Wait,
    HistoryBack,
    HistoryForward,
    CreateTab,
    ActivateTab,
    CloseTab,
    CreateWindow,
    CloseWindow,
    YieldToUser,
}

impl ToolKind {
    pub const ALL: [ToolKind; 15] = [
        ToolKind::Click,
        ToolKind::Type,
        ToolKind::Scroll,
        ToolKind::Navigate,
        ToolKind::Select,
        ToolKind::DragAndRelease,
        ToolKind::Wait,
        ToolKind::HistoryBack,
        ToolKind::HistoryForward,
        ToolKind::CreateTab,
        ToolKind::ActivateTab,
        ToolKind::CloseTab,
        ToolKind::CreateWindow,
        ToolKind::CloseWindow,
        ToolKind::YieldToUser,
    ];
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolKind::Click => "click",
            ToolKind::Type => "type",
            ToolKind::Scroll => "scroll",
            ToolKind::Navigate => "navigate",
            ToolKind::Select => "select",
            ToolKind::DragAndRelease => "drag_and_release",
            ToolKind::Wait => "wait",
            ToolKind::HistoryBack => "history_back",
            ToolKind::HistoryForward => "history_forward",
            ToolKind::CreateTab => "create_tab",
            ToolKind::ActivateTab => "activate_tab",
            ToolKind::CloseTab => "close_tab",
            ToolKind::CreateWindow => "create_window",
            ToolKind::CloseWindow => "close_window",
            ToolKind::YieldToUser => "yield_to_user",
        };
        f.write_str(s)
    }
}

/// A validated, normalized request handed to the tool layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolRequest {
    pub task_id: TaskId,
    pub tab: Option<TabId>,
    pub target: Target,
    pub action: ActionKind,
}

impl ToolRequest {
    /// Translate `action` into a request against `tab`.
    ///
    /// `tab` is the tab the engine resolved for the action (the bound tab for
    /// legacy batches, the action's own tab otherwise).
    pub fn from_action(
        task_id: TaskId,
        tab: Option<TabId>,
        action: &Action,
    ) -> Result<Self, TranslateError> {
        let kind = action.kind.tool_kind();
        if action.kind.requires_tab_scope() && tab.is_none() {
            return Err(TranslateError::MissingTab(kind));
        }

        match &action.kind {
            ActionKind::Click { count, .. } => {
                require_target(kind, &action.target)?;
                if !(1..=2).contains(count) {
                    return Err(TranslateError::InvalidField {
                        tool: kind,
                        field: "count",
                        reason: format!("must be 1 or 2, got {count}"),
                    });
                }
            }
            ActionKind::Type { .. } => require_target(kind, &action.target)?,
            ActionKind::Scroll { distance, .. } => {
                if !distance.is_finite() || *distance <= 0.0 {
                    return Err(TranslateError::InvalidField {
                        tool: kind,
                        field: "distance",
                        reason: format!("must be a positive number, got {distance}"),
                    });
                }
            }
            ActionKind::Navigate { url } => require_web_url(kind, url)?,
            ActionKind::Select { value } => {
                if !matches!(action.target, Target::Node { .. }) {
                    return Err(TranslateError::MissingTarget(kind));
                }
                if value.is_empty() {
                    return Err(TranslateError::InvalidField {
                        tool: kind,
                        field: "value",
                        reason: "must not be empty".to_string(),
                    });
                }
            }
            ActionKind::DragAndRelease { to_x, to_y } => {
                require_target(kind, &action.target)?;
                if !to_x.is_finite() || !to_y.is_finite() {
                    return Err(TranslateError::InvalidField {
                        tool: kind,
                        field: "to",
                        reason: "coordinates must be finite".to_string(),
                    });
                }
            }
            ActionKind::Wait { duration_ms } => {
                if *duration_ms > MAX_WAIT_MS {
                    return Err(TranslateError::InvalidField {
                        tool: kind,
                        field: "duration_ms",
                        reason: format!("exceeds the {MAX_WAIT_MS} ms limit"),
                    });
                }
            }
            ActionKind::CreateTab { url: Some(url), .. } => require_web_url(kind, url)?,
            ActionKind::CreateTab { url: None, .. }
            | ActionKind::HistoryBack
            | ActionKind::HistoryForward
            | ActionKind::ActivateTab { .. }
            | ActionKind::CloseTab { .. }
            | ActionKind::CreateWindow
            | ActionKind::CloseWindow { .. }
            | ActionKind::YieldToUser => {}
        }

        Ok(Self {
            task_id,
            tab,
            target: action.target.clone(),
            action: action.kind.clone(),
        })
    }

    pub fn kind(&self) -> ToolKind {
        self.action.tool_kind()
    }
}

fn require_target(tool: ToolKind, target: &Target) -> Result<(), TranslateError> {
    if target.is_locatable() {
        Ok(())
    } else {
        Err(TranslateError::MissingTarget(tool))
    }
}

fn require_web_url(tool: ToolKind, url: &str) -> Result<(), TranslateError> {
    match Origin::from_url(url) {
        Ok(Origin::Tuple { .. }) => Ok(()),
        _ => Err(TranslateError::InvalidField {
            tool,
            field: "url",
            reason: format!("not an http(s) URL: {url}"),
        }),
    }
}

// =============================================================================
// Results
// =============================================================================

/// Result of one action, or of a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub code: ActionResultCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self::new(ActionResultCode::Ok)
    }

    pub fn new(code: ActionResultCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: ActionResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Aggregate result delivered once per `act` call.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub protocol: BatchProtocol,
    pub result: ActionResult,
    /// Cursor position when the batch ended: the number of actions that got
    /// past their UI pre-hook.
    pub action_index: usize,
    /// Results of every action whose full hook chain succeeded, in order.
    pub action_results: Vec<ActionResult>,
    /// Last observed content, attached for legacy batches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Arc<ObservedContent>>,
}

impl BatchOutcome {
    /// Outcome for a batch that was turned away before it started.
    pub fn rejected(protocol: BatchProtocol, result: ActionResult) -> Self {
        Self {
            protocol,
            result,
            action_index: 0,
            action_results: Vec::new(),
            observation: None,
        }
    }
}

// =============================================================================
// Observation, hooks, tabs
// =============================================================================

/// A page snapshot fetched by the observation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedContent {
    pub tab: TabId,
    pub url: String,
    pub origin: Origin,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
    pub captured_at: Timestamp,
}

/// Context handed to UI pre/post hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub task_id: TaskId,
    pub tab: Option<TabId>,
    /// Position of the action within its batch.
    pub action_index: usize,
}

/// Why a tab left its strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachReason {
    /// The tab is being destroyed.
    Delete,
    /// The tab moves to another window and lives on.
    InsertIntoOtherWindow,
}

/// What a new task should be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetDescriptor {
    ExistingTab { tab: TabId },
    NewTab { url: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTaskStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTaskResponse {
    pub task_id: Option<TaskId>,
    pub bound_tab: Option<TabId>,
    pub status: StartTaskStatus,
}

/// Read-only view of a task for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
    pub state: TaskState,
    pub bound_tab: Option<TabId>,
    pub has_batch_in_flight: bool,
    pub created_at: Timestamp,
}
