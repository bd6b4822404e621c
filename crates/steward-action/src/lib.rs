//! Action execution core for Steward.
//!
//! Runs batches of browser actions on behalf of automation tasks: every
//! action is safety-checked against the tab's committed origin, wrapped in UI
//! hooks and handed to the tool layer, one at a time.

pub mod collaborator;
pub mod engine;
pub mod error;
pub mod handler;
pub mod journal;
pub mod registry;
pub mod safety;
pub mod service;
pub mod task;
pub mod tool;
pub mod types;

pub use collaborator::{
    Collaborators, NoopUiHooks, SafetyEvaluator, TabHost, ToolInvoker, UiHookDispatcher,
};
pub use engine::state_machine::EngineState;
pub use engine::{ActCallback, ExecutionEngine};
pub use error::{EngineError, TaskError, ToolError, TranslateError};
pub use handler::{ToolHandler, ToolRegistry};
pub use journal::{FanoutJournal, Journal, JournalEntry, MemoryJournal, TracingJournal};
pub use registry::TaskRegistry;
pub use safety::BlocklistSafetyEvaluator;
pub use service::ActuationService;
pub use task::{Task, TaskLifecycle};
pub use tool::{PageStability, ToolController};
pub use types::{
    Action, ActionBatch, ActionKind, ActionResult, BatchOutcome, BatchProtocol, DetachReason,
    HookContext, MouseButton, ObservedContent, ScrollDirection, StartTaskResponse,
    StartTaskStatus, Target, TargetDescriptor, TaskSummary, ToolKind, ToolRequest,
};
