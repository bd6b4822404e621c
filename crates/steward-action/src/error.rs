//! Error types for the action engine.
//!
//! None of these cross the `act` boundary: translation and tool failures are
//! folded into an [`ActionResult`] and state-machine violations are rejected
//! where they occur.

use steward_core::{ActionResultCode, TaskId, TaskState};

use crate::engine::state_machine::EngineState;
use crate::types::{ActionResult, ToolKind};

/// Errors from the execution engine's state machine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid engine transition: {0} -> {1}")]
    InvalidTransition(EngineState, EngineState),
}

/// Errors from task lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(TaskState, TaskState),
}

/// Errors translating an action record into a tool request.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("{0} requires a target tab")]
    MissingTab(ToolKind),
    #[error("{0} requires a node or point target")]
    MissingTarget(ToolKind),
    #[error("{tool}: invalid {field}: {reason}")]
    InvalidField {
        tool: ToolKind,
        field: &'static str,
        reason: String,
    },
}

impl From<TranslateError> for ActionResult {
    fn from(err: TranslateError) -> Self {
        ActionResult::with_message(ActionResultCode::ArgumentsInvalid, err.to_string())
    }
}

/// Errors reported by tool handlers.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    #[error("Element is offscreen: {0}")]
    ElementOffscreen(String),
    #[error("Frame went away")]
    FrameWentAway,
    #[error("Tab went away")]
    TabWentAway,
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Tool failed: {0}")]
    Failed(String),
}

impl ToolError {
    pub fn code(&self) -> ActionResultCode {
        match self {
            ToolError::ElementNotFound(_) => ActionResultCode::ElementNotFound,
            ToolError::ElementOffscreen(_) => ActionResultCode::ElementOffscreen,
            ToolError::FrameWentAway => ActionResultCode::FrameWentAway,
            ToolError::TabWentAway => ActionResultCode::TabWentAway,
            ToolError::InvalidArguments(_) => ActionResultCode::ArgumentsInvalid,
            ToolError::Failed(_) => ActionResultCode::Error,
        }
    }
}

impl From<ToolError> for ActionResult {
    fn from(err: ToolError) -> Self {
        ActionResult::with_message(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::InvalidTransition(EngineState::Init, EngineState::UiPostTool);
        assert_eq!(
            err.to_string(),
            "Invalid engine transition: init -> ui_post_tool"
        );
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::NotFound(TaskId(9));
        assert_eq!(err.to_string(), "Task not found: task-9");

        let err = TaskError::InvalidTransition(TaskState::Finished, TaskState::Acting);
        assert_eq!(err.to_string(), "Invalid state transition: finished -> acting");
    }

    #[test]
    fn test_translate_error_becomes_arguments_invalid() {
        let result: ActionResult = TranslateError::MissingTarget(ToolKind::Click).into();
        assert_eq!(result.code, ActionResultCode::ArgumentsInvalid);
        assert_eq!(
            result.message.as_deref(),
            Some("click requires a node or point target")
        );
    }

    #[test]
    fn test_tool_error_codes() {
        let cases = [
            (
                ToolError::ElementNotFound("#go".into()),
                ActionResultCode::ElementNotFound,
            ),
            (
                ToolError::ElementOffscreen("#go".into()),
                ActionResultCode::ElementOffscreen,
            ),
            (ToolError::FrameWentAway, ActionResultCode::FrameWentAway),
            (ToolError::TabWentAway, ActionResultCode::TabWentAway),
            (
                ToolError::InvalidArguments("x".into()),
                ActionResultCode::ArgumentsInvalid,
            ),
            (ToolError::Failed("boom".into()), ActionResultCode::Error),
        ];
        for (err, code) in cases {
            let result: ActionResult = err.into();
            assert_eq!(result.code, code);
            assert!(result.message.is_some());
        }
    }
}
