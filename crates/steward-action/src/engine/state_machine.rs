//! Execution engine state machine with validated transitions.
//!
//! Init -> StartAction -> UiPreTool -> ToolController -> UiPostTool -> StartAction ...
//! Every state may fall through to Complete; Complete may start a new batch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Phase of the per-action loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Init,
    StartAction,
    UiPreTool,
    ToolController,
    UiPostTool,
    Complete,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Init => write!(f, "init"),
            EngineState::StartAction => write!(f, "start_action"),
            EngineState::UiPreTool => write!(f, "ui_pre_tool"),
            EngineState::ToolController => write!(f, "tool_controller"),
            EngineState::UiPostTool => write!(f, "ui_post_tool"),
            EngineState::Complete => write!(f, "complete"),
        }
    }
}

/// Validate that an engine transition is allowed.
///
/// Valid transitions:
/// - Init -> StartAction | Complete
/// - StartAction -> UiPreTool | Complete
/// - UiPreTool -> ToolController | Complete
/// - ToolController -> UiPostTool | Complete
/// - UiPostTool -> StartAction | Complete
/// - Complete -> StartAction
pub fn validate_transition(from: EngineState, to: EngineState) -> Result<(), EngineError> {
    use EngineState::*;

    let valid = matches!(
        (from, to),
        (Init, StartAction)
            | (Init, Complete)
            | (StartAction, UiPreTool)
            | (StartAction, Complete)
            | (UiPreTool, ToolController)
            | (UiPreTool, Complete)
            | (ToolController, UiPostTool)
            | (ToolController, Complete)
            | (UiPostTool, StartAction)
            | (UiPostTool, Complete)
            | (Complete, StartAction)
    );

    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EngineState::*;

    const ALL: [EngineState; 6] = [Init, StartAction, UiPreTool, ToolController, UiPostTool, Complete];

    #[test]
    fn test_happy_path_chain() {
        let chain = [Init, StartAction, UiPreTool, ToolController, UiPostTool, StartAction];
        for pair in chain.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{:?}", pair);
        }
    }

    #[test]
    fn test_every_working_state_may_complete() {
        for from in [Init, StartAction, UiPreTool, ToolController, UiPostTool] {
            assert!(validate_transition(from, Complete).is_ok(), "{from}");
        }
    }

    #[test]
    fn test_complete_restarts_only_via_start_action() {
        assert!(validate_transition(Complete, StartAction).is_ok());
        for to in [Init, UiPreTool, ToolController, UiPostTool, Complete] {
            assert!(validate_transition(Complete, to).is_err(), "{to}");
        }
    }

    #[test]
    fn test_no_skipping_hooks() {
        assert!(validate_transition(StartAction, ToolController).is_err());
        assert!(validate_transition(UiPreTool, UiPostTool).is_err());
        assert!(validate_transition(ToolController, StartAction).is_err());
        assert!(validate_transition(Init, UiPreTool).is_err());
    }

    #[test]
    fn test_no_self_loops() {
        for state in ALL {
            assert!(validate_transition(state, state).is_err(), "{state}");
        }
    }

    #[test]
    fn test_nothing_returns_to_init() {
        for from in ALL {
            assert!(validate_transition(from, Init).is_err(), "{from}");
        }
    }

    #[test]
    fn test_all_valid_transitions_count() {
        let mut valid_count = 0;
        for from in ALL {
            for to in ALL {
                if validate_transition(from, to).is_ok() {
                    valid_count += 1;
                }
            }
        }
        assert_eq!(valid_count, 11, "Expected exactly 11 valid transitions");
    }

    #[test]
    fn test_invalid_transition_error_message() {
        let err = validate_transition(Complete, UiPreTool).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("complete"));
        assert!(msg.contains("ui_pre_tool"));
    }
}
