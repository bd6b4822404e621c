//! Task state machine with validated transitions.
//!
//! Created -> Acting | Reflecting | PausedByClient | Finished
//! Acting, Reflecting and PausedByClient move freely among each other and to
//! Finished. Finished is terminal and nothing returns to Created.

use steward_core::TaskState;

use crate::error::TaskError;

/// Validate that a task state transition is allowed.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), TaskError> {
    use TaskState::*;

    let valid = match from {
        Created => matches!(to, Acting | Reflecting | PausedByClient | Finished),
        Acting => matches!(to, Reflecting | PausedByClient | Finished),
        Reflecting => matches!(to, Acting | PausedByClient | Finished),
        PausedByClient => matches!(to, Acting | Reflecting | Finished),
        Finished => false,
    };

    if valid {
        Ok(())
    } else {
        Err(TaskError::InvalidTransition(from, to))
    }
}
