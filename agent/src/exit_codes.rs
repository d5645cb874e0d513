//! Stable exit codes for agent CLI commands.

use crate::core::budget::TerminalState;

/// Command succeeded, or a run reached `TERMINATED_GOAL`.
pub const OK: i32 = 0;
/// Invalid config, unreachable remote session, or any other error.
pub const INVALID: i32 = 1;
/// The run ended in `TERMINATED_BUDGET`.
pub const BUDGET: i32 = 2;
/// The run ended in `TERMINATED_FAILURE`.
pub const FAILURE: i32 = 3;

/// Exit code for a finished run.
pub fn for_terminal_state(state: TerminalState) -> i32 {
    match state {
        TerminalState::TerminatedGoal => OK,
        TerminalState::TerminatedBudget => BUDGET,
        TerminalState::TerminatedFailure => FAILURE,
    }
}
