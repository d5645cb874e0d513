use agent::core::budget::TerminalState;
use agent::exit_codes;
use agent::io::report::RunReport;
use serde::{Deserialize, Serialize};

use crate::harness::AgentExit;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Goal reached with at least the expected flags.
    Success,
    /// The run stopped on its budget or failure cap.
    Fail,
    Error,
}

pub fn classify_outcome(exit: AgentExit, report: Option<&RunReport>, expected_flags: usize) -> Outcome {
    let Some(report) = report else {
        return Outcome::Error;
    };
    if exit.timed_out {
        return Outcome::Error;
    }
    match (exit.code, report.terminal_state) {
        (Some(exit_codes::OK), TerminalState::TerminatedGoal) => {
            if report.flags.len() >= expected_flags {
                Outcome::Success
            } else {
                Outcome::Fail
            }
        }
        (Some(exit_codes::BUDGET), TerminalState::TerminatedBudget)
        | (Some(exit_codes::FAILURE), TerminalState::TerminatedFailure) => Outcome::Fail,
        _ => Outcome::Error,
    }
}
