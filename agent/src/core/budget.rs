//! Iteration budget and termination checks for the run loop.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed caps for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: u32,
    pub max_consecutive_failures: u32,
    pub flags_required: usize,
}

/// Counters the loop advances after each iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopCounters {
    /// Iterations completed so far.
    pub iterations: u32,
    pub consecutive_failures: u32,
}

impl LoopCounters {
    pub fn record_success(&mut self) {
        self.iterations += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.iterations += 1;
        self.consecutive_failures += 1;
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Enough flags were captured.
    Goal,
    /// Consecutive failures reached the cap.
    FailureCap,
    /// Planning failed and no fallback task was available.
    NoProgress,
    /// The iteration cap was reached.
    Budget,
}

impl StopReason {
    pub fn terminal_state(self) -> TerminalState {
        match self {
            StopReason::Goal => TerminalState::TerminatedGoal,
            StopReason::Budget => TerminalState::TerminatedBudget,
            StopReason::FailureCap | StopReason::NoProgress => TerminalState::TerminatedFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Goal => "goal",
            StopReason::FailureCap => "failure_cap",
            StopReason::NoProgress => "no_progress",
            StopReason::Budget => "budget",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal states of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    TerminatedGoal,
    TerminatedBudget,
    TerminatedFailure,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::TerminatedGoal => "TERMINATED_GOAL",
            TerminalState::TerminatedBudget => "TERMINATED_BUDGET",
            TerminalState::TerminatedFailure => "TERMINATED_FAILURE",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Termination check after an iteration, in priority order: goal, failure
/// cap, iteration cap.
pub fn check_termination(
    limits: &LoopLimits,
    counters: &LoopCounters,
    flags_found: usize,
) -> Option<StopReason> {
    if flags_found >= limits.flags_required {
        return Some(StopReason::Goal);
    }
    if counters.consecutive_failures >= limits.max_consecutive_failures {
        return Some(StopReason::FailureCap);
    }
    if counters.iterations >= limits.max_iterations {
        return Some(StopReason::Budget);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LoopLimits {
        LoopLimits {
            max_iterations: 20,
            max_consecutive_failures: 3,
            flags_required: 1,
        }
    }

    #[test]
    fn success_resets_failure_counter() {
        let mut counters = LoopCounters::default();
        counters.record_failure();
        counters.record_failure();
        counters.record_success();
        assert_eq!(counters.consecutive_failures, 0);
        assert_eq!(counters.iterations, 3);
    }

    #[test]
    fn failure_cap_fires_before_budget() {
        let mut counters = LoopCounters::default();
        let mut stop = None;
        while stop.is_none() {
            counters.record_failure();
            stop = check_termination(&limits(), &counters, 0);
        }
        assert_eq!(stop, Some(StopReason::FailureCap));
        assert_eq!(counters.iterations, 3);
    }

    #[test]
    fn goal_wins_over_everything() {
        let counters = LoopCounters {
            iterations: 20,
            consecutive_failures: 3,
        };
        assert_eq!(
            check_termination(&limits(), &counters, 1),
            Some(StopReason::Goal)
        );
    }

    #[test]
    fn budget_stops_at_max_iterations() {
        let mut counters = LoopCounters::default();
        for _ in 0..19 {
            counters.record_success();
            assert_eq!(check_termination(&limits(), &counters, 0), None);
        }
        counters.record_success();
        assert_eq!(
            check_termination(&limits(), &counters, 0),
            Some(StopReason::Budget)
        );
        assert_eq!(
            StopReason::Budget.terminal_state(),
            TerminalState::TerminatedBudget
        );
    }

    #[test]
    fn no_progress_is_a_failure() {
        assert_eq!(
            StopReason::NoProgress.terminal_state(),
            TerminalState::TerminatedFailure
        );
    }
}
