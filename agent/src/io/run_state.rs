//! Run state storage (`<run_dir>/runs/<run_id>/run_state.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::budget::{LoopCounters, StopReason};
use crate::core::flags::FlagSet;
use crate::core::phase::PhaseState;
use crate::core::task_board::TaskBoard;
use crate::io::config::write_atomic;

/// Everything the loop carries between iterations, rewritten after each one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: String,
    /// Next iteration number (1-indexed, monotonically increasing).
    pub next_iteration: u32,
    pub phase: PhaseState,
    /// Running summary; never cleared by a failed summarization.
    pub summary: String,
    pub tasks: TaskBoard,
    pub flags: FlagSet,
    pub counters: LoopCounters,
    /// Set once the run reached a terminal state.
    pub stop_reason: Option<StopReason>,
}

impl RunState {
    /// State of a run that has not executed any iteration yet.
    pub fn new(run_id: impl Into<String>, dedup_tasks: bool) -> Self {
        Self {
            run_id: run_id.into(),
            next_iteration: 1,
            phase: PhaseState::new(),
            summary: String::new(),
            tasks: TaskBoard::with_bootstrap(dedup_tasks),
            flags: FlagSet::new(),
            counters: LoopCounters::default(),
            stop_reason: None,
        }
    }
}

pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(run_id = %state.run_id, next_iteration = state.next_iteration, "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(run_id = %state.run_id, next_iteration = state.next_iteration, "writing run state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task_board::BOOTSTRAP_TASK;

    #[test]
    fn run_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");

        let mut state = RunState::new("run-123", true);
        state.tasks.complete_front();
        state.tasks.enqueue("Enumerate HTTP service");
        state.flags.detect("cat: flag{abc}");
        state.counters.record_failure();
        state.summary = "Port 80 open.".to_string();
        state.stop_reason = Some(StopReason::FailureCap);

        write_run_state(&path, &state).expect("write");
        let loaded = load_run_state(&path).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn new_state_is_seeded_with_bootstrap_task() {
        let state = RunState::new("run-1", true);
        assert_eq!(state.next_iteration, 1);
        assert_eq!(state.tasks.current(), Some(BOOTSTRAP_TASK));
        assert!(state.flags.is_empty());
        assert_eq!(state.stop_reason, None);
    }

    #[test]
    fn serialized_field_names_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        write_run_state(&path, &RunState::new("run-1", false)).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["phase"]["current"], "Enumeration");
        assert_eq!(value["counters"]["consecutive_failures"], 0);
        assert_eq!(value["stop_reason"], serde_json::Value::Null);
        assert_eq!(value["tasks"]["pending"][0], BOOTSTRAP_TASK);
    }
}
