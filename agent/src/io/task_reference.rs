//! Read-only table of suggested tasks per phase.
//!
//! The orchestrator falls back to it when the planner cannot produce a
//! command: the first suggested task of the current phase that is not yet
//! done becomes the nudge task.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::phase::Phase;

/// Embedded default table, also written by `agent init`.
pub const DEFAULT_TASK_REFERENCE: &str = include_str!("defaults/task_reference.json");
pub const DEFAULT_TASK_REFERENCE_FILE: &str = "task_reference.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReference {
    tasks: BTreeMap<Phase, Vec<String>>,
}

impl TaskReference {
    /// A reference with no suggestions at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a `{"<phase name>": ["task", ...]}` table.
    ///
    /// Phase keys must name a known phase; blank tasks are skipped.
    pub fn parse(raw: &str) -> Result<Self> {
        let table: BTreeMap<String, Vec<String>> =
            serde_json::from_str(raw).context("parse task reference json")?;
        let mut tasks = BTreeMap::new();
        for (name, list) in table {
            let phase = Phase::parse(&name)
                .ok_or_else(|| anyhow!("task reference names unknown phase {name:?}"))?;
            let list: Vec<String> = list
                .into_iter()
                .map(|task| task.trim().to_string())
                .filter(|task| !task.is_empty())
                .collect();
            tasks.insert(phase, list);
        }
        Ok(Self { tasks })
    }

    pub fn available(&self, phase: Phase) -> &[String] {
        self.tasks.get(&phase).map_or(&[], Vec::as_slice)
    }

    /// First suggested task for `phase` that is not in `done`.
    pub fn suggest_next_task<D: AsRef<str>>(&self, phase: Phase, done: &[D]) -> Option<&str> {
        self.available(phase)
            .iter()
            .find(|task| !done.iter().any(|d| d.as_ref() == task.as_str()))
            .map(String::as_str)
    }
}

/// Load the table at `path`, or the embedded default when `path` is `None`.
pub fn load_task_reference(path: Option<&Path>) -> Result<TaskReference> {
    let Some(path) = path else {
        return TaskReference::parse(DEFAULT_TASK_REFERENCE).context("embedded task reference");
    };
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let reference =
        TaskReference::parse(&raw).with_context(|| format!("load {}", path.display()))?;
    debug!(path = %path.display(), phases = reference.tasks.len(), "loaded task reference");
    Ok(reference)
}
