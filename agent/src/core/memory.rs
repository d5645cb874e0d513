//! Append-only log of step records for one run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::types::StepRecord;

/// Ordered, append-only sequence of [`StepRecord`]s.
///
/// Insertion order is the causal order of the run. Entries are never removed
/// or reordered; every view (latest step, anti-repetition hints) is derived
/// by reading the sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryLog {
    steps: Vec<StepRecord>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    pub fn latest(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct non-blank commands whose step ran in a phase named `filter`
    /// or whose summary mentions it (ASCII case-insensitive).
    pub fn all_commands_for(&self, filter: &str) -> BTreeSet<String> {
        let needle = filter.trim().to_lowercase();
        self.steps
            .iter()
            .filter(|step| !step.command.trim().is_empty())
            .filter(|step| {
                needle.is_empty()
                    || step.phase.as_str().to_lowercase() == needle
                    || step.summary.to_lowercase().contains(&needle)
            })
            .map(|step| step.command.clone())
            .collect()
    }
}
