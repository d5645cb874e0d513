//! FIFO task board: pending and done task descriptions.
//!
//! Invariants:
//! - a task string is never in both `pending` and `done`;
//! - `done` only grows, and only by moving the front of `pending`;
//! - new tasks are appended to the tail of `pending`.

use serde::{Deserialize, Serialize};

/// Task that stands for opening the remote session. Seeded at run start.
pub const BOOTSTRAP_TASK: &str = "Establish remote session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBoard {
    pending: Vec<String>,
    done: Vec<String>,
    /// Suppress tasks already pending or done.
    #[serde(default = "default_dedup")]
    dedup: bool,
}

fn default_dedup() -> bool {
    true
}

impl TaskBoard {
    /// Empty board. `dedup` selects whether repeated task strings are dropped.
    pub fn new(dedup: bool) -> Self {
        Self {
            pending: Vec::new(),
            done: Vec::new(),
            dedup,
        }
    }

    /// Board pre-seeded with [`BOOTSTRAP_TASK`].
    pub fn with_bootstrap(dedup: bool) -> Self {
        let mut board = Self::new(dedup);
        board.pending.push(BOOTSTRAP_TASK.to_string());
        board
    }

    /// Append `task` to the tail of `pending`.
    ///
    /// Returns `false` when the task was dropped: blank, or (with dedup on)
    /// already pending or done. A task already in `done` is always dropped,
    /// dedup or not, so the two lists stay disjoint.
    pub fn enqueue(&mut self, task: &str) -> bool {
        let task = task.trim();
        if task.is_empty() || self.done.iter().any(|t| t == task) {
            return false;
        }
        if self.dedup && self.pending.iter().any(|t| t == task) {
            return false;
        }
        self.pending.push(task.to_string());
        true
    }

    /// Move `pending[0]` to the tail of `done`. No-op when nothing is pending.
    ///
    /// Other pending copies of the same string are dropped with it so that the
    /// lists stay disjoint when dedup is off.
    pub fn complete_front(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let task = self.pending.remove(0);
        self.pending.retain(|t| *t != task);
        self.done.push(task.clone());
        Some(task)
    }

    /// Mark a specific task done, wherever it sits in `pending`.
    ///
    /// Returns `false` if the task was already done or is blank.
    pub fn complete(&mut self, task: &str) -> bool {
        let task = task.trim();
        if task.is_empty() || self.is_done(task) {
            return false;
        }
        self.pending.retain(|t| t != task);
        self.done.push(task.to_string());
        true
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn done(&self) -> &[String] {
        &self.done
    }

    /// The task at the front of `pending`.
    pub fn current(&self) -> Option<&str> {
        self.pending.first().map(String::as_str)
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_done(&self, task: &str) -> bool {
        self.done.iter().any(|t| t == task)
    }
}
