//! Shared deterministic types for agent core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;

/// Host plus password credentials, immutable for the life of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// The next shell command chosen by the planner.
///
/// `input` is one line to supply if the command blocks on an interactive
/// prompt; an empty string means "nothing to answer".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCommand {
    pub command: String,
    pub input: String,
}

impl PlannedCommand {
    /// Planner-supplied input, or `None` when it is blank.
    pub fn input(&self) -> Option<&str> {
        let trimmed = self.input.trim();
        (!trimmed.is_empty()).then_some(self.input.as_str())
    }
}

/// Structured summarizer reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<String>,
    #[serde(
        default,
        rename = "next-phase",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_phase: Option<String>,
}

impl SummaryRecord {
    /// Suggested follow-up task, if the summarizer gave a non-blank one.
    pub fn todo(&self) -> Option<&str> {
        self.todo
            .as_deref()
            .map(str::trim)
            .filter(|todo| !todo.is_empty())
    }

    /// Declared next phase, if the summarizer gave a non-blank one.
    pub fn next_phase(&self) -> Option<&str> {
        self.next_phase
            .as_deref()
            .map(str::trim)
            .filter(|phase| !phase.is_empty())
    }
}

/// Captured result of one remote command.
///
/// `error` holds whatever the remote side wrote to a distinct error stream;
/// it is never merged into `output`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub output: String,
    pub error: String,
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    pub input_sent: bool,
}

impl CommandResult {
    pub fn has_error(&self) -> bool {
        !self.error.trim().is_empty()
    }

    /// Output as shown to the summarizer: stdout followed by any error text.
    pub fn combined(&self) -> String {
        let mut text = self.output.clone();
        if self.has_error() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("Error: ");
            text.push_str(self.error.trim_end());
        }
        if self.timed_out {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("[command timed out]");
        }
        text
    }
}

/// One executed-command/output/summary record of a run.
///
/// Written once per iteration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub timestamp: DateTime<Utc>,
    pub iteration: u32,
    pub phase: Phase,
    pub command: String,
    pub input: Option<String>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
}
