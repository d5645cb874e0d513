//! End-of-run report (`report.json`), also read back by the eval harness.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::budget::{StopReason, TerminalState};
use crate::core::phase::Phase;
use crate::io::config::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub terminal_state: TerminalState,
    pub iterations: u32,
    pub flags: Vec<String>,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub summary: String,
    pub tasks_done: Vec<String>,
    pub tasks_pending: Vec<String>,
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_with_screaming_terminal_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.json");
        let now = Utc::now();
        let report = RunReport {
            run_id: "run-1".to_string(),
            stop_reason: StopReason::Goal,
            terminal_state: StopReason::Goal.terminal_state(),
            iterations: 4,
            flags: vec!["flag{abc}".to_string()],
            phase: Phase::Exploitation,
            started_at: now,
            ended_at: now,
            summary: "Read the flag.".to_string(),
            tasks_done: vec!["Establish remote session".to_string()],
            tasks_pending: Vec::new(),
        };

        write_report(&path, &report).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"TERMINATED_GOAL\""));
        assert!(raw.contains("\"stop_reason\": \"goal\""));
        assert_eq!(load_report(&path).expect("load"), report);
    }
}
