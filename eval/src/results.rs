//! Per-run artifacts under `eval/results/<case>/<eval_run_id>/`.
//!
//! The agent's report, memory log, run state and iteration records are copied
//! next to a `meta.json` describing the eval run itself. Capture never fails
//! on a missing artifact; problems are listed in `meta.errors`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use agent::core::budget::TerminalState;
use agent::io::process::run_command_with_timeout;
use agent::io::report::{RunReport, load_report};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::harness::AgentExit;
use crate::outcome::Outcome;
use crate::workspace::Workspace;

const ARTIFACTS: [&str; 4] = ["report.json", "memory.json", "run_state.json", "iterations"];
const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything known about a finished agent process.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub agent_binary: &'a Path,
    pub exit: AgentExit,
    pub expected_flags: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspace: &'a Workspace,
    pub repo_root: &'a Path,
}

/// Contents of `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// sha256 of the case file as it was when the run started.
    pub case_hash: String,
    pub agent_git_sha: Option<String>,
    pub agent_binary: String,
    pub agent_run_id: Option<String>,
    /// Filled in after classification.
    pub outcome: Option<Outcome>,
    pub terminal_state: Option<TerminalState>,
    pub flags_found: usize,
    pub expected_flags: usize,
    pub iterations: Option<u32>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub workspace: String,
    pub errors: Vec<String>,
}

/// What [`capture_results`] produced.
#[derive(Debug)]
pub struct Captured {
    pub results_dir: PathBuf,
    /// The agent's `report.json`, when the run got far enough to write one.
    pub report: Option<RunReport>,
}

#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<Captured> {
    let dest = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
    let mut errors = Vec::new();

    let case_hash = sha256_hex(input.case_path).unwrap_or_else(|err| {
        errors.push(format!("case hash: {err:#}"));
        String::new()
    });
    let agent_git_sha = head_sha(input.repo_root)
        .map_err(|err| errors.push(format!("agent git sha: {err:#}")))
        .ok();
    let agent_run = input.workspace.agent_run().unwrap_or_else(|err| {
        errors.push(format!("agent run: {err:#}"));
        None
    });

    let report = match &agent_run {
        Some((_, run_dir)) => {
            for name in ARTIFACTS {
                if let Err(err) = copy_artifact(&run_dir.join(name), &dest.join(name)) {
                    errors.push(format!("{name}: {err:#}"));
                }
            }
            let path = run_dir.join("report.json");
            if path.exists() {
                load_report(&path)
                    .map_err(|err| errors.push(format!("report: {err:#}")))
                    .ok()
            } else {
                None
            }
        }
        None => {
            errors.push("agent run: no run directory".to_string());
            None
        }
    };
    if !errors.is_empty() {
        warn!(?errors, "artifact capture incomplete");
    }

    let elapsed = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        agent_git_sha,
        agent_binary: input.agent_binary.display().to_string(),
        agent_run_id: agent_run.map(|(id, _)| id),
        outcome: None,
        terminal_state: report.as_ref().map(|r| r.terminal_state),
        flags_found: report.as_ref().map_or(0, |r| r.flags.len()),
        expected_flags: input.expected_flags,
        iterations: report.as_ref().map(|r| r.iterations),
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: elapsed.num_milliseconds() as f64 / 1000.0,
        exit_code: input.exit.code,
        timed_out: input.exit.timed_out,
        workspace: input.workspace.root.display().to_string(),
        errors,
    };
    write_meta(&dest.join("meta.json"), &meta)?;
    debug!(results_dir = %dest.display(), "results captured");

    Ok(Captured {
        results_dir: dest,
        report,
    })
}

/// Record the classified outcome in an existing `meta.json`.
pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let path = results_dir.join("meta.json");
    let meta = EvalMeta {
        outcome: Some(outcome),
        ..read_meta(&path)?
    };
    write_meta(&path, &meta)
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let mut json = serde_json::to_string_pretty(meta).context("serialize meta")?;
    json.push('\n');
    fs::write(path, json).with_context(|| format!("write {}", path.display()))
}

fn sha256_hex(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

fn head_sha(repo_root: &Path) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(["rev-parse", "HEAD"]).current_dir(repo_root);
    let out = run_command_with_timeout(cmd, None, GIT_TIMEOUT, 256).context("git rev-parse")?;
    if !out.status.success() {
        bail!("git rev-parse failed: {}", out.stderr_lossy().trim());
    }
    Ok(out.stdout_lossy().trim().to_string())
}

/// Copy a file, or a directory tree, from `src` to `dst`.
fn copy_artifact(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        bail!("missing {}", src.display());
    }
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(src, dst).with_context(|| format!("copy {}", src.display()))?;
        return Ok(());
    }
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("list {}", src.display()))? {
        let name = entry.context("dir entry")?.file_name();
        copy_artifact(&src.join(&name), &dst.join(&name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::core::budget::StopReason;
    use agent::core::phase::Phase;
    use agent::io::report::write_report;
    use tempfile::tempdir;

    use crate::workspace::create_workspace;

    #[test]
    fn results_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = results_dir(base, "case", "run-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/run-1"));
    }

    #[test]
    fn copies_artifacts_and_reads_report() {
        let temp = tempdir().expect("tempdir");
        let workspace = create_workspace(&temp.path().join("workspaces"), "case").expect("ws");
        let run_dir = workspace.run_dir.join("runs/run-20260101_000000");
        fs::create_dir_all(run_dir.join("iterations/1")).expect("iterations");
        fs::write(run_dir.join("iterations/1/meta.json"), "{}").expect("iter");
        fs::write(run_dir.join("memory.json"), "{\"steps\": []}\n").expect("memory");
        fs::write(run_dir.join("run_state.json"), "{}").expect("state");
        let now = Utc::now();
        write_report(
            &run_dir.join("report.json"),
            &RunReport {
                run_id: "run-20260101_000000".to_string(),
                stop_reason: StopReason::Goal,
                terminal_state: StopReason::Goal.terminal_state(),
                iterations: 3,
                flags: vec!["flag{a}".to_string()],
                phase: Phase::Exploitation,
                started_at: now,
                ended_at: now,
                summary: String::new(),
                tasks_done: Vec::new(),
                tasks_pending: Vec::new(),
            },
        )
        .expect("report");

        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "[case]\nid='case'\n").expect("case");
        let input = CaptureInput {
            case_id: "case",
            case_path: &case_path,
            eval_run_id: "eval-1",
            agent_binary: Path::new("/bin/agent"),
            exit: AgentExit {
                code: Some(0),
                timed_out: false,
            },
            expected_flags: 1,
            started_at: now,
            finished_at: now,
            workspace: &workspace,
            repo_root: temp.path(),
        };

        let captured = capture_results(&temp.path().join("results"), &input).expect("capture");
        let dir = &captured.results_dir;
        assert!(dir.join("report.json").exists());
        assert!(dir.join("memory.json").exists());
        assert!(dir.join("iterations/1/meta.json").exists());
        assert_eq!(captured.report.expect("report").iterations, 3);

        let meta = read_meta(&dir.join("meta.json")).expect("meta");
        assert_eq!(meta.agent_run_id.as_deref(), Some("run-20260101_000000"));
        assert_eq!(meta.flags_found, 1);
        assert_eq!(meta.terminal_state, Some(TerminalState::TerminatedGoal));
        assert!(!meta.case_hash.is_empty());
    }

    #[test]
    fn missing_run_is_recorded_as_error() {
        let temp = tempdir().expect("tempdir");
        let workspace = create_workspace(&temp.path().join("workspaces"), "case").expect("ws");
        let input = CaptureInput {
            case_id: "case",
            case_path: Path::new("/nonexistent/case.toml"),
            eval_run_id: "eval-2",
            agent_binary: Path::new("/bin/agent"),
            exit: AgentExit {
                code: Some(1),
                timed_out: false,
            },
            expected_flags: 1,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            workspace: &workspace,
            repo_root: temp.path(),
        };

        let captured = capture_results(&temp.path().join("results"), &input).expect("capture");
        assert!(captured.report.is_none());
        let meta = read_meta(&captured.results_dir.join("meta.json")).expect("meta");
        assert!(meta.errors.iter().any(|err| err.contains("no run directory")));
        assert!(meta.errors.iter().any(|err| err.starts_with("case hash")));
        assert_eq!(meta.flags_found, 0);
    }
}
