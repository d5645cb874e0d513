//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::outcome::Outcome;
use crate::report::aggregate;
use crate::run::run_case;

fn eval_dir(repo_root: &Path, sub: &str) -> PathBuf {
    repo_root.join("eval").join(sub)
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&eval_dir(repo_root, "cases"))? {
        println!(
            "{}\tflags={}\t{}",
            case.case.id, case.expect.flags, case.case.description
        );
    }
    Ok(())
}

/// Run a case by id (optionally multiple times).
pub fn run_case_by_id(repo_root: &Path, case_id: &str, runs: u32) -> Result<()> {
    let case_path = eval_dir(repo_root, "cases").join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    debug!(case_id, target = %case.target.host, "case loaded");

    info!(case_id, runs, "starting runs");
    let mut successes = 0;
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(repo_root, &case_path, &case).context("run case")?;
        if outcome.outcome == Outcome::Success {
            successes += 1;
        }
        println!(
            "run: case={} eval_run_id={} outcome={:?} flags={}/{} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.flags_found,
            case.expect.flags,
            outcome.results_dir.display()
        );
    }
    println!("run: case={case_id} success={successes}/{runs}");
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let (summary, warnings) = aggregate(&eval_dir(repo_root, "results").join(case_id))?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} error={} flags={}",
        summary.success, summary.fail, summary.error, summary.total_flags
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={avg:.2}");
    }
    if let Some(per_flag) = summary.avg_secs_per_flag {
        println!("report: avg_secs_per_flag={per_flag:.2}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Remove workspaces and results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let workspaces_dir = eval_dir(repo_root, "workspaces");
    let case_results = eval_dir(repo_root, "results").join(case_id);

    // Workspace names are `<case_id>_<timestamp>_<suffix>`.
    let prefix = format!("{case_id}_");
    let mut removed = 0;
    if workspaces_dir.exists() {
        for entry in fs::read_dir(&workspaces_dir)
            .with_context(|| format!("read {}", workspaces_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_dir_all(entry.path())
                    .with_context(|| format!("remove {}", entry.path().display()))?;
                removed += 1;
            }
        }
    }

    if case_results.exists() {
        fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!(
        "clean: case={} workspaces_removed={} results={}",
        case_id,
        removed,
        case_results.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_only_removes_matching_case() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let workspaces = eval_dir(root, "workspaces");
        fs::create_dir_all(workspaces.join("web_20260101_000000_abc123")).expect("ws");
        fs::create_dir_all(workspaces.join("web-2_20260101_000000_def456")).expect("other ws");
        fs::create_dir_all(eval_dir(root, "results").join("web/eval-1")).expect("results");

        clean_case(root, "web").expect("clean");

        assert!(!workspaces.join("web_20260101_000000_abc123").exists());
        assert!(workspaces.join("web-2_20260101_000000_def456").exists());
        assert!(!eval_dir(root, "results").join("web").exists());
    }
}
