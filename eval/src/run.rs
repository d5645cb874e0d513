//! Case execution orchestration.
//!
//! Coordinates workspace creation, the agent run, and result capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent::io::config::{AgentConfig, write_config};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::harness::{build_agent_binary, run_agent};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};
use crate::workspace::create_workspace;

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    pub outcome: Outcome,
    pub flags_found: usize,
}

/// Run a case end-to-end: workspace creation, agent run, result capture.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(repo_root: &Path, case_path: &Path, case: &CaseFile) -> Result<RunOutcome> {
    info!("case run started");

    debug!("building agent binary");
    let agent_binary = build_agent_binary(repo_root)?;
    if !agent_binary.exists() {
        bail!("agent binary not found at {}", agent_binary.display());
    }

    debug!("creating workspace");
    let workspace_base = repo_root.join("eval").join("workspaces");
    let workspace =
        create_workspace(&workspace_base, &case.case.id).context("create workspace")?;

    let cfg = apply_case_config(AgentConfig::default(), case, &workspace.run_dir)?;
    write_config(&workspace.config_path, &cfg).context("write agent config")?;

    let started_at = Utc::now();
    let eval_run_id = format!("eval-{}", started_at.format("%Y%m%d_%H%M%S"));
    let logs_dir = repo_root
        .join("eval")
        .join("results")
        .join(&case.case.id)
        .join(&eval_run_id);

    debug!("running agent");
    let exit = run_agent(
        &agent_binary,
        &workspace.root,
        &workspace.config_path,
        &logs_dir,
        &case.env,
        case.config.timeout_secs.map(Duration::from_secs),
    )
    .context("run agent")?;
    let finished_at = Utc::now();

    let duration = finished_at - started_at;
    info!(
        exit_code = ?exit.code,
        timed_out = exit.timed_out,
        duration_secs = duration.num_milliseconds() as f64 / 1000.0,
        "agent run finished"
    );

    debug!("capturing results");
    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        eval_run_id: &eval_run_id,
        agent_binary: &agent_binary,
        exit,
        expected_flags: case.expect.flags,
        started_at,
        finished_at,
        workspace: &workspace,
        repo_root,
    };
    let captured = capture_results(&repo_root.join("eval").join("results"), &capture_input)
        .context("capture results")?;

    let outcome = classify_outcome(exit, captured.report.as_ref(), case.expect.flags);
    update_outcome(&captured.results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %captured.results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir: captured.results_dir,
        outcome,
        flags_found: captured.report.map_or(0, |report| report.flags.len()),
    })
}
