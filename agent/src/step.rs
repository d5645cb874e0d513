//! Orchestration for a single iteration of the agent loop.
//!
//! An iteration either opens the remote session (bootstrap) or runs
//! plan → execute → summarize and folds the result into the run state. Every
//! iteration is persisted (memory log, run state, iteration artifacts) before
//! the next one starts.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::agents::planner::{Plan, PlanContext, PlanError, Planner};
use crate::agents::summarizer::{Summarizer, Summary};
use crate::core::budget::{StopReason, check_termination};
use crate::core::memory::MemoryLog;
use crate::core::phase::{Phase, PhasePolicy};
use crate::core::task_board::BOOTSTRAP_TASK;
use crate::core::tasks::extract_tasks;
use crate::core::types::{CommandResult, StepRecord};
use crate::io::config::{AgentConfig, InputPolicy};
use crate::io::iteration_log::{
    IterationMeta, IterationStatus, IterationWriteRequest, write_iteration,
};
use crate::io::oracle::Oracle;
use crate::io::remote::{RemoteShell, connect_with_retry};
use crate::io::report::{RunReport, write_report};
use crate::io::retrieval::Retriever;
use crate::io::run_dir::{RunPaths, create_run, write_memory};
use crate::io::run_state::{RunState, write_run_state};
use crate::io::task_reference::TaskReference;

/// Collaborators an [`Agent`] is built from.
pub struct AgentParts<P, S, R> {
    pub config: AgentConfig,
    pub planner: P,
    pub summarizer: S,
    pub shell: R,
    pub reference: TaskReference,
    pub retriever: Option<Box<dyn Retriever>>,
}

/// Which stage of an iteration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Connect,
    Plan,
    Execute,
    Summarize,
}

impl fmt::Display for FailedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailedStage::Connect => "connect",
            FailedStage::Plan => "plan",
            FailedStage::Execute => "execute",
            FailedStage::Summarize => "summarize",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The remote session was opened.
    Bootstrap,
    /// Plan, execute, and summarize all succeeded.
    Completed,
    /// One stage failed; the iteration counts towards the failure cap.
    Failed { stage: FailedStage, reason: String },
    /// Planning failed and there was no fallback task to nudge with.
    NoProgress,
}

/// Result of one iteration.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub run_id: String,
    pub iteration: u32,
    /// Phase the iteration ran in.
    pub phase: Phase,
    pub status: StepStatus,
    /// Step record appended to the memory log, if a command was executed.
    pub record: Option<StepRecord>,
    pub new_flags: Vec<String>,
    pub phase_change: Option<Phase>,
    /// Set when this iteration ended the run.
    pub stop: Option<StopReason>,
}

/// Artifacts gathered while an iteration runs, for the audit log.
#[derive(Debug, Default)]
struct IterationDraft {
    command: Option<String>,
    planner_prompt: Option<String>,
    summarizer_prompt: Option<String>,
    output: Option<String>,
    fallback_task: Option<String>,
    result: Option<CommandResult>,
    record: Option<StepRecord>,
    new_flags: Vec<String>,
    phase_change: Option<Phase>,
}

enum Planning {
    Planned(Plan),
    Failed(PlanError),
    NoFallback(PlanError),
}

/// One penetration-test run: owns the session, the oracles, and all run state.
pub struct Agent<P, S, R> {
    config: AgentConfig,
    planner: Planner<P>,
    summarizer: Summarizer<S>,
    shell: R,
    reference: TaskReference,
    retriever: Option<Box<dyn Retriever>>,
    paths: RunPaths,
    state: RunState,
    memory: MemoryLog,
    started_at: DateTime<Utc>,
}

impl<P: Oracle, S: Oracle, R: RemoteShell> Agent<P, S, R> {
    /// Validate the config, create a fresh run directory, and persist the
    /// initial state.
    pub fn start(parts: AgentParts<P, S, R>) -> Result<Self> {
        let AgentParts {
            config,
            planner,
            summarizer,
            shell,
            reference,
            retriever,
        } = parts;
        config.validate()?;

        let started_at = Utc::now();
        let (run_id, paths) = create_run(&config.run_dir, started_at)?;
        let state = RunState::new(run_id, config.looping.dedup_tasks);
        let memory = MemoryLog::new();
        write_run_state(&paths.state_path, &state)?;
        write_memory(&paths.memory_path, &memory)?;
        info!(run_id = %state.run_id, dir = %paths.dir.display(), "run started");

        Ok(Self {
            planner: Planner::new(
                planner,
                config.prompt.budget_bytes,
                config.prompt.planner_output_lines,
            ),
            summarizer: Summarizer::new(
                summarizer,
                config.prompt.budget_bytes,
                config.prompt.summary_output_lines,
            ),
            config,
            shell,
            reference,
            retriever,
            paths,
            state,
            memory,
            started_at,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn memory(&self) -> &MemoryLog {
        &self.memory
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn shell(&self) -> &R {
        &self.shell
    }

    /// Run one iteration and persist its effects.
    ///
    /// Only a failed bootstrap connection is returned as an error (it
    /// downcasts to [`crate::io::remote::ConnectionError`]). Every other
    /// failure, a failed reconnect included, is reported in the outcome and
    /// counted.
    #[instrument(skip_all, fields(run_id = %self.state.run_id, iteration = self.state.next_iteration))]
    pub fn run_step(&mut self) -> Result<StepOutcome> {
        if let Some(stop) = self.state.stop_reason {
            return Err(anyhow!("run {} already stopped ({stop})", self.state.run_id));
        }
        let iteration = self.state.next_iteration;
        let phase = self.state.phase.current();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut draft = IterationDraft::default();

        let status = if self.state.tasks.current() == Some(BOOTSTRAP_TASK) {
            self.connect()?;
            self.state.tasks.complete_front();
            self.state.counters.record_success();
            StepStatus::Bootstrap
        } else if !self.shell.is_connected() {
            warn!("remote session dropped, reconnecting");
            match self.connect() {
                Ok(()) => self.work(iteration, phase, &mut draft),
                Err(err) => {
                    self.state.counters.record_failure();
                    StepStatus::Failed {
                        stage: FailedStage::Connect,
                        reason: format!("{err:#}"),
                    }
                }
            }
        } else {
            self.work(iteration, phase, &mut draft)
        };

        let stop = if status == StepStatus::NoProgress {
            Some(StopReason::NoProgress)
        } else {
            check_termination(
                &self.config.looping.limits(),
                &self.state.counters,
                self.state.flags.len(),
            )
        };
        self.state.stop_reason = stop;
        self.state.next_iteration = iteration + 1;

        match &status {
            StepStatus::Failed { stage, reason } => {
                warn!(stage = %stage, reason = %reason, failures = self.state.counters.consecutive_failures, "iteration failed");
            }
            StepStatus::NoProgress => warn!("no plan and no fallback task"),
            StepStatus::Bootstrap | StepStatus::Completed => {
                info!(phase = %self.state.phase.current(), flags = self.state.flags.len(), "iteration done");
            }
        }
        if let Some(stop) = stop {
            info!(stop = %stop, terminal = ?stop.terminal_state(), "run stopping");
        }

        self.persist(iteration, phase, &status, &draft, started_at, clock)?;

        Ok(StepOutcome {
            run_id: self.state.run_id.clone(),
            iteration,
            phase,
            status,
            record: draft.record,
            new_flags: draft.new_flags,
            phase_change: draft.phase_change,
            stop,
        })
    }

    /// Release the remote session. Idempotent.
    pub fn close(&mut self) {
        self.shell.close();
    }

    /// Close the session and write `report.json`.
    pub fn finish(&mut self) -> Result<RunReport> {
        self.close();
        let stop = self
            .state
            .stop_reason
            .ok_or_else(|| anyhow!("run {} has not stopped yet", self.state.run_id))?;
        let report = RunReport {
            run_id: self.state.run_id.clone(),
            stop_reason: stop,
            terminal_state: stop.terminal_state(),
            iterations: self.state.counters.iterations,
            flags: self.state.flags.iter().map(str::to_string).collect(),
            phase: self.state.phase.current(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            summary: self.state.summary.clone(),
            tasks_done: self.state.tasks.done().to_vec(),
            tasks_pending: self.state.tasks.pending().to_vec(),
        };
        write_report(&self.paths.report_path, &report)?;
        Ok(report)
    }

    fn connect(&mut self) -> Result<()> {
        let remote = &self.config.remote;
        connect_with_retry(
            &mut self.shell,
            remote.connect_attempts,
            Duration::from_millis(remote.connect_retry_delay_ms),
        )
        .with_context(|| {
            format!(
                "connect to {}@{}:{}",
                self.config.attacker.username, self.config.attacker.host, self.config.attacker.port
            )
        })
    }

    /// Plan, execute, and summarize one command.
    fn work(&mut self, iteration: u32, phase: Phase, draft: &mut IterationDraft) -> StepStatus {
        let plan = match self.plan(phase, draft) {
            Planning::Planned(plan) => plan,
            Planning::Failed(err) => {
                self.state.counters.record_failure();
                return StepStatus::Failed {
                    stage: FailedStage::Plan,
                    reason: err.to_string(),
                };
            }
            Planning::NoFallback(err) => {
                debug!(err = %err, "last planning error");
                self.state.counters.record_failure();
                return StepStatus::NoProgress;
            }
        };
        draft.planner_prompt = Some(plan.prompt.clone());
        let command = plan.command.command.clone();
        draft.command = Some(command.clone());

        let input = match (plan.command.input(), self.config.looping.input_policy) {
            (Some(input), _) => Some(input.to_string()),
            (None, InputPolicy::PlannerOrTargetPassword)
                if !self.config.target.password.is_empty() =>
            {
                Some(self.config.target.password.clone())
            }
            (None, _) => None,
        };
        let timeout = Duration::from_secs(self.config.remote.command_timeout_secs);
        info!(command = %command, "executing");

        let result = match self.shell.execute(&command, input.as_deref(), timeout) {
            Ok(result) => result,
            Err(err) => {
                let reason = err.to_string();
                let record = self.step_record(iteration, phase, &command, input, String::new(), Some(reason.clone()), None);
                self.append(record, draft);
                self.state.counters.record_failure();
                return StepStatus::Failed {
                    stage: FailedStage::Execute,
                    reason,
                };
            }
        };
        let shown = result.combined();
        draft.output = Some(shown.clone());
        draft.new_flags = self.state.flags.detect(&shown);
        let sent = result.input_sent.then(|| input.clone()).flatten();
        let error = result.has_error().then(|| result.error.clone());
        let output = result.output.clone();
        draft.result = Some(result);

        let attempts = self.config.looping.step_attempts;
        let summarized = with_attempts(attempts, "summarize", || {
            self.summarizer
                .summarize(&command, &shown, &self.state.summary, Some(phase))
        });
        let Summary { record: summary, prompt } = match summarized {
            Ok(summary) => summary,
            Err(err) => {
                // Keep the previous running summary.
                let record = self.step_record(
                    iteration,
                    phase,
                    &command,
                    sent,
                    output,
                    error,
                    None,
                );
                self.append(record, draft);
                self.state.counters.record_failure();
                return StepStatus::Failed {
                    stage: FailedStage::Summarize,
                    reason: err.to_string(),
                };
            }
        };
        draft.summarizer_prompt = Some(prompt);

        self.state.summary = summary.summary.clone();
        let record = self.step_record(iteration, phase, &command, sent, output, error, summary.reward);
        self.append(record, draft);

        match draft.fallback_task.as_deref() {
            Some(task) => {
                self.state.tasks.complete(task);
            }
            None => {
                self.state.tasks.complete_front();
            }
        }
        let mut new_tasks: Vec<String> = summary.todo().map(str::to_string).into_iter().collect();
        new_tasks.extend(extract_tasks(&summary.summary));
        for task in &new_tasks {
            if self.state.tasks.enqueue(task) {
                debug!(task = %task, "task added");
            }
        }

        draft.phase_change = match self.config.looping.phase_policy {
            PhasePolicy::GoalDriven => self
                .state
                .phase
                .advance_if_goals_met(self.state.tasks.done(), self.state.tasks.pending()),
            PhasePolicy::ModelDeclared => match summary.next_phase() {
                Some(declared) => match self.state.phase.set_phase_from_model(declared) {
                    Ok(change) => change,
                    Err(rejected) => {
                        warn!(err = %rejected, "phase declaration rejected");
                        None
                    }
                },
                None => None,
            },
        };
        if let Some(next) = draft.phase_change {
            info!(from = %phase, to = %next, "phase changed");
        }

        draft.new_flags.extend(self.state.flags.detect(&summary.summary));
        for flag in &draft.new_flags {
            info!(flag = %flag, "flag captured");
        }
        self.state.counters.record_success();
        StepStatus::Completed
    }

    /// Ask the planner, then fall back to a nudge towards a known task.
    fn plan(&self, phase: Phase, draft: &mut IterationDraft) -> Planning {
        let hints = self.hints(phase);
        let ctx = PlanContext {
            phase,
            summary: &self.state.summary,
            pending: self.state.tasks.pending(),
            memory: &self.memory,
            credentials: &self.config.target,
            hints: &hints,
        };
        let attempts = self.config.looping.step_attempts;

        let err = match with_attempts(attempts, "plan", || self.planner.plan_next_step(&ctx)) {
            Ok(plan) => return Planning::Planned(plan),
            Err(err) => err,
        };

        let fallback = self
            .reference
            .suggest_next_task(phase, self.state.tasks.done())
            .map(str::to_string)
            .or_else(|| {
                self.state
                    .tasks
                    .pending()
                    .iter()
                    .find(|task| task.as_str() != BOOTSTRAP_TASK)
                    .cloned()
            });
        let Some(task) = fallback else {
            return Planning::NoFallback(err);
        };
        info!(task = %task, "planning failed, nudging with fallback task");
        draft.fallback_task = Some(task.clone());

        match with_attempts(attempts, "nudge", || self.planner.nudge_with_task(&task, &ctx)) {
            Ok(plan) => Planning::Planned(plan),
            Err(err) => Planning::Failed(err),
        }
    }

    fn hints(&self, phase: Phase) -> Vec<String> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        let query = match self.state.tasks.current() {
            Some(task) => format!("{phase} {task}"),
            None => phase.to_string(),
        };
        retriever.query(&query)
    }

    #[allow(clippy::too_many_arguments)]
    fn step_record(
        &self,
        iteration: u32,
        phase: Phase,
        command: &str,
        input: Option<String>,
        output: String,
        error: Option<String>,
        reward: Option<f64>,
    ) -> StepRecord {
        StepRecord {
            timestamp: Utc::now(),
            iteration,
            phase,
            command: command.to_string(),
            input,
            output,
            error,
            summary: self.state.summary.clone(),
            reward,
        }
    }

    fn append(&mut self, record: StepRecord, draft: &mut IterationDraft) {
        self.memory.append(record.clone());
        draft.record = Some(record);
    }

    fn persist(
        &self,
        iteration: u32,
        phase: Phase,
        status: &StepStatus,
        draft: &IterationDraft,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<()> {
        if draft.record.is_some() {
            write_memory(&self.paths.memory_path, &self.memory)?;
        }
        write_run_state(&self.paths.state_path, &self.state)?;

        let (status, error) = match status {
            StepStatus::Bootstrap => (IterationStatus::Bootstrap, None),
            StepStatus::Completed => (IterationStatus::Completed, None),
            StepStatus::NoProgress => (IterationStatus::NoProgress, None),
            StepStatus::Failed { stage, reason } => {
                let status = match stage {
                    FailedStage::Connect => IterationStatus::ConnectFailed,
                    FailedStage::Plan => IterationStatus::PlanFailed,
                    FailedStage::Execute => IterationStatus::ExecuteFailed,
                    FailedStage::Summarize => IterationStatus::SummarizeFailed,
                };
                (status, Some(reason.clone()))
            }
        };
        let result = draft.result.as_ref();
        let meta = IterationMeta {
            run_id: self.state.run_id.clone(),
            iteration,
            phase,
            status,
            command: draft.command.clone(),
            input_sent: result.is_some_and(|r| r.input_sent),
            exit_status: result.and_then(|r| r.exit_status),
            timed_out: result.is_some_and(|r| r.timed_out),
            fallback_task: draft.fallback_task.clone(),
            new_flags: draft.new_flags.clone(),
            error,
            started_at,
            ended_at: Utc::now(),
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        write_iteration(IterationWriteRequest {
            dir: self.paths.iteration_dir(iteration),
            meta: &meta,
            planner_prompt: draft.planner_prompt.as_deref(),
            summarizer_prompt: draft.summarizer_prompt.as_deref(),
            output: draft.output.as_deref(),
        })?;
        Ok(())
    }
}

/// Call `f` up to `attempts` times, returning the first success or the last error.
fn with_attempts<T, E: fmt::Display>(
    attempts: u32,
    what: &str,
    mut f: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(attempt, attempts, err = %err, "{what} failed, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
