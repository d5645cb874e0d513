//! Planner: chooses the next shell command for the current phase.

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::memory::MemoryLog;
use crate::core::output::truncate_lines;
use crate::core::phase::Phase;
use crate::core::types::{Credentials, PlannedCommand};
use crate::io::oracle::{Oracle, OracleError};
use crate::io::prompt::{LatestStep, NudgePromptInputs, PlannerPromptInputs, PromptBuilder};

use super::{ReplyError, ReplySchema, parse_structured_reply};

const SYSTEM_PROMPT: &str = "You plan the next step of an authorized penetration test. \
Reply with exactly one JSON object and nothing else: \
{\"command\": \"<shell command>\", \"input\": \"<one line to type if the command prompts, else empty>\"}. \
Both keys are required and no other keys are allowed.";

/// The planner could not produce a usable command.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner oracle failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("planner reply was malformed: {0}")]
    Malformed(#[from] ReplyError),
    #[error("render planner prompt: {0}")]
    Prompt(String),
}

/// Everything the planner reads about the run so far.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub phase: Phase,
    pub summary: &'a str,
    pub pending: &'a [String],
    pub memory: &'a MemoryLog,
    pub credentials: &'a Credentials,
    pub hints: &'a [String],
}

/// A parsed plan plus the prompt that produced it (kept for the audit log).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub command: PlannedCommand,
    pub prompt: String,
}

pub struct Planner<O> {
    oracle: O,
    prompts: PromptBuilder,
    output_lines: usize,
}

impl<O: Oracle> Planner<O> {
    /// `output_lines` bounds the latest command output shown in the prompt.
    pub fn new(oracle: O, prompt_budget_bytes: usize, output_lines: usize) -> Self {
        Self {
            oracle,
            prompts: PromptBuilder::new(prompt_budget_bytes),
            output_lines,
        }
    }

    /// Ask the oracle for the next command given the whole run context.
    #[instrument(skip_all, fields(phase = %ctx.phase, pending = ctx.pending.len()))]
    pub fn plan_next_step(&self, ctx: &PlanContext<'_>) -> Result<Plan, PlanError> {
        let latest = ctx.memory.latest().map(|step| {
            let mut output = step.output.clone();
            if let Some(error) = step.error.as_deref().filter(|e| !e.trim().is_empty()) {
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str("Error: ");
                output.push_str(error.trim_end());
            }
            LatestStep {
                command: step.command.clone(),
                output: truncate_lines(&output, self.output_lines),
            }
        });
        let previous = ctx
            .memory
            .all_commands_for(ctx.phase.as_str())
            .into_iter()
            .collect();

        let prompt = self
            .prompts
            .planner(&PlannerPromptInputs {
                phase: ctx.phase,
                summary: ctx.summary,
                tasks: ctx.pending,
                target: ctx.credentials,
                latest,
                previous,
                hints: ctx.hints.to_vec(),
            })
            .map_err(|err| PlanError::Prompt(format!("{err:#}")))?;

        self.ask(prompt)
    }

    /// Ask the oracle for a command that accomplishes one specific task.
    ///
    /// Used after `plan_next_step` keeps failing and a fallback task exists.
    #[instrument(skip_all, fields(phase = %ctx.phase, task = %task))]
    pub fn nudge_with_task(&self, task: &str, ctx: &PlanContext<'_>) -> Result<Plan, PlanError> {
        let prompt = self
            .prompts
            .nudge(&NudgePromptInputs {
                phase: ctx.phase,
                task,
                summary: ctx.summary,
                target: ctx.credentials,
            })
            .map_err(|err| PlanError::Prompt(format!("{err:#}")))?;

        self.ask(prompt)
    }

    fn ask(&self, prompt: String) -> Result<Plan, PlanError> {
        let reply = self.oracle.complete(SYSTEM_PROMPT, &prompt)?;
        match parse_structured_reply::<PlannedCommand>(&reply, ReplySchema::Planner) {
            Ok(mut command) => {
                command.command = command.command.trim().to_string();
                debug!(command = %command.command, has_input = command.input().is_some(), "planned");
                Ok(Plan { command, prompt })
            }
            Err(err) => {
                warn!(err = %err, reply_bytes = reply.len(), "planner reply rejected");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::types::StepRecord;
    use crate::test_support::ScriptedOracle;

    fn credentials() -> Credentials {
        Credentials {
            host: "192.168.122.12".to_string(),
            username: "root".to_string(),
            password: "ubuntu".to_string(),
        }
    }

    fn step(phase: Phase, command: &str, output: &str) -> StepRecord {
        StepRecord {
            timestamp: Utc::now(),
            iteration: 1,
            phase,
            command: command.to_string(),
            input: None,
            output: output.to_string(),
            error: None,
            summary: "scanned".to_string(),
            reward: None,
        }
    }

    fn ctx<'a>(
        memory: &'a MemoryLog,
        pending: &'a [String],
        credentials: &'a Credentials,
    ) -> PlanContext<'a> {
        PlanContext {
            phase: Phase::Enumeration,
            summary: "Nothing yet.",
            pending,
            memory,
            credentials,
            hints: &[],
        }
    }

    #[test]
    fn plans_command_and_embeds_context() {
        let oracle = ScriptedOracle::new([r#"{"command": " nmap -sV 192.168.122.12 ", "input": ""}"#]);
        let planner = Planner::new(&oracle, 24_000, 2);
        let mut memory = MemoryLog::new();
        memory.append(step(Phase::Enumeration, "ping -c1 192.168.122.12", "a\nb\nc\nd"));
        let pending = vec!["Scan open ports for services".to_string()];
        let creds = credentials();

        let plan = planner
            .plan_next_step(&ctx(&memory, &pending, &creds))
            .expect("plan");

        assert_eq!(plan.command.command, "nmap -sV 192.168.122.12");
        assert_eq!(plan.command.input(), None);

        let prompts = oracle.prompts();
        assert_eq!(prompts.len(), 1);
        let (system, user) = &prompts[0];
        assert!(system.contains("\"command\""));
        assert!(user.contains("Current phase: Enumeration"));
        assert!(user.contains("- Scan open ports for services"));
        assert!(user.contains("<command>ping -c1 192.168.122.12</command>"));
        assert!(user.contains("a\nb\n... 2 more lines [Output truncated]"));
        assert!(user.contains("- ping -c1 192.168.122.12"), "anti-repetition list");
        assert_eq!(plan.prompt, *user);
    }

    #[test]
    fn empty_command_is_a_plan_error() {
        let oracle = ScriptedOracle::new([r#"{"command":"","input":""}"#]);
        let planner = Planner::new(&oracle, 24_000, 60);
        let memory = MemoryLog::new();
        let creds = credentials();

        let err = planner
            .plan_next_step(&ctx(&memory, &[], &creds))
            .expect_err("blank command");
        assert!(matches!(err, PlanError::Malformed(ReplyError::Schema(_))));
    }

    #[test]
    fn oracle_failure_maps_to_plan_error() {
        let oracle = ScriptedOracle::new(Vec::<String>::new())
            .then_error(OracleError::Transport("connection reset".to_string()));
        let planner = Planner::new(&oracle, 24_000, 60);
        let memory = MemoryLog::new();
        let creds = credentials();

        let err = planner
            .plan_next_step(&ctx(&memory, &[], &creds))
            .expect_err("transport");
        assert!(matches!(err, PlanError::Oracle(OracleError::Transport(_))));
    }

    #[test]
    fn nudge_names_the_task_and_keeps_input() {
        let oracle = ScriptedOracle::new([
            "```json\n{\"command\": \"sshpass -p ubuntu ssh root@192.168.122.12 id\", \"input\": \"yes\"}\n```",
        ]);
        let planner = Planner::new(&oracle, 24_000, 60);
        let memory = MemoryLog::new();
        let creds = credentials();

        let plan = planner
            .nudge_with_task("Attempt SSH login on target machine", &ctx(&memory, &[], &creds))
            .expect("nudge");

        assert_eq!(plan.command.input(), Some("yes"));
        let (_, user) = &oracle.prompts()[0];
        assert!(user.contains("<task>Attempt SSH login on target machine</task>"));
    }
}
