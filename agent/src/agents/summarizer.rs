//! Summarizer: folds the latest command output into the running summary.

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::output::truncate_lines;
use crate::core::phase::Phase;
use crate::core::types::SummaryRecord;
use crate::io::oracle::{Oracle, OracleError};
use crate::io::prompt::{PromptBuilder, SummarizerPromptInputs};

use super::{ReplyError, ReplySchema, parse_structured_reply};

const SYSTEM_PROMPT: &str = "You summarize an authorized penetration test. \
Reply with exactly one JSON object and nothing else: \
{\"summary\": \"<updated running summary>\", \"reward\": <number from -10 to 10>, \
\"todo\": \"<next task or null>\", \"next-phase\": \"<Enumeration, Exploitation, Privilege Escalation, or null>\"}. \
Only \"summary\" is required and no other keys are allowed.";

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarizer oracle failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("summarizer reply was malformed: {0}")]
    Malformed(#[from] ReplyError),
    #[error("render summarizer prompt: {0}")]
    Prompt(String),
}

/// A parsed summary plus the prompt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub record: SummaryRecord,
    pub prompt: String,
}

pub struct Summarizer<O> {
    oracle: O,
    prompts: PromptBuilder,
    output_lines: usize,
}

impl<O: Oracle> Summarizer<O> {
    pub fn new(oracle: O, prompt_budget_bytes: usize, output_lines: usize) -> Self {
        Self {
            oracle,
            prompts: PromptBuilder::new(prompt_budget_bytes),
            output_lines,
        }
    }

    /// Summarize `output` of `command` on top of `running_summary`.
    ///
    /// `output` is cut to the configured number of lines before it reaches
    /// the prompt. On failure the caller keeps its previous summary.
    #[instrument(skip_all, fields(command = %command, output_bytes = output.len()))]
    pub fn summarize(
        &self,
        command: &str,
        output: &str,
        running_summary: &str,
        phase: Option<Phase>,
    ) -> Result<Summary, SummarizeError> {
        let bounded = truncate_lines(output, self.output_lines);
        let prompt = self
            .prompts
            .summarizer(&SummarizerPromptInputs {
                phase,
                previous_summary: running_summary,
                command,
                output: &bounded,
            })
            .map_err(|err| SummarizeError::Prompt(format!("{err:#}")))?;

        let reply = self.oracle.complete(SYSTEM_PROMPT, &prompt)?;
        match parse_structured_reply::<SummaryRecord>(&reply, ReplySchema::Summarizer) {
            Ok(record) => {
                debug!(
                    summary_bytes = record.summary.len(),
                    reward = ?record.reward,
                    todo = ?record.todo(),
                    next_phase = ?record.next_phase(),
                    "summarized"
                );
                Ok(Summary { record, prompt })
            }
            Err(err) => {
                warn!(err = %err, reply_bytes = reply.len(), "summarizer reply rejected");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::TRUNCATION_MARKER;
    use crate::test_support::ScriptedOracle;

    #[test]
    fn summarizes_with_truncated_output() {
        let oracle = ScriptedOracle::new([
            r#"{"summary": "Ports 22 and 80 open.", "reward": 3, "todo": "Enumerate HTTP service"}"#,
        ]);
        let summarizer = Summarizer::new(&oracle, 24_000, 3);
        let output: String = (1..=50).map(|i| format!("{i}/tcp closed\n")).collect();

        let summary = summarizer
            .summarize("nmap -p- 192.168.122.12", &output, "", Some(Phase::Enumeration))
            .expect("summary");

        assert_eq!(summary.record.summary, "Ports 22 and 80 open.");
        assert_eq!(summary.record.todo(), Some("Enumerate HTTP service"));
        assert_eq!(summary.record.next_phase(), None);

        let (_, user) = &oracle.prompts()[0];
        assert!(user.contains("3/tcp closed"));
        assert!(!user.contains("4/tcp closed"));
        assert!(user.contains(TRUNCATION_MARKER));
        assert!(user.contains("<previous>\nNone\n</previous>"));
    }

    #[test]
    fn running_summary_is_carried_into_prompt() {
        let oracle = ScriptedOracle::new([r#"{"summary": "Found sudo rights."}"#]);
        let summarizer = Summarizer::new(&oracle, 24_000, 40);

        summarizer
            .summarize("sudo -l", "(ALL) ALL", "SSH works as root.", None)
            .expect("summary");

        let (_, user) = &oracle.prompts()[0];
        assert!(user.contains("SSH works as root."));
        assert!(!user.contains("Current phase"));
    }

    #[test]
    fn non_json_reply_is_a_summarize_error() {
        let oracle = ScriptedOracle::new(["The scan shows port 22 open."]);
        let summarizer = Summarizer::new(&oracle, 24_000, 40);

        let err = summarizer
            .summarize("nmap", "22/tcp open", "", None)
            .expect_err("prose");
        assert!(matches!(err, SummarizeError::Malformed(ReplyError::NotJson(_))));
    }

    #[test]
    fn missing_summary_is_a_summarize_error() {
        let oracle = ScriptedOracle::new([r#"{"reward": 1}"#, r#"{"summary": ""}"#]);
        let summarizer = Summarizer::new(&oracle, 24_000, 40);

        for _ in 0..2 {
            let err = summarizer
                .summarize("id", "uid=0(root)", "", None)
                .expect_err("schema");
            assert!(matches!(err, SummarizeError::Malformed(ReplyError::Schema(_))));
        }
    }
}
