//! Prompt rendering for the planner, nudge, and summarizer call sites.
//!
//! Templates mark sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed order and the last remaining section is truncated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::phase::Phase;
use crate::core::types::Credentials;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const NUDGE_TEMPLATE: &str = include_str!("prompts/nudge.md");
const SUMMARIZER_TEMPLATE: &str = include_str!("prompts/summarizer.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 4] = ["hints", "previous", "latest", "tasks"];
const TRUNCATED_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern should compile")
});

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("planner", PLANNER_TEMPLATE)
        .expect("planner template should be valid");
    env.add_template("nudge", NUDGE_TEMPLATE)
        .expect("nudge template should be valid");
    env.add_template("summarizer", SUMMARIZER_TEMPLATE)
        .expect("summarizer template should be valid");
    env
});

/// The most recent executed command, as shown to the planner.
#[derive(Debug, Clone, Serialize)]
pub struct LatestStep {
    pub command: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct PlannerPromptInputs<'a> {
    pub phase: Phase,
    pub summary: &'a str,
    pub tasks: &'a [String],
    pub target: &'a Credentials,
    pub latest: Option<LatestStep>,
    /// Commands already run in this phase (anti-repetition hint).
    pub previous: Vec<String>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NudgePromptInputs<'a> {
    pub phase: Phase,
    pub task: &'a str,
    pub summary: &'a str,
    pub target: &'a Credentials,
}

#[derive(Debug, Clone)]
pub struct SummarizerPromptInputs<'a> {
    pub phase: Option<Phase>,
    pub previous_summary: &'a str,
    pub command: &'a str,
    /// Output already bounded to the configured number of lines.
    pub output: &'a str,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());

        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let other_len = total - last.content.len();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    if allowed > TRUNCATED_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATED_MARKER.len());
        last.content.push_str(TRUNCATED_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    let mut cut = max.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders call-site prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn planner(&self, input: &PlannerPromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("planner")?.render(context! {
            phase => input.phase.as_str(),
            summary => input.summary.trim(),
            tasks => input.tasks,
            target => input.target,
            latest => input.latest,
            previous => input.previous,
            hints => input.hints,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn nudge(&self, input: &NudgePromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("nudge")?.render(context! {
            phase => input.phase.as_str(),
            task => input.task.trim(),
            summary => input.summary.trim(),
            target => input.target,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn summarizer(&self, input: &SummarizerPromptInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("summarizer")?.render(context! {
            phase => input.phase.map(Phase::as_str),
            previous_summary => input.previous_summary.trim(),
            command => input.command,
            output => input.output.trim_end(),
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Credentials {
        Credentials {
            host: "192.168.122.12".to_string(),
            username: "root".to_string(),
            password: "ubuntu".to_string(),
        }
    }

    fn planner_inputs<'a>(tasks: &'a [String], target: &'a Credentials) -> PlannerPromptInputs<'a> {
        PlannerPromptInputs {
            phase: Phase::Enumeration,
            summary: "Port 22 open.",
            tasks,
            target,
            latest: Some(LatestStep {
                command: "nmap -sV 192.168.122.12".to_string(),
                output: "22/tcp open ssh".to_string(),
            }),
            previous: vec!["nmap -sV 192.168.122.12".to_string()],
            hints: vec!["nmap -p- -T4 <ip>".to_string()],
        }
    }

    /// Sections render in a fixed order: contract, target, summary, tasks,
    /// latest, previous, hints.
    #[test]
    fn planner_prompt_ordering_is_stable() {
        let tasks = vec!["Enumerate HTTP service".to_string()];
        let target = target();
        let prompt = PromptBuilder::new(10_000)
            .planner(&planner_inputs(&tasks, &target))
            .expect("render");

        let positions: Vec<usize> = [
            "### Assessment",
            "### Target",
            "### Summary of past activity",
            "### Pending tasks",
            "### Latest command",
            "### Commands already run",
            "### Reference commands",
        ]
        .iter()
        .map(|header| prompt.find(header).unwrap_or_else(|| panic!("missing {header}")))
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{prompt}");
        assert!(prompt.contains("Current phase: Enumeration"));
        assert!(prompt.contains("- password: ubuntu"));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let target = target();
        let prompt = PromptBuilder::new(10_000)
            .planner(&PlannerPromptInputs {
                phase: Phase::Exploitation,
                summary: "",
                tasks: &[],
                target: &target,
                latest: None,
                previous: Vec::new(),
                hints: Vec::new(),
            })
            .expect("render");

        assert!(prompt.contains("<summary>\nNone\n</summary>"));
        assert!(prompt.contains("None"));
        assert!(!prompt.contains("### Latest command"));
        assert!(!prompt.contains("### Reference commands"));
    }

    #[test]
    fn budget_drops_hints_then_previous_before_tasks() {
        let tasks = vec!["Enumerate HTTP service".to_string()];
        let target = target();
        let mut inputs = planner_inputs(&tasks, &target);
        inputs.hints = vec!["x".repeat(400)];
        inputs.previous = vec!["y".repeat(400)];

        let full = PromptBuilder::new(100_000).planner(&inputs).expect("render");
        let budget = full.len() - 500;
        let prompt = PromptBuilder::new(budget).planner(&inputs).expect("render");

        assert!(!prompt.contains("### Reference commands"), "hints dropped");
        assert!(!prompt.contains("### Commands already run"), "previous dropped");
        assert!(prompt.contains("### Latest command"), "latest kept");
        assert!(prompt.contains("### Pending tasks"), "tasks kept");
        assert!(prompt.len() <= budget);
    }

    #[test]
    fn tiny_budget_keeps_required_sections_and_truncates() {
        let tasks = vec!["Enumerate HTTP service".to_string()];
        let target = target();
        let inputs = PlannerPromptInputs {
            summary: &"long summary ".repeat(200),
            ..planner_inputs(&tasks, &target)
        };
        let prompt = PromptBuilder::new(1_200).planner(&inputs).expect("render");

        assert!(prompt.contains("### Assessment"));
        assert!(prompt.contains("### Target"));
        assert!(!prompt.contains("### Pending tasks"));
        assert!(prompt.ends_with("[truncated]"));
    }

    #[test]
    fn nudge_prompt_names_the_task() {
        let target = target();
        let prompt = PromptBuilder::new(10_000)
            .nudge(&NudgePromptInputs {
                phase: Phase::Exploitation,
                task: "Read contents of flag.txt using cat",
                summary: "",
                target: &target,
            })
            .expect("render");
        assert!(prompt.contains("<task>Read contents of flag.txt using cat</task>"));
        assert!(!prompt.contains("### Summary"));
    }

    #[test]
    fn summarizer_prompt_embeds_command_and_output() {
        let prompt = PromptBuilder::new(10_000)
            .summarizer(&SummarizerPromptInputs {
                phase: Some(Phase::PrivilegeEscalation),
                previous_summary: "",
                command: "sudo -l",
                output: "(ALL) NOPASSWD: /usr/bin/find\n",
            })
            .expect("render");
        assert!(prompt.contains("Current phase: Privilege Escalation"));
        assert!(prompt.contains("<command>sudo -l</command>"));
        assert!(prompt.contains("(ALL) NOPASSWD: /usr/bin/find\n</output>"));
    }
}
