//! Oracle call sites: the planner and the summarizer.
//!
//! Each call site has one fixed reply schema. A reply is accepted only if it
//! is exactly one JSON object (optionally inside a single Markdown code
//! fence) that validates against that schema.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub mod planner;
pub mod summarizer;

const PLANNER_REPLY_SCHEMA: &str = include_str!("../../schemas/planner_reply.schema.json");
const SUMMARIZER_REPLY_SCHEMA: &str =
    include_str!("../../schemas/summarizer_reply.schema.json");

static PLANNER_REPLY: LazyLock<Validator> =
    LazyLock::new(|| compile_schema(PLANNER_REPLY_SCHEMA));
static SUMMARIZER_REPLY: LazyLock<Validator> =
    LazyLock::new(|| compile_schema(SUMMARIZER_REPLY_SCHEMA));

fn compile_schema(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("bundled reply schema should be JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("bundled reply schema should compile")
}

/// Which fixed schema a reply is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplySchema {
    Planner,
    Summarizer,
}

impl ReplySchema {
    fn validator(self) -> &'static Validator {
        match self {
            ReplySchema::Planner => &PLANNER_REPLY,
            ReplySchema::Summarizer => &SUMMARIZER_REPLY,
        }
    }
}

/// An oracle reply that does not match its call site's schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("reply is not a single JSON value: {0}")]
    NotJson(String),
    #[error("reply violates schema: {}", .0.join("; "))]
    Schema(Vec<String>),
}

/// Parse `reply` as exactly one JSON object matching `schema`.
pub(crate) fn parse_structured_reply<T: DeserializeOwned>(
    reply: &str,
    schema: ReplySchema,
) -> Result<T, ReplyError> {
    let body = strip_code_fence(reply);
    let value: Value =
        serde_json::from_str(body).map_err(|err| ReplyError::NotJson(err.to_string()))?;

    let messages: Vec<String> = schema
        .validator()
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ReplyError::Schema(messages));
    }

    serde_json::from_value(value).map_err(|err| ReplyError::Schema(vec![err.to_string()]))
}

/// Remove one surrounding Markdown code fence, with or without a language tag.
pub(crate) fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    match inner.split_once('\n') {
        Some((info, body)) if info.trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            body.trim()
        }
        _ => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PlannedCommand, SummaryRecord};

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn planner_reply_parses_typed_struct() {
        let parsed: PlannedCommand = parse_structured_reply(
            "```json\n{\"command\": \"sudo -l\", \"input\": \"ubuntu\"}\n```",
            ReplySchema::Planner,
        )
        .expect("parse");
        assert_eq!(parsed.command, "sudo -l");
        assert_eq!(parsed.input(), Some("ubuntu"));
    }

    #[test]
    fn prose_around_json_is_rejected() {
        let err = parse_structured_reply::<PlannedCommand>(
            "Sure! {\"command\": \"id\", \"input\": \"\"}",
            ReplySchema::Planner,
        )
        .expect_err("prose");
        assert!(matches!(err, ReplyError::NotJson(_)));

        let err = parse_structured_reply::<PlannedCommand>(
            "{\"command\": \"id\", \"input\": \"\"} and then whoami",
            ReplySchema::Planner,
        )
        .expect_err("trailing text");
        assert!(matches!(err, ReplyError::NotJson(_)));
    }

    #[test]
    fn arrays_and_extra_keys_are_schema_errors() {
        let err = parse_structured_reply::<PlannedCommand>(
            "[{\"command\": \"id\", \"input\": \"\"}]",
            ReplySchema::Planner,
        )
        .expect_err("array");
        assert!(matches!(err, ReplyError::Schema(_)));

        let err = parse_structured_reply::<PlannedCommand>(
            "{\"command\": \"id\", \"input\": \"\", \"why\": \"because\"}",
            ReplySchema::Planner,
        )
        .expect_err("extra key");
        assert!(matches!(err, ReplyError::Schema(_)));
    }

    #[test]
    fn blank_command_is_rejected() {
        for reply in [
            "{\"command\": \"\", \"input\": \"\"}",
            "{\"command\": \"   \", \"input\": \"\"}",
            "{\"command\": \"id\"}",
        ] {
            let err = parse_structured_reply::<PlannedCommand>(reply, ReplySchema::Planner)
                .expect_err(reply);
            assert!(matches!(err, ReplyError::Schema(_)), "{reply}");
        }
    }

    #[test]
    fn summarizer_reply_accepts_optional_fields() {
        let parsed: SummaryRecord = parse_structured_reply(
            r#"{"summary": "Port 80 open", "reward": 2.5, "todo": null, "next-phase": "Exploitation"}"#,
            ReplySchema::Summarizer,
        )
        .expect("parse");
        assert_eq!(parsed.summary, "Port 80 open");
        assert_eq!(parsed.reward, Some(2.5));
        assert_eq!(parsed.todo(), None);
        assert_eq!(parsed.next_phase(), Some("Exploitation"));

        let err = parse_structured_reply::<SummaryRecord>(
            r#"{"summary": "x", "reward": 99}"#,
            ReplySchema::Summarizer,
        )
        .expect_err("reward out of range");
        assert!(matches!(err, ReplyError::Schema(_)));
    }
}
