//! Phase state machine over the fixed, ordered set of assessment phases.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named stage of the run. Order of the variants is the advancement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Enumeration,
    Exploitation,
    #[serde(rename = "Privilege Escalation")]
    PrivilegeEscalation,
}

impl Phase {
    pub const ALL: [Phase; 3] = [
        Phase::Enumeration,
        Phase::Exploitation,
        Phase::PrivilegeEscalation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Enumeration => "Enumeration",
            Phase::Exploitation => "Exploitation",
            Phase::PrivilegeEscalation => "Privilege Escalation",
        }
    }

    /// The immediate successor, or `None` for the last phase.
    pub fn next(self) -> Option<Phase> {
        let idx = Self::ALL.iter().position(|phase| *phase == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Goal tasks that must all be done before this phase may advance.
    pub fn goals(self) -> &'static [&'static str] {
        match self {
            Phase::Enumeration => &[
                "Scan open ports for services",
                "Enumerate HTTP service",
                "Attempt SSH login on target machine",
            ],
            Phase::Exploitation => &[
                "Find file named flag.txt on target machine",
                "Read contents of flag.txt using cat",
            ],
            Phase::PrivilegeEscalation => &[],
        }
    }

    /// Parse a canonical phase name.
    ///
    /// Matching ignores ASCII case and spaces, so `"Privilege Escalation"` and
    /// `"PrivilegeEscalation"` are the same phase. Nothing else is accepted.
    pub fn parse(raw: &str) -> Option<Phase> {
        let wanted = normalize(raw);
        Self::ALL
            .iter()
            .copied()
            .find(|phase| normalize(phase.as_str()) == wanted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Which transition path governs a run. Exactly one is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhasePolicy {
    /// Advance when every goal task of the current phase is done and nothing is pending.
    #[default]
    GoalDriven,
    /// Follow the phase the summarizer declares.
    ModelDeclared,
}

/// A declared phase that is not a member of the fixed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized phase {declared:?}; staying in {current}")]
pub struct PhaseTransitionRejected {
    pub declared: String,
    pub current: Phase,
}

/// Single active phase; starts at the first phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    current: Phase,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            current: Phase::ALL[0],
        }
    }
}

impl PhaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    /// Advance one phase if `pending` is empty and every goal of the current
    /// phase is in `done`. Returns the new phase when a transition happened.
    pub fn advance_if_goals_met<D, P>(&mut self, done: &[D], pending: &[P]) -> Option<Phase>
    where
        D: AsRef<str>,
        P: AsRef<str>,
    {
        if !pending.is_empty() {
            return None;
        }
        let goals_met = self
            .current
            .goals()
            .iter()
            .all(|goal| done.iter().any(|task| task.as_ref() == *goal));
        if !goals_met {
            return None;
        }
        let next = self.current.next()?;
        self.current = next;
        Some(next)
    }

    /// Jump to a summarizer-declared phase.
    ///
    /// Returns `Ok(Some(phase))` on a transition, `Ok(None)` when the declared
    /// phase is already current, and an error for names outside the set.
    pub fn set_phase_from_model(
        &mut self,
        declared: &str,
    ) -> Result<Option<Phase>, PhaseTransitionRejected> {
        let Some(phase) = Phase::parse(declared) else {
            return Err(PhaseTransitionRejected {
                declared: declared.to_string(),
                current: self.current,
            });
        };
        if phase == self.current {
            return Ok(None);
        }
        self.current = phase;
        Ok(Some(phase))
    }
}
