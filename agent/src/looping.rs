//! Multi-iteration driver for `agent run`.

use anyhow::Result;

use crate::core::budget::{StopReason, TerminalState};
use crate::io::oracle::Oracle;
use crate::io::remote::RemoteShell;
use crate::io::report::RunReport;
use crate::step::{Agent, StepOutcome};

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub steps_executed: u32,
    pub stop: StopReason,
    pub terminal_state: TerminalState,
    pub report: RunReport,
}

/// Step `agent` until a terminal state is reached, then write the report.
///
/// `on_step` sees every iteration, including the one that stopped the run.
/// Fatal errors (connection exhaustion, persistence failures) are returned
/// as-is; the session is still closed.
pub fn run_loop<P, S, R, F>(agent: &mut Agent<P, S, R>, mut on_step: F) -> Result<LoopOutcome>
where
    P: Oracle,
    S: Oracle,
    R: RemoteShell,
    F: FnMut(&StepOutcome),
{
    let mut steps_executed = 0u32;
    loop {
        let step = match agent.run_step() {
            Ok(step) => step,
            Err(err) => {
                agent.close();
                return Err(err);
            }
        };
        steps_executed += 1;
        on_step(&step);
        if let Some(stop) = step.stop {
            let report = agent.finish()?;
            return Ok(LoopOutcome {
                run_id: step.run_id,
                steps_executed,
                stop,
                terminal_state: stop.terminal_state(),
                report,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::task_reference::TaskReference;
    use crate::step::{AgentParts, StepStatus};
    use crate::test_support::{ScriptedOracle, ScriptedShell, ok_output, temp_config};

    #[test]
    fn loop_stops_on_budget_and_reports() {
        let (_temp, mut config) = temp_config().expect("config");
        config.looping.max_iterations = 4;
        let planner = ScriptedOracle::default().with_fallback(r#"{"command":"id","input":""}"#);
        let summarizer = ScriptedOracle::default().with_fallback(r#"{"summary":"uid=0"}"#);
        let mut agent = Agent::start(AgentParts {
            config,
            planner: &planner,
            summarizer: &summarizer,
            shell: ScriptedShell::default().with_fallback(ok_output("uid=0(root)")),
            reference: TaskReference::empty(),
            retriever: None,
        })
        .expect("start");

        let mut seen = Vec::new();
        let outcome = run_loop(&mut agent, |step| seen.push(step.status.clone())).expect("loop");

        assert_eq!(outcome.steps_executed, 4);
        assert_eq!(outcome.stop, StopReason::Budget);
        assert_eq!(outcome.terminal_state, TerminalState::TerminatedBudget);
        assert_eq!(outcome.report.iterations, 4);
        assert_eq!(seen[0], StepStatus::Bootstrap);
        assert!(seen[1..].iter().all(|status| *status == StepStatus::Completed));
        assert!(!agent.shell().is_connected());
    }

    #[test]
    fn fatal_error_closes_the_session() {
        let (_temp, config) = temp_config().expect("config");
        let planner = ScriptedOracle::default();
        let summarizer = ScriptedOracle::default();
        let mut agent = Agent::start(AgentParts {
            config,
            planner: &planner,
            summarizer: &summarizer,
            shell: ScriptedShell::default().with_connect_failures(5),
            reference: TaskReference::empty(),
            retriever: None,
        })
        .expect("start");

        let mut steps = 0;
        assert!(run_loop(&mut agent, |_| steps += 1).is_err());
        assert_eq!(steps, 0);
        assert!(!agent.shell().is_connected());
    }
}
