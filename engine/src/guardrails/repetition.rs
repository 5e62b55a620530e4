//! Repetition checks: the same action proposed again

use sdk::{codes, Step, Tool};

use super::commands;
use super::Guardrail;
use crate::config::GuardrailConfig;
use crate::session::scan::normalize_path;
use crate::session::{CompletedStep, SessionState};

/// Tools that may run at most once per session
const SINGLE_USE: &[Tool] = &[Tool::DumpState];

/// A remote call repeating the previous successful one on the same agent.
///
/// Two calls are the same when their command families and path arguments
/// match, so listing two different directories is not a duplicate.
pub struct DuplicateRemoteCall;

impl Guardrail for DuplicateRemoteCall {
    fn name(&self) -> &'static str {
        "duplicate_remote_call"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_tool(Tool::RemoteExec) {
            return None;
        }
        let previous = state
            .completed_steps
            .iter()
            .rev()
            .find(|s| s.is_tool(Tool::RemoteExec))
            .filter(|s| s.success)?;

        let command = step.command()?;
        let previous_command = previous.command()?;
        let same = previous.agent_id() == step.agent_id()
            && commands::family(command) == commands::family(previous_command)
            && commands::path_args(command) == commands::path_args(previous_command);
        if !same {
            return None;
        }
        Some(step.veto(codes::format(
            codes::DUPLICATE_REMOTE_CALL,
            format!(
                "'{}' already ran on {} in {}; use its output",
                previous_command,
                previous.agent_id().unwrap_or("the agent"),
                previous.step_id
            ),
        )))
    }
}

/// Too many attempts of the same action in the recent window.
///
/// File tools count attempts on the same path; any other tool counts every
/// recent use of that tool whatever its parameters.
pub struct LoopBreaker;

impl LoopBreaker {
    fn same_action(tool: Tool, path: Option<&str>, done: &CompletedStep) -> bool {
        if !done.is_tool(tool) {
            return false;
        }
        match path {
            Some(path) => done.path().as_deref() == Some(path),
            None => true,
        }
    }
}

impl Guardrail for LoopBreaker {
    fn name(&self) -> &'static str {
        "loop_breaker"
    }

    fn check(&self, step: &Step, state: &SessionState, config: &GuardrailConfig) -> Option<Step> {
        let tool = step.tool_kind().filter(|t| !t.is_terminal())?;
        let path = step
            .path()
            .filter(|_| tool.is_file_targeted())
            .map(normalize_path);

        // Repeated replace failures are switched to an insert instead.
        if tool == Tool::ReplaceText {
            if let Some(p) = &path {
                if state.consecutive_failures(tool, p) >= config.replace_failure_threshold {
                    return None;
                }
            }
        }

        let repeats = state
            .recent_steps(config.loop_window)
            .iter()
            .filter(|done| Self::same_action(tool, path.as_deref(), done))
            .count();
        if repeats + 1 < config.loop_threshold {
            return None;
        }

        let target = path.unwrap_or_else(|| "any target".to_string());
        Some(step.veto(codes::format(
            codes::LOOP_DETECTED,
            format!(
                "{} on {} attempted {} times in the last {} steps",
                tool,
                target,
                repeats + 1,
                config.loop_window
            ),
        )))
    }
}

/// Tools that may only run once per session.
pub struct SingleUse;

impl Guardrail for SingleUse {
    fn name(&self) -> &'static str {
        "single_use"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        let tool = step.tool_kind().filter(|t| SINGLE_USE.contains(t))?;
        if !state.has_run(tool) {
            return None;
        }
        Some(step.veto(codes::format(
            codes::SINGLE_USE_TOOL,
            format!("{} already ran this session; use its earlier output", tool),
        )))
    }
}
