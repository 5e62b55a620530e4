//! Ceiling check: long tasks that stopped editing
//!
//! Runs last so every earlier substitution is already in place.

use sdk::{codes, Step};

use super::Guardrail;
use crate::config::GuardrailConfig;
use crate::session::SessionState;

/// Long tasks that stopped editing are forced to finish.
pub struct StepCeiling;

impl Guardrail for StepCeiling {
    fn name(&self) -> &'static str {
        "step_ceiling"
    }

    fn check(&self, step: &Step, state: &SessionState, config: &GuardrailConfig) -> Option<Step> {
        if step.is_terminal() || state.completed_steps.len() <= config.step_ceiling {
            return None;
        }
        let editing = state
            .recent_steps(config.ceiling_edit_window)
            .iter()
            .any(|s| s.tool_kind().map(|t| t.is_edit()).unwrap_or(false));
        if editing {
            return None;
        }
        Some(step.veto(codes::format(
            codes::STEP_CEILING,
            format!(
                "{} steps completed without progress; summarize what was found",
                state.completed_steps.len()
            ),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::step::single;
    use sdk::Tool;

    fn config() -> GuardrailConfig {
        GuardrailConfig {
            step_ceiling: 4,
            ceiling_edit_window: 2,
            ..GuardrailConfig::default()
        }
    }

    fn run(state: &mut SessionState, tool: &str, n: usize) {
        for i in 0..n {
            state.update_from_step(tool, &single("path", format!("f{}.txt", i)), "ok", true);
        }
    }

    #[test]
    fn test_ceiling_forces_completion() {
        let mut state = SessionState::new();
        run(&mut state, "read_file", 5);
        let step = Step::for_tool(Tool::ScanWorkspace, Default::default());
        let out = StepCeiling.check(&step, &state, &config()).unwrap();
        assert!(out.error().unwrap().starts_with(codes::STEP_CEILING));
    }

    #[test]
    fn test_ceiling_waits_for_count_and_recent_edits() {
        let mut state = SessionState::new();
        run(&mut state, "read_file", 4);
        let step = Step::for_tool(Tool::ScanWorkspace, Default::default());
        assert!(StepCeiling.check(&step, &state, &config()).is_none());

        run(&mut state, "write_file", 1);
        assert!(StepCeiling.check(&step, &state, &config()).is_none());

        run(&mut state, "read_file", 2);
        assert!(StepCeiling.check(&step, &state, &config()).is_some());
    }

    #[test]
    fn test_completions_pass_the_ceiling() {
        let mut state = SessionState::new();
        run(&mut state, "read_file", 10);
        let done = Step::complete_answer("done");
        assert!(StepCeiling.check(&done, &state, &config()).is_none());
    }
}
