//! Completion checks: when a task is allowed to end

use once_cell::sync::Lazy;
use regex::Regex;

use sdk::{codes, Step};

use super::Guardrail;
use crate::config::GuardrailConfig;
use crate::session::SessionState;

/// Answers that report a failure or an absence of results
static NEGATIVE_ANSWER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(no|not|none|nothing|unable|cannot|can't|could not|couldn't|failed|failure|error|unavailable|unreachable|offline)\b",
    )
    .ok()
});

/// Answers that read like observed results
static RESULT_SHAPED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \d+(\.\d+)?\s*(%|[kmgt]i?b\b|ms\b|seconds?\b|minutes?\b|hours?\b|days?\b)
        | \b(is|are)\s+(running|stopped|installed|active|online|listening|healthy|up)\b
        | \b\d+\s+(services|processes|files|users|connections|entries|items|packages|containers)\b
        | \b(uptime|disk\s+usage|cpu\s+usage|memory\s+usage|free\s+space|load\s+average)\b
        | \bversion\s+v?\d+(\.\d+)+",
    )
    .ok()
});

fn is_match(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|r| r.is_match(text)).unwrap_or(false)
}

/// A task that discovered agents must query one before answering.
pub struct AntiLaziness;

impl Guardrail for AntiLaziness {
    fn name(&self) -> &'static str {
        "anti_laziness"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_terminal() || state.discovered_agents.is_empty() {
            return None;
        }
        let answer = step.answer()?;
        let discovery = state.last_discovery_index()?;
        if state.remote_exec_since(discovery) || is_match(&NEGATIVE_ANSWER, answer) {
            return None;
        }
        Some(step.veto(codes::format(
            codes::PREMATURE_COMPLETION,
            format!(
                "agents {} were discovered but none was queried; run remote_exec before answering",
                state.discovered_agents.join(", ")
            ),
        )))
    }
}

/// With no agents discovered, an answer cannot report remote results.
pub struct EmptyDiscovery;

impl Guardrail for EmptyDiscovery {
    fn name(&self) -> &'static str {
        "empty_discovery"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_terminal() || !state.discovery_empty() {
            return None;
        }
        let answer = step.answer()?;
        if !is_match(&RESULT_SHAPED, answer) {
            return None;
        }
        Some(step.veto(codes::format(
            codes::NO_AGENTS_AVAILABLE,
            "discovery found no remote agents, so no remote results exist",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::step::params;
    use serde_json::Map;

    fn cfg() -> GuardrailConfig {
        GuardrailConfig::default()
    }

    fn discovered(output: &str) -> SessionState {
        let mut state = SessionState::new();
        state.update_from_step("discover_agents", &Map::new(), output, true);
        state
    }

    #[test]
    fn test_blocks_answer_before_any_remote_call() {
        let state = discovered(r#"["web-01"]"#);
        let out = AntiLaziness
            .check(&Step::complete_answer("All services look fine."), &state, &cfg())
            .unwrap();
        assert!(out.error().unwrap().starts_with(codes::PREMATURE_COMPLETION));
    }

    #[test]
    fn test_allows_negative_answers_and_answers_after_remote() {
        let mut state = discovered(r#"["web-01"]"#);
        let negative = Step::complete_answer("Could not reach web-01.");
        assert!(AntiLaziness.check(&negative, &state, &cfg()).is_none());

        state.update_from_step(
            "remote_exec",
            &params([("agent_id", "web-01"), ("command", "uptime")]),
            "up 3 days",
            true,
        );
        let answer = Step::complete_answer("web-01 has been up for 3 days.");
        assert!(AntiLaziness.check(&answer, &state, &cfg()).is_none());
    }

    #[test]
    fn test_error_completions_pass() {
        let state = discovered(r#"["web-01"]"#);
        let step = Step::complete_error("MODEL_ERROR: backend down");
        assert!(AntiLaziness.check(&step, &state, &cfg()).is_none());
    }

    #[test]
    fn test_result_language_after_empty_discovery() {
        let state = discovered("No agents found");
        let out = EmptyDiscovery
            .check(
                &Step::complete_answer("The server is running 12 services and disk usage is 40%."),
                &state,
                &cfg(),
            )
            .unwrap();
        assert!(out.error().unwrap().starts_with(codes::NO_AGENTS_AVAILABLE));

        let honest = Step::complete_answer("There are no agents to query.");
        assert!(EmptyDiscovery.check(&honest, &state, &cfg()).is_none());
    }

    #[test]
    fn test_result_language_without_empty_discovery_passes() {
        let state = SessionState::new();
        let step = Step::complete_answer("Disk usage is 40%.");
        assert!(EmptyDiscovery.check(&step, &state, &cfg()).is_none());
    }
}
