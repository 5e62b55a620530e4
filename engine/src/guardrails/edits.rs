//! Edit checks: file reads and writes against what the session knows

use serde_json::{Map, Value};

use sdk::step::first_param;
use sdk::{codes, Step, Tool};

use super::Guardrail;
use crate::config::GuardrailConfig;
use crate::session::scan::normalize_path;
use crate::session::SessionState;

const NEW_TEXT_KEYS: &[&str] = &["new_text", "replacement", "new_string", "text"];

/// Repeatedly failing replace edits switch to appending the new text.
pub struct FailureCorrection;

impl Guardrail for FailureCorrection {
    fn name(&self) -> &'static str {
        "failure_correction"
    }

    fn check(&self, step: &Step, state: &SessionState, config: &GuardrailConfig) -> Option<Step> {
        if !step.is_tool(Tool::ReplaceText) {
            return None;
        }
        let path = step.path()?;
        let failures = state.consecutive_failures(Tool::ReplaceText, path);
        if failures < config.replace_failure_threshold {
            return None;
        }
        let text = first_param(&step.params, NEW_TEXT_KEYS)?;

        let mut params = Map::new();
        params.insert("path".to_string(), Value::String(path.to_string()));
        params.insert("text".to_string(), Value::String(text.to_string()));
        params.insert("position".to_string(), Value::String("end".to_string()));
        Some(step.replace_with(
            Tool::InsertText,
            params,
            &format!(
                "replace_text failed {} times on {}; inserting instead",
                failures, path
            ),
        ))
    }
}

/// Files already read this session are not read again.
pub struct ReaccessSuppression;

impl Guardrail for ReaccessSuppression {
    fn name(&self) -> &'static str {
        "reaccess_suppression"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_tool(Tool::ReadFile) {
            return None;
        }
        let path = step.path()?;
        if !state.is_read(path) {
            return None;
        }
        Some(step.veto(codes::format(
            codes::ALREADY_READ,
            format!("{} was already read; use its earlier content", normalize_path(path)),
        )))
    }
}

/// Edits aimed at an unknown path are pointed at the closest known file.
pub struct PathReconciliation;

impl PathReconciliation {
    fn closest<'a>(state: &'a SessionState, tool: Tool, path: &str) -> Option<&'a str> {
        let suffix = format!("/{}", path);
        if let Some(found) = state.files.iter().find(|f| f.ends_with(&suffix)) {
            return Some(found);
        }
        // New files are legitimate write targets; only existing-file edits
        // fall back to a name match.
        if tool == Tool::WriteFile {
            return None;
        }
        let name = path.rsplit('/').next().filter(|n| !n.is_empty())?;
        state
            .files
            .iter()
            .find(|f| f.rsplit('/').next().map(|n| n.contains(name)).unwrap_or(false))
            .map(String::as_str)
    }
}

impl Guardrail for PathReconciliation {
    fn name(&self) -> &'static str {
        "path_reconciliation"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        let tool = step.tool_kind().filter(|t| t.is_edit())?;
        let requested = step.path()?;
        if state.files.is_empty() || state.is_known_file(requested) {
            return None;
        }
        let path = normalize_path(requested);
        let found = Self::closest(state, tool, &path)?;

        let mut params = step.params.clone();
        for key in sdk::step::PATH_KEYS {
            params.remove(*key);
        }
        params.insert("path".to_string(), Value::String(found.to_string()));
        Some(step.replace_with(
            tool,
            params,
            &format!("{} is not a known file; using {}", path, found),
        ))
    }
}
