//! Plan Generator
//!
//! One low-temperature helper request turns the task text into a short
//! numbered list. Only lines that start with a number or a bullet count as
//! plan items; everything else in the reply is ignored.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use sdk::Tool;

use crate::config::LLMConfig;
use crate::llm::{ChatRequest, ModelBackend, Result, SamplingOptions};
use crate::patterns::PatternTable;
use crate::session::TaskPlan;

/// Plan used when the helper reply holds no usable lines
pub const DEFAULT_PLAN_STEP: &str = "Complete the requested task";

/// Plans longer than this are truncated
pub const MAX_PLAN_ITEMS: usize = 8;

const PLAN_PROMPT: &str = "You break a task for a coding and operations agent into a short plan.\n\
Reply with a numbered list of 2 to 6 concrete steps, one per line, like:\n\
1. Scan the workspace\n\
2. Read the configuration file\n\
Do not add any other text.";

static PLAN_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+\s*[.):-]|[-*+•])\s+(.+?)\s*$").ok());

static TOOL_HINTS: Lazy<PatternTable<Tool>> = Lazy::new(|| {
    PatternTable::compile(&[
        (r"(?i)\b(discover|find|list)\b.*\b(agents?|hosts?|machines?|servers?|targets?)\b", Tool::DiscoverAgents),
        (r"(?i)\b(remote|on the (server|host|agent|machine))\b", Tool::RemoteExec),
        (r"(?i)\b(scan|explore|list)\b.*\b(workspace|project|files|directory|repo)", Tool::ScanWorkspace),
        (r"(?i)\b(read|inspect|open|review|look at)\b", Tool::ReadFile),
        (r"(?i)\b(replace|modify|update|fix|change|edit)\b", Tool::ReplaceText),
        (r"(?i)\b(append|add to the end)\b", Tool::AppendFile),
        (r"(?i)\b(create|write|generate)\b", Tool::WriteFile),
        (r"(?i)\b(run|execute|build|test|install|compile)\b", Tool::RunShell),
        (r"(?i)\b(validate|check)\b.*\bscript\b", Tool::ValidateScript),
        (r"(?i)\b(report|summari[sz]e|answer|respond)\b", Tool::Complete),
    ])
});

/// Plan item descriptions in a helper reply
pub fn parse_plan_lines(reply: &str) -> Vec<String> {
    let Some(re) = PLAN_LINE.as_ref() else {
        return Vec::new();
    };
    reply
        .lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|d| !d.is_empty())
        .take(MAX_PLAN_ITEMS)
        .collect()
}

/// Tool a plan line most likely calls for
pub fn tool_hint(description: &str) -> Option<Tool> {
    TOOL_HINTS.classify(description)
}

/// Plan built from a helper reply, with a single generic step when the
/// reply has no plan lines.
pub fn plan_from_reply(reply: &str) -> TaskPlan {
    let mut lines = parse_plan_lines(reply);
    if lines.is_empty() {
        lines.push(DEFAULT_PLAN_STEP.to_string());
    }
    TaskPlan::new(
        lines
            .into_iter()
            .map(|d| {
                let hint = tool_hint(&d).map(|t| t.as_str().to_string());
                (d, hint)
            })
            .collect(),
    )
}

/// Generates task plans through a helper request
pub struct PlanGenerator {
    backend: Arc<dyn ModelBackend>,
    options: SamplingOptions,
    keep_alive: String,
}

impl PlanGenerator {
    pub fn new(backend: Arc<dyn ModelBackend>, config: &LLMConfig) -> Self {
        Self {
            backend,
            options: SamplingOptions::helper(config),
            keep_alive: config.keep_alive.clone(),
        }
    }

    /// Ask the backend for a plan for `task`.
    pub async fn generate(&self, task: &str) -> Result<TaskPlan> {
        let request = ChatRequest::new(PLAN_PROMPT, task, self.options.clone())
            .with_keep_alive(self.keep_alive.clone());
        let reply = self.backend.complete(&request).await?;
        let plan = plan_from_reply(&reply);
        if plan.items.len() == 1 && plan.items[0].description == DEFAULT_PLAN_STEP {
            warn!("Plan reply had no plan lines, using the default plan");
        }
        debug!("Generated plan with {} items", plan.items.len());
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PlanStatus;

    #[test]
    fn test_parse_numbered_and_bulleted_lines() {
        let reply = "Here is the plan:\n\
                     1. Scan the workspace\n\
                     2) Read Cargo.toml\n\
                     - Run the tests\n\
                     * Report results\n\
                     That is all.";
        assert_eq!(
            parse_plan_lines(reply),
            vec!["Scan the workspace", "Read Cargo.toml", "Run the tests", "Report results"]
        );
    }

    #[test]
    fn test_empty_reply_defaults_to_single_step() {
        let plan = plan_from_reply("I will do my best.");
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].description, DEFAULT_PLAN_STEP);
        assert_eq!(plan.items[0].status, PlanStatus::InProgress);
    }

    #[test]
    fn test_tool_hints() {
        assert_eq!(tool_hint("Discover available agents"), Some(Tool::DiscoverAgents));
        assert_eq!(tool_hint("Scan the project files"), Some(Tool::ScanWorkspace));
        assert_eq!(tool_hint("Read src/main.rs"), Some(Tool::ReadFile));
        assert_eq!(tool_hint("Run cargo test"), Some(Tool::RunShell));
        assert_eq!(tool_hint("Think hard"), None);

        let plan = plan_from_reply("1. Read README.md\n2. Summarize it");
        assert_eq!(plan.items[0].tool_hint.as_deref(), Some("read_file"));
        assert_eq!(plan.items[1].tool_hint.as_deref(), Some("complete"));
        assert_eq!(plan.items[1].status, PlanStatus::Todo);
    }

    #[test]
    fn test_plan_is_truncated() {
        let reply: String = (1..=12).map(|i| format!("{}. step {}\n", i, i)).collect();
        assert_eq!(parse_plan_lines(&reply).len(), MAX_PLAN_ITEMS);
    }
}
