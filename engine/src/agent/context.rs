//! Prompt context assembly
//!
//! The system prompt states the tool vocabulary and the reply format. The
//! user message carries the session's ground truth followed by the task, so
//! the model always decides from what was actually observed.

use std::fmt::Write;

use sdk::Tool;

use crate::session::{PlanStatus, SessionState};

/// Files listed in the prompt before the list is elided
const MAX_LISTED_FILES: usize = 60;

/// Completed steps shown in the prompt
const RECENT_STEPS: usize = 8;

fn tool_line(tool: Tool) -> &'static str {
    match tool {
        Tool::ReadFile => "read_file {path}: read a workspace file",
        Tool::WriteFile => "write_file {path, content}: create or overwrite a file",
        Tool::InsertText => "insert_text {path, text, position}: insert text (position: line number or \"end\")",
        Tool::AppendFile => "append_file {path, content}: append to a file",
        Tool::ReplaceText => "replace_text {path, old_text, new_text}: replace an exact span",
        Tool::ScanWorkspace => "scan_workspace {path?}: list files and directories",
        Tool::RunShell => "run_shell {command}: run a command in the local shell",
        Tool::DumpState => "dump_state {}: show the full session state (once per session)",
        Tool::ValidateScript => "validate_script {script, language}: check a script without running it",
        Tool::Noop => "noop {}: do nothing this turn",
        Tool::DiscoverAgents => "discover_agents {}: list remote agents (required before remote_exec)",
        Tool::RemoteExec => "remote_exec {agent_id, command}: run a command on a discovered agent",
        Tool::Complete => "complete {answer | error | question}: finish the task",
    }
}

/// System prompt for action turns
pub fn system_prompt(reasoning_start: &str, reasoning_end: &str) -> String {
    let mut prompt = String::from(
        "You are the control core of a coding and operations agent. Each turn you choose exactly ONE next action.\n\n\
         Tools:\n",
    );
    for tool in Tool::ALL {
        let _ = writeln!(prompt, "- {}", tool_line(tool));
    }
    let _ = write!(
        prompt,
        "\nReply format:\n\
         {start}your reasoning{end}\n\
         {{\"tool\": \"<name>\", \"params\": {{...}}}}\n\n\
         Rules:\n\
         - Never invent tool output. Only report what a tool actually returned.\n\
         - Run discover_agents before any remote_exec and only target discovered agents.\n\
         - Do not read a file twice; its content is already in the session.\n\
         - Emit exactly one JSON object after the reasoning and nothing else.\n",
        start = reasoning_start,
        end = reasoning_end
    );
    prompt
}

fn status_mark(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Todo => "[ ]",
        PlanStatus::InProgress => "[>]",
        PlanStatus::Completed => "[x]",
        PlanStatus::Skipped => "[-]",
    }
}

/// User message for an action turn: session ground truth, then the task.
pub fn render_context(state: &SessionState, task: &str) -> String {
    let mut out = String::new();

    if let Some(goal) = &state.command_flow.original_goal {
        if goal != task.trim() {
            let _ = writeln!(out, "## Original goal\n{}\n", goal);
        }
    }

    if let Some(plan) = &state.task_plan {
        let _ = writeln!(out, "## Plan");
        for item in &plan.items {
            let hint = item
                .tool_hint
                .as_deref()
                .map(|h| format!(" ({})", h))
                .unwrap_or_default();
            let _ = writeln!(out, "{} {}. {}{}", status_mark(item.status), item.index, item.description, hint);
        }
        out.push('\n');
    }

    if !state.files.is_empty() {
        let _ = writeln!(out, "## Known files ({})", state.files.len());
        for path in state.files.iter().take(MAX_LISTED_FILES) {
            let detail = state
                .file_metadata
                .get(path)
                .map(|m| {
                    let mut parts = Vec::new();
                    if let Some(size) = &m.size_human {
                        parts.push(size.clone());
                    }
                    if let Some(lines) = m.line_count {
                        parts.push(format!("{} lines", lines));
                    }
                    parts.join(", ")
                })
                .filter(|d| !d.is_empty())
                .map(|d| format!(" ({})", d))
                .unwrap_or_default();
            let _ = writeln!(out, "- {}{}", path, detail);
        }
        if state.files.len() > MAX_LISTED_FILES {
            let _ = writeln!(out, "- ... {} more", state.files.len() - MAX_LISTED_FILES);
        }
        out.push('\n');
    }

    if !state.read_files.is_empty() {
        let read: Vec<&str> = state.read_files.iter().map(String::as_str).collect();
        let _ = writeln!(out, "## Already read\n{}\n", read.join(", "));
    }
    if !state.edited_files.is_empty() {
        let edited: Vec<&str> = state.edited_files.iter().map(String::as_str).collect();
        let _ = writeln!(out, "## Edited\n{}\n", edited.join(", "));
    }

    let env = &state.environment_facts;
    let mut facts = Vec::new();
    if !env.project_types.is_empty() {
        facts.push(format!("project: {}", join(&env.project_types)));
    }
    if !env.frameworks_detected.is_empty() {
        facts.push(format!("frameworks: {}", join(&env.frameworks_detected)));
    }
    if !env.package_managers.is_empty() {
        facts.push(format!("package managers: {}", join(&env.package_managers)));
    }
    if let Some(branch) = &env.git_branch {
        facts.push(format!("git branch: {}", branch));
    }
    if let Some(v) = &env.python_version {
        facts.push(format!("python: {}", v));
    }
    if let Some(v) = &env.node_version {
        facts.push(format!("node: {}", v));
    }
    if let Some(running) = env.docker_running {
        facts.push(format!("docker running: {}", running));
    }
    facts.extend(env.observations.iter().cloned());
    if !facts.is_empty() {
        let _ = writeln!(out, "## Environment\n{}\n", facts.join("\n"));
    }

    if state.agents_verified {
        if state.discovered_agents.is_empty() {
            let _ = writeln!(out, "## Remote agents\nDiscovery found NO agents.\n");
        } else {
            let _ = writeln!(out, "## Remote agents\n{}\n", state.discovered_agents.join(", "));
        }
    }

    if !state.ledger.extracted_values.is_empty() {
        let _ = writeln!(out, "## Values seen");
        for (key, value) in &state.ledger.extracted_values {
            let _ = writeln!(out, "- {}: {}", key, value);
        }
        out.push('\n');
    }

    if !state.user_info.is_empty() {
        let _ = writeln!(out, "## User");
        for (key, value) in &state.user_info {
            let _ = writeln!(out, "- {}: {}", key, value);
        }
        out.push('\n');
    }

    let recent = state.recent_steps(RECENT_STEPS);
    if !recent.is_empty() {
        let _ = writeln!(out, "## Recent steps");
        for step in recent {
            let target = step
                .path()
                .or_else(|| step.command().map(str::to_string))
                .unwrap_or_default();
            let outcome = match (&step.error_type, step.success) {
                (_, true) => "ok".to_string(),
                (Some(kind), false) => format!("FAILED ({}: {})", kind, kind.hint()),
                (None, false) => "FAILED".to_string(),
            };
            let _ = writeln!(
                out,
                "- {} {} {} -> {}\n  {}",
                step.step_id, step.tool, target, outcome, step.output_summary
            );
        }
        out.push('\n');
    }

    let _ = write!(out, "## Task\n{}", task.trim());
    out
}

fn join(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
