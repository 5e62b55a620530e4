//! Routing checks: where a step is allowed to run

use serde_json::Value;

use sdk::step::{single, COMMAND_KEYS};
use sdk::{codes, Step, Tool};

use super::commands;
use super::script::{Language, ScriptValidator};
use super::Guardrail;
use crate::config::GuardrailConfig;
use crate::session::facts::is_local_target;
use crate::session::SessionState;

/// Remote calls whose command really targets the local workspace become
/// the equivalent local tool call.
pub struct WorkspaceMisroute;

impl Guardrail for WorkspaceMisroute {
    fn name(&self) -> &'static str {
        "workspace_misroute"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_tool(Tool::RemoteExec) {
            return None;
        }
        let command = step.command()?;
        let local_agent = step.agent_id().map(is_local_target).unwrap_or(false);
        if !local_agent && !commands::targets_workspace(command, state) {
            return None;
        }

        if commands::is_script_payload(command) {
            let path = step.path().map(str::to_string).unwrap_or_else(|| {
                match Language::detect(command) {
                    Language::PowerShell => "script.ps1".to_string(),
                    Language::Bash => "script.sh".to_string(),
                }
            });
            let mut params = single("path", path);
            params.insert("content".to_string(), Value::String(command.to_string()));
            return Some(step.replace_with(
                Tool::WriteFile,
                params,
                "script payload written to the workspace instead of sent to a remote target",
            ));
        }

        let (tool, params) = commands::local_equivalent(command);
        Some(step.replace_with(
            tool,
            params,
            &format!("remote call targeted the local workspace; using {}", tool),
        ))
    }
}

/// Remote calls need a successful discovery naming their target.
pub struct RemoteAuthorization;

impl Guardrail for RemoteAuthorization {
    fn name(&self) -> &'static str {
        "remote_authorization"
    }

    fn check(&self, step: &Step, state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_tool(Tool::RemoteExec) {
            return None;
        }
        if !state.agents_verified {
            return Some(step.veto(codes::format(
                codes::DISCOVERY_REQUIRED,
                "run discover_agents before sending remote commands",
            )));
        }
        if state.discovery_empty() {
            return Some(step.veto(codes::format(
                codes::NO_AGENTS_AVAILABLE,
                "discovery found no remote agents",
            )));
        }
        match step.agent_id() {
            Some(agent) if state.discovered_agents.iter().any(|a| a == agent.trim()) => None,
            Some(agent) => Some(step.veto(codes::format(
                codes::UNKNOWN_AGENT,
                format!(
                    "'{}' is not among discovered agents: {}",
                    agent,
                    state.discovered_agents.join(", ")
                ),
            ))),
            None => Some(step.veto(codes::format(
                codes::UNKNOWN_AGENT,
                "remote call names no agent",
            ))),
        }
    }
}

/// Remote commands are validated and deterministically repaired before
/// they are sent.
#[derive(Default)]
pub struct ScriptPreflight {
    validator: ScriptValidator,
}

impl Guardrail for ScriptPreflight {
    fn name(&self) -> &'static str {
        "script_preflight"
    }

    fn check(&self, step: &Step, _state: &SessionState, _config: &GuardrailConfig) -> Option<Step> {
        if !step.is_tool(Tool::RemoteExec) {
            return None;
        }
        let command = step.command()?;
        let report = self.validator.validate(command, Language::detect(command));
        if !report.can_fix {
            return None;
        }
        let fixed = report.fixed_script.filter(|f| f != command)?;

        let mut params = step.params.clone();
        let key = COMMAND_KEYS
            .iter()
            .find(|k| params.get(**k).and_then(Value::as_str) == Some(command))
            .copied()
            .unwrap_or("command");
        params.insert(key.to_string(), Value::String(fixed));

        let fixes = report
            .issues
            .iter()
            .map(|i| i.description.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let step = step.replace_with(Tool::RemoteExec, params, &format!("script fixed: {}", fixes));
        Some(step)
    }
}

/// Local-only tools used right after discovery are sent to the most
/// recently discovered agent.
pub struct ForcedRedirect;

impl Guardrail for ForcedRedirect {
    fn name(&self) -> &'static str {
        "forced_redirect"
    }

    fn check(&self, step: &Step, state: &SessionState, config: &GuardrailConfig) -> Option<Step> {
        let tool = step.tool_kind().filter(|t| t.is_local_only())?;
        let since = state.steps_since_discovery()?;
        if since >= config.redirect_window {
            return None;
        }
        let agent = state.discovered_agents.last()?;
        if step.path().map(|p| state.is_known_file(p)).unwrap_or(false) {
            return None;
        }

        let language = commands::agent_language(state, agent);
        let command = commands::remote_equivalent(tool, &step.params, language)?;
        let mut params = single("agent_id", agent.as_str());
        params.insert("command".to_string(), Value::String(command));
        Some(step.replace_with(
            Tool::RemoteExec,
            params,
            &format!("{} redirected to discovered agent {}", tool, agent),
        ))
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

    fn discovered(agents: &str) -> SessionState {
        let mut state = SessionState::new();
        state.update_from_step("discover_agents", &Map::new(), agents, true);
        state
    }

    fn remote(agent: &str, command: &str) -> Step {
        Step::for_tool(
            Tool::RemoteExec,
            params([("agent_id", agent), ("command", command)]),
        )
    }

    #[test]
    fn test_misroute_maps_shell_idioms() {
        let state = SessionState::new();
        let out = WorkspaceMisroute
            .check(&remote("localhost", "touch notes.md"), &state, &cfg())
            .unwrap();
        assert!(out.is_tool(Tool::WriteFile));
        assert_eq!(out.path(), Some("notes.md"));

        let out = WorkspaceMisroute
            .check(&remote("pc-1", "find . -name '*.rs'"), &state, &cfg())
            .unwrap();
        assert!(out.is_tool(Tool::ScanWorkspace));

        let out = WorkspaceMisroute
            .check(&remote("127.0.0.1", "cargo --version"), &state, &cfg())
            .unwrap();
        assert!(out.is_tool(Tool::RunShell));
        assert_eq!(out.command(), Some("cargo --version"));
    }

    #[test]
    fn test_misroute_writes_script_payloads() {
        let state = SessionState::new();
        let script = "Get-Service\nGet-Process | Select-Object -First 5";
        let out = WorkspaceMisroute
            .check(&remote("localhost", script), &state, &cfg())
            .unwrap();
        assert!(out.is_tool(Tool::WriteFile));
        assert_eq!(out.path(), Some("script.ps1"));
        assert_eq!(out.param_str("content"), Some(script));
    }

    #[test]
    fn test_misroute_leaves_remote_paths_alone() {
        let state = discovered(r#"["web-01"]"#);
        assert!(WorkspaceMisroute
            .check(&remote("web-01", "cat /etc/hosts"), &state, &cfg())
            .is_none());
    }

    #[test]
    fn test_authorization_requires_discovery() {
        let out = RemoteAuthorization
            .check(&remote("web-01", "uptime"), &SessionState::new(), &cfg())
            .unwrap();
        assert!(out.error().unwrap().starts_with(codes::DISCOVERY_REQUIRED));

        let mut failed = SessionState::new();
        failed.update_from_step("discover_agents", &Map::new(), "connection refused", false);
        let out = RemoteAuthorization
            .check(&remote("web-01", "uptime"), &failed, &cfg())
            .unwrap();
        assert!(out.error().unwrap().starts_with(codes::DISCOVERY_REQUIRED));
    }

    #[test]
    fn test_authorization_distinguishes_empty_and_unknown() {
        let empty = discovered("No agents found");
        let out = RemoteAuthorization
            .check(&remote("web-01", "uptime"), &empty, &cfg())
            .unwrap();
        assert!(out.error().unwrap().starts_with(codes::NO_AGENTS_AVAILABLE));

        let state = discovered(r#"["web-01", "db-01"]"#);
        let out = RemoteAuthorization
            .check(&remote("web-02", "uptime"), &state, &cfg())
            .unwrap();
        let error = out.error().unwrap();
        assert!(error.starts_with(codes::UNKNOWN_AGENT));
        assert!(error.contains("web-01, db-01"));

        assert!(RemoteAuthorization
            .check(&remote("db-01", "uptime"), &state, &cfg())
            .is_none());
    }

    #[test]
    fn test_preflight_repairs_unbalanced_braces() {
        let state = discovered(r#"["pc-1"]"#);
        let step = remote("pc-1", "Get-Process | ForEach-Object { $_.Name");
        let out = ScriptPreflight::default().check(&step, &state, &cfg()).unwrap();
        assert!(out.is_tool(Tool::RemoteExec));
        assert_eq!(out.agent_id(), Some("pc-1"));
        assert_eq!(out.command(), Some("Get-Process | ForEach-Object { $_.Name }"));
        assert!(out.note.starts_with("script fixed"));
    }

    #[test]
    fn test_preflight_passes_clean_commands() {
        let state = discovered(r#"["pc-1"]"#);
        assert!(ScriptPreflight::default()
            .check(&remote("pc-1", "Get-Service | Select-Object Name"), &state, &cfg())
            .is_none());
    }

    #[test]
    fn test_redirect_after_discovery() {
        let state = discovered(r#"["web-01", "db-01"]"#);
        let step = Step::for_tool(Tool::ReadFile, single("path", "/var/log/syslog"));
        let out = ForcedRedirect.check(&step, &state, &cfg()).unwrap();
        assert!(out.is_tool(Tool::RemoteExec));
        assert_eq!(out.agent_id(), Some("db-01"));
        assert_eq!(out.command(), Some("cat '/var/log/syslog'"));

        let shell = Step::for_tool(Tool::RunShell, single("command", "df -h"));
        let out = ForcedRedirect.check(&shell, &state, &cfg()).unwrap();
        assert_eq!(out.command(), Some("df -h"));
    }

    #[test]
    fn test_redirect_window_and_known_files() {
        let mut state = discovered(r#"["web-01"]"#);
        state.update_from_step("read_file", &single("path", "README.md"), "# hi", true);
        let known = Step::for_tool(Tool::ReadFile, single("path", "README.md"));
        assert!(ForcedRedirect.check(&known, &state, &cfg()).is_none());

        for _ in 0..cfg().redirect_window {
            state.update_from_step("noop", &Map::new(), "", true);
        }
        let step = Step::for_tool(Tool::ReadFile, single("path", "/etc/hosts"));
        assert!(ForcedRedirect.check(&step, &state, &cfg()).is_none());
    }
}
