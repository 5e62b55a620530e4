//! Session State
//!
//! The ground-truth record of one task: files seen, edits made, commands
//! run, facts derived from their output, the plan and the remote targets
//! discovered so far.
//!
//! Tool results enter only through [`SessionState::update_from_step`].
//! Replaying the same sequence of results into a fresh state yields the same
//! state (timestamps aside).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use sdk::step::{agent_param, command_param, path_param};
use sdk::Tool;

use super::facts::{self, ErrorKind, ShellFact};
use super::scan::{self, FileMetadata};

pub const MAX_USER_REQUESTS: usize = 20;
pub const MAX_LEDGER_ENTRIES: usize = 50;
pub const MAX_OBSERVATIONS: usize = 20;

/// Characters kept from tool output in previews and summaries
pub const PREVIEW_CHARS: usize = 200;

/// One executed step as reported back by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step_id: String,
    pub tool: String,
    pub params: Map<String, Value>,
    pub output_summary: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CompletedStep {
    pub fn tool_kind(&self) -> Option<Tool> {
        Tool::from_name(&self.tool)
    }

    pub fn is_tool(&self, tool: Tool) -> bool {
        self.tool_kind() == Some(tool)
    }

    /// Normalized target path, if the step had one
    pub fn path(&self) -> Option<String> {
        path_param(&self.params).map(scan::normalize_path)
    }

    pub fn command(&self) -> Option<&str> {
        command_param(&self.params)
    }

    pub fn agent_id(&self) -> Option<&str> {
        agent_param(&self.params)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandFlow {
    pub original_goal: Option<String>,
    pub entries: Vec<CommandFlowEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFlowEntry {
    pub step_index: usize,
    pub tool: String,
    pub success: bool,
    pub output_preview: String,
    /// blake3 hex digest of the full output
    pub output_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Request,
    Action,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: LedgerKind,
    pub text: String,
}

/// Bounded record of what was asked, done and learned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub user_requests: VecDeque<String>,
    pub entries: VecDeque<LedgerEntry>,
    pub extracted_values: BTreeMap<String, String>,
}

impl Ledger {
    pub fn push_request(&mut self, request: impl Into<String>) {
        let request = request.into();
        push_bounded(&mut self.user_requests, request.clone(), MAX_USER_REQUESTS);
        self.push_entry(LedgerKind::Request, request);
    }

    pub fn push_entry(&mut self, kind: LedgerKind, text: impl Into<String>) {
        let entry = LedgerEntry {
            kind,
            text: text.into(),
        };
        push_bounded(&mut self.entries, entry, MAX_LEDGER_ENTRIES);
    }

    pub fn record_value(&mut self, key: &str, value: &str) {
        self.extracted_values
            .insert(key.to_string(), value.to_string());
        self.push_entry(LedgerKind::Value, format!("{}={}", key, value));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentFacts {
    pub project_types: BTreeSet<String>,
    pub frameworks_detected: BTreeSet<String>,
    pub package_managers: BTreeSet<String>,
    pub git_branch: Option<String>,
    pub python_version: Option<String>,
    pub node_version: Option<String>,
    /// `None` until some output said either way
    pub docker_running: Option<bool>,
    pub total_file_count: Option<usize>,
    pub total_dir_count: Option<usize>,
    pub observations: VecDeque<String>,
}

impl EnvironmentFacts {
    /// Record an observation unless it is already known.
    pub fn observe(&mut self, observation: impl Into<String>) {
        let observation = observation.into();
        if self.observations.contains(&observation) {
            return;
        }
        push_bounded(&mut self.observations, observation, MAX_OBSERVATIONS);
    }

    fn apply(&mut self, fact: ShellFact) {
        match fact {
            ShellFact::GitBranch(branch) => self.git_branch = Some(branch),
            ShellFact::PythonVersion(v) => self.python_version = Some(v),
            ShellFact::NodeVersion(v) => self.node_version = Some(v),
            ShellFact::DockerRunning(up) => self.docker_running = Some(up),
            ShellFact::WorkingDirectory(dir) => self.observe(format!("working directory: {}", dir)),
            ShellFact::Observation(text) => self.observe(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Todo,
    InProgress,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlanItem {
    pub index: usize,
    pub description: String,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub items: Vec<TaskPlanItem>,
}

impl TaskPlan {
    /// Build a plan from `(description, tool hint)` lines. The first item
    /// starts in progress.
    pub fn new(lines: Vec<(String, Option<String>)>) -> Self {
        let items = lines
            .into_iter()
            .enumerate()
            .map(|(index, (description, tool_hint))| TaskPlanItem {
                index: index + 1,
                description,
                status: if index == 0 {
                    PlanStatus::InProgress
                } else {
                    PlanStatus::Todo
                },
                tool_hint,
            })
            .collect();
        Self { items }
    }

    pub fn current(&self) -> Option<&TaskPlanItem> {
        self.items
            .iter()
            .find(|item| item.status == PlanStatus::InProgress)
    }

    pub fn is_finished(&self) -> bool {
        self.items
            .iter()
            .all(|item| matches!(item.status, PlanStatus::Completed | PlanStatus::Skipped))
    }

    /// Complete the current item and start the next pending one.
    pub fn advance(&mut self) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.status == PlanStatus::InProgress)
        {
            item.status = PlanStatus::Completed;
        }
        if let Some(next) = self
            .items
            .iter_mut()
            .find(|item| item.status == PlanStatus::Todo)
        {
            next.status = PlanStatus::InProgress;
        }
    }
}

/// Everything known about one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub(crate) files: IndexSet<String>,
    pub(crate) dirs: IndexSet<String>,
    pub(crate) file_metadata: BTreeMap<String, FileMetadata>,
    pub(crate) read_files: BTreeSet<String>,
    pub(crate) edited_files: BTreeSet<String>,
    pub(crate) scanned_paths: BTreeSet<String>,
    pub(crate) completed_steps: Vec<CompletedStep>,
    pub(crate) command_flow: CommandFlow,
    pub(crate) ledger: Ledger,
    pub(crate) environment_facts: EnvironmentFacts,
    pub(crate) task_plan: Option<TaskPlan>,
    pub(crate) discovered_agents: Vec<String>,
    pub(crate) queried_agents: Vec<String>,
    pub(crate) agents_verified: bool,
    pub(crate) user_info: BTreeMap<String, String>,
    pub(crate) replan_count: u32,
}

/// Read-only views. Every change goes through the mutators below.
impl SessionState {
    pub fn files(&self) -> &IndexSet<String> {
        &self.files
    }

    pub fn dirs(&self) -> &IndexSet<String> {
        &self.dirs
    }

    pub fn file_metadata(&self) -> &BTreeMap<String, FileMetadata> {
        &self.file_metadata
    }

    pub fn read_files(&self) -> &BTreeSet<String> {
        &self.read_files
    }

    pub fn edited_files(&self) -> &BTreeSet<String> {
        &self.edited_files
    }

    pub fn scanned_paths(&self) -> &BTreeSet<String> {
        &self.scanned_paths
    }

    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    pub fn command_flow(&self) -> &CommandFlow {
        &self.command_flow
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn environment_facts(&self) -> &EnvironmentFacts {
        &self.environment_facts
    }

    pub fn task_plan(&self) -> Option<&TaskPlan> {
        self.task_plan.as_ref()
    }

    pub fn discovered_agents(&self) -> &[String] {
        &self.discovered_agents
    }

    pub fn queried_agents(&self) -> &[String] {
        &self.queried_agents
    }

    pub fn agents_verified(&self) -> bool {
        self.agents_verified
    }

    pub fn user_info(&self) -> &BTreeMap<String, String> {
        &self.user_info
    }

    pub fn replan_count(&self) -> u32 {
        self.replan_count
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything except what the user told us about themselves.
    pub fn reset(&mut self) {
        let user_info = std::mem::take(&mut self.user_info);
        *self = Self {
            user_info,
            ..Self::default()
        };
    }

    /// Record the start of a task. The first goal becomes the original goal.
    pub fn begin_task(&mut self, goal: &str) {
        let goal = goal.trim();
        if goal.is_empty() {
            return;
        }
        self.ledger.push_request(goal);
        if self.command_flow.original_goal.is_none() {
            self.command_flow.original_goal = Some(goal.to_string());
        }
    }

    pub fn set_user_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.user_info.insert(key.into(), value.into());
    }

    pub fn set_plan(&mut self, plan: TaskPlan) {
        self.task_plan = Some(plan);
    }

    /// Replace the plan unless the replan budget is spent.
    pub fn replan(&mut self, plan: TaskPlan, max_replans: u32) -> bool {
        if self.replan_count >= max_replans {
            debug!("Replan budget exhausted ({} of {})", self.replan_count, max_replans);
            return false;
        }
        self.replan_count += 1;
        self.task_plan = Some(plan);
        true
    }

    /// Apply one executed tool result.
    pub fn update_from_step(
        &mut self,
        tool: &str,
        params: &Map<String, Value>,
        raw_output: &str,
        success: bool,
    ) {
        let step_index = self.completed_steps.len();
        let kind = Tool::from_name(tool);
        let path = path_param(params).map(scan::normalize_path);

        match kind {
            Some(Tool::ScanWorkspace) if success => self.apply_scan(params, raw_output),
            Some(Tool::ReadFile) if success => {
                if let Some(path) = &path {
                    self.files.insert(path.clone());
                    self.read_files.insert(path.clone());
                    let metadata = self.file_metadata.entry(path.clone()).or_default();
                    metadata.line_count = Some(raw_output.lines().count() as u64);
                }
            }
            Some(tool) if tool.is_edit() && success => {
                if let Some(path) = &path {
                    self.files.insert(path.clone());
                    self.edited_files.insert(path.clone());
                    if tool == Tool::WriteFile {
                        if let Some(content) = params.get("content").and_then(Value::as_str) {
                            let size = content.len() as u64;
                            self.file_metadata.insert(
                                path.clone(),
                                FileMetadata::new(Some(size), Some(content.lines().count() as u64)),
                            );
                        }
                    }
                }
            }
            Some(Tool::RunShell) => {
                let command = command_param(params).unwrap_or_default();
                for fact in facts::extract_shell_facts(command, raw_output) {
                    self.environment_facts.apply(fact);
                }
            }
            Some(Tool::RemoteExec) => {
                if let Some(agent) = agent_param(params) {
                    let agent = agent.trim().to_string();
                    if !facts::is_local_target(&agent) && !self.queried_agents.contains(&agent) {
                        self.queried_agents.push(agent);
                    }
                }
            }
            Some(Tool::DiscoverAgents) if success => {
                for agent in facts::parse_discovery(raw_output) {
                    if !self.discovered_agents.contains(&agent) {
                        self.discovered_agents.push(agent);
                    }
                }
                self.agents_verified = true;
            }
            _ => {}
        }

        if kind != Some(Tool::Complete) {
            for (value_kind, value) in facts::extract_values(raw_output) {
                self.ledger.record_value(value_kind.as_str(), &value);
            }
        }

        let error_type = (!success).then(|| facts::classify_error(raw_output));
        let error_message = (!success).then(|| preview(first_line(raw_output)));

        self.ledger.push_entry(
            LedgerKind::Action,
            format!(
                "{} {} -> {}",
                tool,
                path.as_deref()
                    .or_else(|| agent_param(params))
                    .unwrap_or_default(),
                if success { "ok" } else { "failed" }
            ),
        );

        self.command_flow.entries.push(CommandFlowEntry {
            step_index,
            tool: tool.to_string(),
            success,
            output_preview: preview(raw_output),
            output_hash: blake3::hash(raw_output.as_bytes()).to_hex().to_string(),
            agent_id: agent_param(params).map(str::to_string),
            command: command_param(params).map(str::to_string),
            error: error_message.clone(),
            duration_ms: duration_of(raw_output),
            tags: flow_tags(kind, params, success),
        });

        self.completed_steps.push(CompletedStep {
            step_id: format!("step_{}", step_index + 1),
            tool: tool.to_string(),
            params: params.clone(),
            output_summary: preview(raw_output),
            success,
            error_type,
            error_message,
            timestamp: Utc::now(),
        });

        if success && kind.map(|t| !t.is_terminal()).unwrap_or(false) {
            if let Some(plan) = self.task_plan.as_mut() {
                plan.advance();
            }
        }

        debug!(
            "Recorded step {} ({}, success={}): {} files, {} agents",
            step_index + 1,
            tool,
            success,
            self.files.len(),
            self.discovered_agents.len()
        );
    }

    fn apply_scan(&mut self, params: &Map<String, Value>, raw_output: &str) {
        let root = path_param(params)
            .map(scan::normalize_path)
            .unwrap_or_else(|| ".".to_string());
        self.scanned_paths.insert(root);

        let result = scan::parse_scan_output(raw_output);
        for entry in result.entries {
            if entry.is_dir {
                self.dirs.insert(entry.path);
                continue;
            }
            if entry.size_bytes.is_some() || entry.line_count.is_some() {
                self.file_metadata.insert(
                    entry.path.clone(),
                    FileMetadata::new(entry.size_bytes, entry.line_count),
                );
            }
            self.files.insert(entry.path);
        }

        let env = &mut self.environment_facts;
        env.total_file_count = result.total_files.or(Some(self.files.len()));
        env.total_dir_count = result.total_dirs.or(Some(self.dirs.len()));

        let markers = scan::detect_project(self.files.iter().map(String::as_str));
        env.project_types.extend(markers.project_types);
        env.frameworks_detected.extend(markers.frameworks);
        env.package_managers.extend(markers.package_managers);
    }

    pub fn recent_steps(&self, n: usize) -> &[CompletedStep] {
        let start = self.completed_steps.len().saturating_sub(n);
        &self.completed_steps[start..]
    }

    pub fn last_step(&self) -> Option<&CompletedStep> {
        self.completed_steps.last()
    }

    /// Index of the most recent discovery call
    pub fn last_discovery_index(&self) -> Option<usize> {
        self.completed_steps
            .iter()
            .rposition(|s| s.is_tool(Tool::DiscoverAgents))
    }

    /// Steps completed after the most recent discovery
    pub fn steps_since_discovery(&self) -> Option<usize> {
        self.last_discovery_index()
            .map(|i| self.completed_steps.len() - i - 1)
    }

    /// Discovery completed and found no targets
    pub fn discovery_empty(&self) -> bool {
        self.agents_verified && self.discovered_agents.is_empty()
    }

    /// Whether any remote call ran after step `index`
    pub fn remote_exec_since(&self, index: usize) -> bool {
        self.completed_steps
            .iter()
            .skip(index + 1)
            .any(|s| s.is_tool(Tool::RemoteExec))
    }

    pub fn last_successful_remote(&self) -> Option<&CompletedStep> {
        self.completed_steps
            .iter()
            .rev()
            .find(|s| s.is_tool(Tool::RemoteExec) && s.success)
    }

    pub fn has_run(&self, tool: Tool) -> bool {
        self.completed_steps.iter().any(|s| s.is_tool(tool))
    }

    /// Failed attempts of `tool` on `path`, counted back from the latest
    /// attempt and stopping at the first success.
    pub fn consecutive_failures(&self, tool: Tool, path: &str) -> usize {
        let path = scan::normalize_path(path);
        self.completed_steps
            .iter()
            .rev()
            .filter(|s| s.is_tool(tool) && s.path().as_deref() == Some(path.as_str()))
            .take_while(|s| !s.success)
            .count()
    }

    /// Failed steps at the end of the history, of any tool
    pub fn trailing_failures(&self) -> usize {
        self.completed_steps
            .iter()
            .rev()
            .take_while(|s| !s.success)
            .count()
    }

    pub fn is_read(&self, path: &str) -> bool {
        self.read_files.contains(&scan::normalize_path(path))
    }

    pub fn is_known_file(&self, path: &str) -> bool {
        self.files.contains(&scan::normalize_path(path))
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
}

/// First [`PREVIEW_CHARS`] characters of `text`
pub fn preview(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn duration_of(raw_output: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(raw_output.trim()).ok()?;
    value.get("duration_ms")?.as_u64()
}

fn flow_tags(kind: Option<Tool>, params: &Map<String, Value>, success: bool) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let mut tag = |t: &str| {
        tags.insert(t.to_string());
    };
    match kind {
        Some(Tool::RemoteExec) => match agent_param(params) {
            Some(agent) if facts::is_local_target(agent) => tag("local"),
            _ => tag("remote"),
        },
        Some(Tool::DiscoverAgents) => tag("discovery"),
        Some(Tool::ReadFile) => {
            tag("read");
            tag("local");
        }
        Some(Tool::ScanWorkspace) => {
            tag("scan");
            tag("local");
        }
        Some(Tool::Complete) => tag("terminal"),
        Some(tool) if tool.is_edit() => {
            tag("edit");
            tag("local");
        }
        _ => tag("local"),
    }
    if !success {
        tag("error");
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::step::params;

    fn scan_output() -> &'static str {
        "[DIR] src\n[FILE] src/main.rs (2 KB, 80 lines)\n[FILE] Cargo.toml (300 B)\nTotal: 2 files, 1 directory"
    }

    #[test]
    fn test_scan_populates_files() {
        let mut state = SessionState::new();
        state.update_from_step("scan_workspace", &Map::new(), scan_output(), true);
        state.update_from_step("scan_workspace", &Map::new(), scan_output(), true);

        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files.get_index(0).map(String::as_str), Some("src/main.rs"));
        assert_eq!(state.dirs.len(), 1);
        assert_eq!(state.file_metadata["src/main.rs"].line_count, Some(80));
        assert_eq!(state.file_metadata["Cargo.toml"].size_human.as_deref(), Some("300 B"));
        assert!(state.scanned_paths.contains("."));
        assert_eq!(state.environment_facts.total_file_count, Some(2));
        assert!(state.environment_facts.project_types.contains("rust"));
    }

    #[test]
    fn test_scan_big_file_size() {
        let mut state = SessionState::new();
        state.update_from_step(
            "scan_workspace",
            &Map::new(),
            "big.bin  file  2.5 MiB  2025-01-01",
            true,
        );
        assert!(state.is_known_file("big.bin"));
        assert_eq!(state.file_metadata["big.bin"].size_bytes, Some(2_621_440));
    }

    #[test]
    fn test_read_and_edit_tracking() {
        let mut state = SessionState::new();
        state.update_from_step("read_file", &params([("path", "./a.py")]), "x = 1\ny = 2", true);
        state.update_from_step(
            "write_file",
            &params([("path", "b.py"), ("content", "print(1)\n")]),
            "written",
            true,
        );
        state.update_from_step("read_file", &params([("path", "missing.py")]), "No such file", false);

        assert!(state.is_read("a.py"));
        assert!(!state.is_read("missing.py"));
        assert!(state.edited_files.contains("b.py"));
        assert_eq!(state.file_metadata["a.py"].line_count, Some(2));
        assert_eq!(state.completed_steps[2].error_type, Some(ErrorKind::NotFound));
        assert!(state.command_flow.entries[2].tags.contains("error"));
    }

    #[test]
    fn test_discovery_sets_verified_only_on_success() {
        let mut state = SessionState::new();
        state.update_from_step("remote_exec", &params([("agent_id", "web-01"), ("command", "ls")]), "", false);
        assert!(!state.agents_verified);
        assert_eq!(state.queried_agents, vec!["web-01"]);

        state.update_from_step("discover_agents", &Map::new(), "No agents available", true);
        assert!(state.agents_verified);
        assert!(state.discovery_empty());

        state.update_from_step("discover_agents", &Map::new(), r#"["web-01"]"#, true);
        assert_eq!(state.discovered_agents, vec!["web-01"]);
        assert!(!state.discovery_empty());
    }

    #[test]
    fn test_views_follow_updates() {
        let mut state = SessionState::new();
        state.begin_task("inspect the fleet");
        state.update_from_step("discover_agents", &Map::new(), "Agents found: none", true);
        assert!(state.agents_verified());
        assert!(state.discovered_agents().is_empty());

        state.update_from_step("discover_agents", &Map::new(), "- web-01 online", true);
        state.update_from_step("remote_exec", &params([("agent_id", "web-01"), ("command", "uptime")]), "up 3 days", true);
        assert_eq!(state.discovered_agents(), ["web-01".to_string()]);
        assert_eq!(state.queried_agents(), ["web-01".to_string()]);
        assert_eq!(state.completed_steps().len(), 3);
        assert_eq!(state.ledger().user_requests.len(), 1);
        assert_eq!(state.command_flow().original_goal.as_deref(), Some("inspect the fleet"));
        assert!(state.task_plan().is_none());
    }

    #[test]
    fn test_local_target_not_queried() {
        let mut state = SessionState::new();
        state.update_from_step("remote_exec", &params([("agent_id", "localhost"), ("command", "ls")]), "", true);
        assert!(state.queried_agents.is_empty());
        assert!(state.command_flow.entries[0].tags.contains("local"));
    }

    #[test]
    fn test_shell_facts_and_values() {
        let mut state = SessionState::new();
        state.update_from_step("run_shell", &params([("command", "git branch")]), "* main", true);
        state.update_from_step(
            "run_shell",
            &params([("command", "curl -s api")]),
            r#"{"url": "http://10.1.2.3:9000", "duration_ms": 42}"#,
            true,
        );
        assert_eq!(state.environment_facts.git_branch.as_deref(), Some("main"));
        assert_eq!(state.ledger.extracted_values["ip"], "10.1.2.3");
        assert_eq!(state.command_flow.entries[1].duration_ms, Some(42));
    }

    #[test]
    fn test_bounded_collections() {
        let mut state = SessionState::new();
        for i in 0..30 {
            state.begin_task(&format!("task {}", i));
            state.environment_facts.observe(format!("obs {}", i));
            state.environment_facts.observe(format!("obs {}", i));
        }
        assert_eq!(state.ledger.user_requests.len(), MAX_USER_REQUESTS);
        assert_eq!(state.ledger.user_requests.front().map(String::as_str), Some("task 10"));
        assert_eq!(state.environment_facts.observations.len(), MAX_OBSERVATIONS);
        assert_eq!(state.command_flow.original_goal.as_deref(), Some("task 0"));
        assert!(state.ledger.entries.len() <= MAX_LEDGER_ENTRIES);
    }

    #[test]
    fn test_plan_progression_and_replan() {
        let mut state = SessionState::new();
        state.set_plan(TaskPlan::new(vec![
            ("Scan".into(), Some("scan_workspace".into())),
            ("Edit".into(), None),
        ]));
        state.update_from_step("scan_workspace", &Map::new(), "a.rs", true);
        let plan = state.task_plan.as_ref().unwrap();
        assert_eq!(plan.items[0].status, PlanStatus::Completed);
        assert_eq!(plan.current().map(|i| i.index), Some(2));

        state.update_from_step("run_shell", &params([("command", "false")]), "exit 1", false);
        assert_eq!(state.task_plan.as_ref().unwrap().current().map(|i| i.index), Some(2));

        assert!(state.replan(TaskPlan::new(vec![("Retry".into(), None)]), 1));
        assert!(!state.replan(TaskPlan::new(vec![("Again".into(), None)]), 1));
        assert_eq!(state.replan_count, 1);
    }

    #[test]
    fn test_reset_keeps_user_info() {
        let mut state = SessionState::new();
        state.set_user_info("name", "sam");
        state.update_from_step("read_file", &params([("path", "a.py")]), "x", true);
        state.reset();
        assert!(state.read_files.is_empty());
        assert!(state.completed_steps.is_empty());
        assert_eq!(state.user_info["name"], "sam");
    }

    #[test]
    fn test_replay_is_deterministic() {
        let history = [
            ("scan_workspace", Map::new(), scan_output(), true),
            ("read_file", params([("path", "src/main.rs")]), "fn main() {}", true),
            ("replace_text", params([("path", "src/main.rs")]), "no match", false),
        ];
        let replay = || {
            let mut state = SessionState::new();
            for (tool, p, out, ok) in &history {
                state.update_from_step(tool, p, out, *ok);
            }
            for step in state.completed_steps.iter_mut() {
                step.timestamp = DateTime::<Utc>::default();
            }
            state
        };
        assert_eq!(replay(), replay());
    }

    #[test]
    fn test_consecutive_failures() {
        let mut state = SessionState::new();
        let p = params([("path", "a.py"), ("old_text", "x"), ("new_text", "y")]);
        state.update_from_step("replace_text", &p, "ok", true);
        state.update_from_step("replace_text", &p, "old_text not found", false);
        state.update_from_step("read_file", &params([("path", "a.py")]), "x", true);
        state.update_from_step("replace_text", &p, "old_text not found", false);
        assert_eq!(state.consecutive_failures(Tool::ReplaceText, "a.py"), 2);
        assert_eq!(state.trailing_failures(), 1);
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        let long = "é".repeat(300);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }
}
