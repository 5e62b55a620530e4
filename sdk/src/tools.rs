//! Tool vocabulary
//!
//! The set of actions the control core can emit. The external executor
//! implements each of them; the core only names them and reasons about
//! which ones touch files, which ones run remotely and which ones end a turn.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool name used when a reply names no recognizable tool.
pub const UNKNOWN_TOOL: &str = "unknown";

/// Every tool the core knows how to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Read a local file
    ReadFile,
    /// Create or overwrite a local file
    WriteFile,
    /// Insert text into a local file
    InsertText,
    /// Append text to the end of a local file
    AppendFile,
    /// Replace an exact text span in a local file
    ReplaceText,
    /// List the workspace tree
    ScanWorkspace,
    /// Run a command in the local shell
    RunShell,
    /// Dump the full session state (single use)
    DumpState,
    /// Validate a script without running it
    ValidateScript,
    /// Do nothing this turn
    Noop,
    /// Enumerate remote execution targets
    DiscoverAgents,
    /// Run a command on a remote target
    RemoteExec,
    /// End the task with an answer, an error or a question
    Complete,
}

impl Tool {
    /// All tools in a stable order.
    pub const ALL: [Tool; 13] = [
        Tool::ReadFile,
        Tool::WriteFile,
        Tool::InsertText,
        Tool::AppendFile,
        Tool::ReplaceText,
        Tool::ScanWorkspace,
        Tool::RunShell,
        Tool::DumpState,
        Tool::ValidateScript,
        Tool::Noop,
        Tool::DiscoverAgents,
        Tool::RemoteExec,
        Tool::Complete,
    ];

    /// Canonical wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::ReadFile => "read_file",
            Tool::WriteFile => "write_file",
            Tool::InsertText => "insert_text",
            Tool::AppendFile => "append_file",
            Tool::ReplaceText => "replace_text",
            Tool::ScanWorkspace => "scan_workspace",
            Tool::RunShell => "run_shell",
            Tool::DumpState => "dump_state",
            Tool::ValidateScript => "validate_script",
            Tool::Noop => "noop",
            Tool::DiscoverAgents => "discover_agents",
            Tool::RemoteExec => "remote_exec",
            Tool::Complete => "complete",
        }
    }

    /// Resolve a canonical name or one of the common aliases models produce.
    pub fn from_name(name: &str) -> Option<Tool> {
        let normalized = name.trim().to_ascii_lowercase().replace(&['-', ' '][..], "_");
        let tool = match normalized.as_str() {
            "read_file" | "read" | "cat_file" | "open_file" => Tool::ReadFile,
            "write_file" | "write" | "create_file" => Tool::WriteFile,
            "insert_text" | "insert" | "insert_file" => Tool::InsertText,
            "append_file" | "append" | "append_text" => Tool::AppendFile,
            "replace_text" | "replace" | "edit_file" | "replace_in_file" => Tool::ReplaceText,
            "scan_workspace" | "scan" | "list_files" | "list_dir" => Tool::ScanWorkspace,
            "run_shell" | "shell" | "execute" | "run_command" | "bash" => Tool::RunShell,
            "dump_state" | "state_dump" => Tool::DumpState,
            "validate_script" | "check_script" => Tool::ValidateScript,
            "noop" | "no_op" | "wait" => Tool::Noop,
            "discover_agents" | "list_agents" | "discover" => Tool::DiscoverAgents,
            "remote_exec" | "remote_execute" | "agent_exec" | "run_remote" => Tool::RemoteExec,
            "complete" | "finish" | "done" | "final_answer" | "answer" => Tool::Complete,
            _ => return None,
        };
        Some(tool)
    }

    /// Tools whose primary parameter is a file path
    pub fn is_file_targeted(self) -> bool {
        matches!(
            self,
            Tool::ReadFile
                | Tool::WriteFile
                | Tool::InsertText
                | Tool::AppendFile
                | Tool::ReplaceText
        )
    }

    /// Tools that modify an existing or new file
    pub fn is_edit(self) -> bool {
        matches!(
            self,
            Tool::WriteFile | Tool::InsertText | Tool::AppendFile | Tool::ReplaceText
        )
    }

    /// Tools that only make sense on the machine running the core
    pub fn is_local_only(self) -> bool {
        matches!(self, Tool::ReadFile | Tool::ScanWorkspace | Tool::RunShell)
    }

    pub fn is_remote(self) -> bool {
        matches!(self, Tool::RemoteExec)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Tool::Complete)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_name(tool.as_str()), Some(tool));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Tool::from_name("Read-File"), Some(Tool::ReadFile));
        assert_eq!(Tool::from_name("final_answer"), Some(Tool::Complete));
        assert_eq!(Tool::from_name("list agents"), Some(Tool::DiscoverAgents));
        assert_eq!(Tool::from_name("teleport"), None);
    }

    #[test]
    fn test_categories() {
        assert!(Tool::ReplaceText.is_edit());
        assert!(!Tool::ReadFile.is_edit());
        assert!(Tool::ReadFile.is_file_targeted());
        assert!(Tool::RunShell.is_local_only());
        assert!(!Tool::WriteFile.is_local_only());
        assert!(Tool::RemoteExec.is_remote());
        assert!(Tool::Complete.is_terminal());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Tool::DiscoverAgents).unwrap();
        assert_eq!(json, "\"discover_agents\"");
    }
}
