//! Step: one candidate or final agent action
//!
//! A `Step` is a value. Policy checks never mutate one in place; they build a
//! replacement with [`Step::replace_with`] or one of the terminal constructors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::Tool;

/// Parameter keys that may carry a file path, in lookup order
pub const PATH_KEYS: &[&str] = &["path", "file_path", "file", "filename", "target_file"];

/// Parameter keys that may carry command text, in lookup order
pub const COMMAND_KEYS: &[&str] = &["command", "cmd", "script"];

/// Parameter keys that may carry a remote target id, in lookup order
pub const AGENT_KEYS: &[&str] = &["agent_id", "agent", "target"];

/// One agent action: a tool name, its parameters and the model's explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier, regenerated for every new value
    pub id: String,

    /// Tool name (canonical when recognized, `unknown` otherwise)
    pub tool: String,

    /// Tool parameters
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Reasoning text shown to the user
    #[serde(default)]
    pub reasoning: String,

    /// Short note explaining the step (guardrail rewrites append here)
    #[serde(default)]
    pub note: String,

    /// Optional batch the step belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl Step {
    /// Create a new step with a fresh id
    pub fn new(tool: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: format!("step_{}", uuid::Uuid::new_v4()),
            tool: tool.into(),
            params,
            reasoning: String::new(),
            note: String::new(),
            batch_id: None,
        }
    }

    /// Create a step for a known tool
    pub fn for_tool(tool: Tool, params: Map<String, Value>) -> Self {
        Self::new(tool.as_str(), params)
    }

    /// Benign completion carrying an answer
    pub fn complete_answer(answer: impl Into<String>) -> Self {
        Self::for_tool(Tool::Complete, single("answer", answer.into()))
    }

    /// Terminal completion carrying an error
    pub fn complete_error(error: impl Into<String>) -> Self {
        Self::for_tool(Tool::Complete, single("error", error.into()))
    }

    /// Terminal completion asking the user a question
    pub fn complete_question(question: impl Into<String>) -> Self {
        Self::for_tool(Tool::Complete, single("question", question.into()))
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build a replacement step that keeps this step's reasoning and batch.
    ///
    /// The note records why the replacement happened.
    pub fn replace_with(&self, tool: Tool, params: Map<String, Value>, note: &str) -> Step {
        Step::for_tool(tool, params)
            .with_reasoning(self.reasoning.clone())
            .with_note(note.to_string())
            .with_batch_id(self.batch_id.clone())
    }

    /// Build a terminal error replacement that keeps this step's reasoning.
    pub fn veto(&self, error: impl Into<String>) -> Step {
        Step::complete_error(error)
            .with_reasoning(self.reasoning.clone())
            .with_note(format!("blocked {}", self.tool))
            .with_batch_id(self.batch_id.clone())
    }

    /// Recognized tool, if the name is part of the vocabulary
    pub fn tool_kind(&self) -> Option<Tool> {
        Tool::from_name(&self.tool)
    }

    pub fn is_tool(&self, tool: Tool) -> bool {
        self.tool_kind() == Some(tool)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_tool(Tool::Complete)
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// First non-empty string parameter among `keys`
    pub fn first_param(&self, keys: &[&str]) -> Option<&str> {
        first_param(&self.params, keys)
    }

    pub fn path(&self) -> Option<&str> {
        path_param(&self.params)
    }

    pub fn command(&self) -> Option<&str> {
        command_param(&self.params)
    }

    pub fn agent_id(&self) -> Option<&str> {
        agent_param(&self.params)
    }

    pub fn answer(&self) -> Option<&str> {
        self.param_str("answer")
    }

    pub fn error(&self) -> Option<&str> {
        self.param_str("error")
    }

    pub fn question(&self) -> Option<&str> {
        self.param_str("question")
    }

    /// Structural equality that ignores the generated id
    pub fn same_action(&self, other: &Step) -> bool {
        self.tool == other.tool
            && self.params == other.params
            && self.reasoning == other.reasoning
            && self.note == other.note
            && self.batch_id == other.batch_id
    }
}

/// First non-empty string value among `keys`
pub fn first_param<'a>(params: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| params.get(*k).and_then(Value::as_str))
        .find(|v| !v.trim().is_empty())
}

/// File path carried by a parameter map
pub fn path_param(params: &Map<String, Value>) -> Option<&str> {
    first_param(params, PATH_KEYS)
}

/// Command text carried by a parameter map
pub fn command_param(params: &Map<String, Value>) -> Option<&str> {
    first_param(params, COMMAND_KEYS)
}

/// Remote target id carried by a parameter map
pub fn agent_param(params: &Map<String, Value>) -> Option<&str> {
    first_param(params, AGENT_KEYS)
}

/// Build a one-entry parameter map
pub fn single(key: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value.into());
    map
}

/// Build a parameter map from string pairs
pub fn params<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}
