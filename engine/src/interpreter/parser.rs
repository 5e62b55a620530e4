//! Structured Response Parser
//!
//! Turns one complete model reply into exactly one [`Step`]:
//!
//! 1. Split the reply into reasoning and payload.
//! 2. Reject narrative payloads (see [`super::hallucination`]).
//! 3. Extract the first balanced `{...}` object, ignoring anything after it.
//! 4. Double stray backslashes so Windows paths survive decoding.
//! 5. Decode tolerantly: the model's object is matched against a handful of
//!    known shapes, falling back to the `unknown` tool rather than failing on
//!    unexpected keys.

use std::borrow::Cow;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use sdk::codes;
use sdk::{Step, Tool, UNKNOWN_TOOL};

use super::hallucination::{self, NarrativeKind};
use super::tags::{extract_json_with, extract_thinking_with, THINK_END, THINK_START};

/// Keys that may name the tool, canonical first
const TOOL_KEYS: &[&str] = &["tool", "action", "tool_name", "function", "name"];

/// Keys that may hold the parameter object, canonical first
const PARAM_KEYS: &[&str] = &["params", "parameters", "arguments", "args", "input"];

/// Top-level fields lifted into params when no parameter object exists
const FLAT_KEYS: &[&str] = &[
    "path",
    "file_path",
    "content",
    "command",
    "agent_id",
    "answer",
    "error",
    "question",
    "old_text",
    "new_text",
    "text",
    "line",
    "script",
    "language",
    "pattern",
];

/// Keys that may hold the model's explanation when no reasoning block exists
const REASONING_KEYS: &[&str] = &["reasoning", "thought", "thinking", "explanation"];

/// Substrings checked, in order, when the tool value is a sentence
const TOOL_KEYWORDS: &[(&str, Tool)] = &[
    ("discover", Tool::DiscoverAgents),
    ("remote", Tool::RemoteExec),
    ("replace", Tool::ReplaceText),
    ("insert", Tool::InsertText),
    ("append", Tool::AppendFile),
    ("write", Tool::WriteFile),
    ("create", Tool::WriteFile),
    ("read", Tool::ReadFile),
    ("scan", Tool::ScanWorkspace),
    ("list", Tool::ScanWorkspace),
    ("validate", Tool::ValidateScript),
    ("dump", Tool::DumpState),
    ("shell", Tool::RunShell),
    ("run", Tool::RunShell),
    ("complete", Tool::Complete),
    ("finish", Tool::Complete),
    ("answer", Tool::Complete),
];

/// Why a reply could not become a step
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("HALLUCINATED_OUTPUT: reply contained a {} ({matched:?}) instead of a tool call", .kind.description())]
    Hallucination { kind: NarrativeKind, matched: String },

    #[error("PARSE_ERROR: no JSON object found in reply")]
    NoJsonObject,

    #[error("PARSE_ERROR: {0}")]
    Decode(String),
}

impl ParseError {
    /// Intent recovery is only worth trying when the model simply failed to
    /// produce a readable object.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ParseError::Hallucination { .. })
    }

    /// The terminal step reported for this error.
    pub fn to_step(&self, reasoning: &str) -> Step {
        Step::complete_error(self.to_string())
            .with_reasoning(reasoning.to_string())
            .with_note(match self {
                ParseError::Hallucination { .. } => codes::HALLUCINATED_OUTPUT,
                _ => codes::PARSE_ERROR,
            })
    }
}

/// Parser configured with the reasoning markers in use
#[derive(Debug, Clone)]
pub struct ResponseParser {
    start: String,
    end: String,
}

impl ResponseParser {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Reasoning text of a reply, trimmed; empty when there is none.
    pub fn reasoning_of<'a>(&self, reply: &'a str) -> &'a str {
        extract_thinking_with(reply, &self.start, &self.end)
            .map(str::trim)
            .unwrap_or_default()
    }

    /// Parse a full reply into one step.
    pub fn parse(&self, reply: &str) -> Result<Step, ParseError> {
        let reasoning = self.reasoning_of(reply);
        let payload = extract_json_with(reply, &self.start, &self.end);

        if let Some(found) = hallucination::detect(payload) {
            warn!(
                "Rejecting narrative reply: {} at {} ({:?})",
                found.kind.description(),
                found.position,
                found.matched
            );
            return Err(ParseError::Hallucination {
                kind: found.kind,
                matched: found.matched,
            });
        }

        let (object, trailing) = extract_first_object(payload).ok_or(ParseError::NoJsonObject)?;
        if !trailing.trim().is_empty() {
            debug!(
                "Ignoring {} bytes after the first JSON object",
                trailing.trim().len()
            );
        }

        let normalized = normalize_backslashes(object);
        if let Cow::Owned(_) = normalized {
            debug!("Escaped stray backslashes in action payload");
        }

        decode(&normalized, reasoning)
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(THINK_START, THINK_END)
    }
}

/// Find the first balanced `{...}` object.
///
/// Braces and quotes inside string values do not count toward depth.
/// Returns the object and whatever follows it.
pub fn extract_first_object(text: &str) -> Option<(&str, &str)> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = text[start..].char_indices();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' if in_string => {
                // The escaped character never toggles state.
                chars.next();
            }
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + i + 1;
                    return Some((&text[start..end], &text[end..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Double every backslash that does not start a valid JSON escape.
pub fn normalize_backslashes(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut changed = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch != '\\' {
            out.push(ch);
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                out.push(ch);
                out.push(chars[i + 1]);
                i += 2;
            }
            Some('u') if is_unicode_escape(&chars[i + 2..]) => {
                out.extend(&chars[i..i + 6]);
                i += 6;
            }
            _ => {
                out.push_str("\\\\");
                changed = true;
                i += 1;
            }
        }
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

fn is_unicode_escape(rest: &[char]) -> bool {
    rest.len() >= 4 && rest[..4].iter().all(|c| c.is_ascii_hexdigit())
}

/// Decode an action object into a step.
pub fn decode(object: &str, reasoning: &str) -> Result<Step, ParseError> {
    let value: Value =
        serde_json::from_str(object).map_err(|e| ParseError::Decode(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ParseError::Decode("action payload is not an object".into()));
    };

    let params = decode_params(&map);
    let tool = decode_tool(&map, &params);

    let reasoning = if reasoning.is_empty() {
        first_string(&map, REASONING_KEYS).unwrap_or_default()
    } else {
        reasoning.to_string()
    };
    let note = first_string(&map, &["note"]).unwrap_or_default();
    let batch_id = match map.get("batch_id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(Step::new(tool, params)
        .with_reasoning(reasoning)
        .with_note(note)
        .with_batch_id(batch_id))
}

fn decode_tool(map: &Map<String, Value>, params: &Map<String, Value>) -> String {
    for key in TOOL_KEYS {
        let Some(raw) = map.get(*key).and_then(Value::as_str) else {
            continue;
        };
        if let Some(tool) = Tool::from_name(raw) {
            return tool.as_str().to_string();
        }
        if looks_like_sentence(raw) {
            if let Some(tool) = keyword_tool(raw) {
                debug!("Resolved tool {:?} from sentence {:?}", tool, raw);
                return tool.as_str().to_string();
            }
        }
        debug!("Unrecognized tool value {:?} under {:?}", raw, key);
        return UNKNOWN_TOOL.to_string();
    }

    // No tool key: a bare answer/error/question is a completion.
    if ["answer", "error", "question"]
        .iter()
        .any(|k| params.contains_key(*k))
    {
        return Tool::Complete.as_str().to_string();
    }
    UNKNOWN_TOOL.to_string()
}

fn decode_params(map: &Map<String, Value>) -> Map<String, Value> {
    for key in PARAM_KEYS {
        match map.get(*key) {
            Some(Value::Object(obj)) => return obj.clone(),
            Some(Value::String(s)) => {
                if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(s) {
                    return obj;
                }
            }
            _ => {}
        }
    }

    FLAT_KEYS
        .iter()
        .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn looks_like_sentence(raw: &str) -> bool {
    raw.split_whitespace().count() > 1 || raw.len() > 32
}

fn keyword_tool(raw: &str) -> Option<Tool> {
    let lower = raw.to_lowercase();
    if let Some(tool) = Tool::ALL
        .iter()
        .find(|t| lower.contains(t.as_str()) || lower.contains(&t.as_str().replace('_', " ")))
    {
        return Some(*tool);
    }
    TOOL_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, tool)| *tool)
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
}
