//! Fact extraction from tool output
//!
//! All classification here is best effort. Nothing in this module returns an
//! error: unknown text degrades to "no fact" or [`ErrorKind::Execution`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patterns::PatternTable;

/// Targets that mean "this machine" rather than a remote agent
pub const LOCAL_TARGETS: &[&str] = &["localhost", "local", "127.0.0.1", "::1"];

pub fn is_local_target(agent_id: &str) -> bool {
    let id = agent_id.trim();
    LOCAL_TARGETS.iter().any(|t| t.eq_ignore_ascii_case(id))
}

/// Failure taxonomy for reported tool errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    Timeout,
    Permission,
    NotFound,
    Connection,
    ResourceExhausted,
    Execution,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Connection => "connection",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Execution => "execution",
        }
    }

    /// Short remediation hint shown to the model next turn
    pub fn hint(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "fix the command syntax before retrying",
            ErrorKind::Timeout => "the operation timed out; narrow its scope",
            ErrorKind::Permission => "access was denied; try a different location",
            ErrorKind::NotFound => "the target does not exist; scan before retrying",
            ErrorKind::Connection => "the target was unreachable; verify it with discovery",
            ErrorKind::ResourceExhausted => "a resource limit was hit; reduce the workload",
            ErrorKind::Execution => "the command failed; read the error before retrying",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static ERROR_TABLE: Lazy<PatternTable<ErrorKind>> = Lazy::new(|| {
    PatternTable::compile(&[
        (
            r"(?i)syntax\s*error|unexpected token|parse\s*error|parsererror|unterminated|missing (closing|terminator)|invalid syntax",
            ErrorKind::Syntax,
        ),
        (r"(?i)\btime[ds]?\s*-?\s*out\b|deadline exceeded", ErrorKind::Timeout),
        (
            r"(?i)permission denied|access (is )?denied|unauthori[sz]ed|forbidden|operation not permitted|EACCES|EPERM",
            ErrorKind::Permission,
        ),
        (
            r"(?i)no such file|not found|cannot find|does not exist|not recognized as|ENOENT|404",
            ErrorKind::NotFound,
        ),
        (
            r"(?i)connection (refused|reset|closed)|could not connect|unreachable|name resolution|ECONNREFUSED|host not found|network is down",
            ErrorKind::Connection,
        ),
        (
            r"(?i)out of memory|no space left|disk full|quota exceeded|too many open files|resource (temporarily )?unavailable|ENOSPC|ENOMEM",
            ErrorKind::ResourceExhausted,
        ),
    ])
});

/// Classify free-form error text. Unknown text is [`ErrorKind::Execution`].
pub fn classify_error(text: &str) -> ErrorKind {
    ERROR_TABLE.classify(text).unwrap_or(ErrorKind::Execution)
}

/// A fact about the environment read from shell output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellFact {
    GitBranch(String),
    PythonVersion(String),
    NodeVersion(String),
    DockerRunning(bool),
    WorkingDirectory(String),
    Observation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FactKind {
    GitBranch,
    PythonVersion,
    NodeVersion,
    BareNodeVersion,
    DockerUp,
    DockerDown,
    Count,
}

static SHELL_TABLE: Lazy<PatternTable<FactKind>> = Lazy::new(|| {
    PatternTable::compile(&[
        (r"(?m)^\*\s+([\w./\-]+)\s*$", FactKind::GitBranch),
        (r"(?i)\bon branch\s+([\w./\-]+)", FactKind::GitBranch),
        (r"(?i)\bpython\s+(\d+\.\d+(?:\.\d+)?)", FactKind::PythonVersion),
        (r"(?i)\bnode(?:\.js)?\s+v?(\d+\.\d+\.\d+)", FactKind::NodeVersion),
        (r"(?m)^v(\d+\.\d+\.\d+)\s*$", FactKind::BareNodeVersion),
        (
            r"(?i)(cannot connect to the docker daemon|docker daemon is not running|is the docker daemon running)",
            FactKind::DockerDown,
        ),
        (r"(?im)^(container id\s+image|server version:)", FactKind::DockerUp),
        (
            r"(?i)\b(\d+)\s+(entries|packages|items|files|directories|containers|processes|services)\b",
            FactKind::Count,
        ),
    ])
});

static ABSOLUTE_PATH: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(/[^\s]*|[A-Za-z]:\\[^\r\n]*)$").ok());

/// Extract environment facts from the output of `command`.
///
/// Node versions printed as a bare `vX.Y.Z` only count when the command
/// asked node, and `* name` lines only count as a branch for git commands.
pub fn extract_shell_facts(command: &str, output: &str) -> Vec<ShellFact> {
    let command = command.to_lowercase();
    let mut facts = Vec::new();

    for (re, kind) in SHELL_TABLE.rows() {
        let Some(caps) = re.captures(output) else {
            continue;
        };
        let value = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let fact = match kind {
            FactKind::GitBranch if command.contains("git") => ShellFact::GitBranch(value),
            FactKind::PythonVersion => ShellFact::PythonVersion(value),
            FactKind::NodeVersion => ShellFact::NodeVersion(value),
            FactKind::BareNodeVersion if command.contains("node") => ShellFact::NodeVersion(value),
            FactKind::DockerUp => ShellFact::DockerRunning(true),
            FactKind::DockerDown => ShellFact::DockerRunning(false),
            FactKind::Count => {
                let noun = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                ShellFact::Observation(format!("{} {}", value, noun.to_lowercase()))
            }
            _ => continue,
        };
        if !facts.contains(&fact) {
            facts.push(fact);
        }
    }

    let asked_location =
        matches!(command.trim(), "pwd" | "cd") || command.contains("get-location");
    if asked_location {
        let first = output.lines().map(str::trim).find(|l| !l.is_empty());
        if let Some(path) = first.filter(|l| matches_regex(&ABSOLUTE_PATH, l)) {
            facts.push(ShellFact::WorkingDirectory(path.to_string()));
        }
    }
    facts
}

/// Kinds of values worth remembering across turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Url,
    Ip,
    Port,
    Uuid,
    ModifiedFile,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Url => "url",
            ValueKind::Ip => "ip",
            ValueKind::Port => "port",
            ValueKind::Uuid => "uuid",
            ValueKind::ModifiedFile => "modified_file",
        }
    }
}

static VALUE_TABLE: Lazy<PatternTable<ValueKind>> = Lazy::new(|| {
    PatternTable::compile(&[
        (r#"\bhttps?://[^\s"'<>)]+"#, ValueKind::Url),
        (r"\b(?:\d{1,3}\.){3}\d{1,3}\b", ValueKind::Ip),
        (r"(?i)\bport\s*[:=]?\s*(\d{2,5})\b", ValueKind::Port),
        (
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            ValueKind::Uuid,
        ),
        (
            r#"(?i)\b(?:wrote|modified|updated|created|saved)\s+(?:file\s+)?['"]?([\w./\\\-]+\.\w+)"#,
            ValueKind::ModifiedFile,
        ),
    ])
});

/// Extract remembered values, first occurrence of each kind only.
pub fn extract_values(output: &str) -> Vec<(ValueKind, String)> {
    VALUE_TABLE
        .rows()
        .filter_map(|(re, kind)| {
            let caps = re.captures(output)?;
            let value = caps.get(1).or_else(|| caps.get(0))?;
            Some((kind, value.as_str().trim_end_matches(&['.', ','][..]).to_string()))
        })
        .collect()
}

static NO_AGENTS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?im)\bno (remote )?agents?\b|\b0 agents?\b|\bnone (found|available)\b|^\s*\[\s*\]\s*$|^\s*agents?(\s+(found|available|online))?\s*:\s*(none|0|\[\s*\])\s*$",
    )
    .ok()
});

/// Parse discovery output into agent ids.
///
/// Accepts a JSON list (of ids or of objects carrying an id), a JSON object
/// with an `agents` list, or one agent per line. Explicit "no agents"
/// output yields an empty list.
pub fn parse_discovery(output: &str) -> Vec<String> {
    let trimmed = output.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return dedup(agents_from_json(&value));
    }
    if matches_regex(&NO_AGENTS, trimmed) {
        return Vec::new();
    }

    let ids = trimmed
        .lines()
        .map(|line| strip_list_marker(line.trim()))
        .filter(|line| !line.is_empty() && !line.ends_with(':') && !is_discovery_header(line))
        .filter(|line| !reads_as_none(line))
        .filter_map(|line| line.split_whitespace().next())
        .map(|id| id.trim_end_matches(&[',', ':'][..]).to_string())
        .filter(|id| !id.is_empty())
        .collect();
    dedup(ids)
}

fn agents_from_json(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(agent_id_of).collect(),
        Value::Object(map) => map
            .get("agents")
            .or_else(|| map.get("targets"))
            .map(agents_from_json)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn agent_id_of(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => ["id", "agent_id", "name", "hostname"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

static LIST_MARKER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s*").ok());

fn strip_list_marker(line: &str) -> &str {
    match LIST_MARKER.as_ref().and_then(|re| re.find(line)) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

/// A line such as `web: none` names a slot, not an agent.
fn reads_as_none(line: &str) -> bool {
    line.split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim().eq_ignore_ascii_case("none"))
        .unwrap_or(false)
}

fn is_discovery_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    (lower.starts_with("agent") && (lower.contains("status") || lower.contains("id")))
        || lower.starts_with("found ")
        || lower.starts_with("discovered ")
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn matches_regex(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}
