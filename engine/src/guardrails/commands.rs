//! Shell command inspection shared by the routing and repetition checks

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use sdk::step::{params, single};
use sdk::Tool;

use super::script::Language;
use crate::session::scan::normalize_path;
use crate::session::SessionState;

/// Commands grouped by what they do, across shells
const FAMILIES: &[(&str, &[&str])] = &[
    ("list", &["ls", "dir", "get-childitem", "gci", "find", "tree"]),
    ("read", &["cat", "type", "get-content", "gc", "head", "tail", "less", "more"]),
    ("process", &["ps", "get-process", "tasklist", "top"]),
    ("disk", &["df", "du", "get-psdrive", "get-volume", "get-disk"]),
    ("service", &["systemctl", "service", "get-service", "sc"]),
    ("network", &["ip", "ifconfig", "ipconfig", "get-netipaddress", "netstat", "ss"]),
    ("system", &["uname", "hostname", "systeminfo", "get-computerinfo"]),
];

static ECHO_REDIRECT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^\s*echo\s+(.*?)\s*(>>?)\s*(\S+)\s*$").ok());

static DRIVE_PATH: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z]:[\\/]").ok());

/// Split a command into words, honoring single and double quotes.
pub fn words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;

    for ch in command.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                quoted = true;
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() || quoted {
                    words.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() || quoted {
        words.push(current);
    }
    words
}

/// The program a command runs: lowercased, without directory or `.exe`,
/// skipping `sudo`.
pub fn program(command: &str) -> Option<String> {
    let first_segment = command.split(&['|', ';', '\n'][..]).next().unwrap_or_default();
    words(first_segment)
        .into_iter()
        .find(|w| w != "sudo")
        .map(|w| {
            let name = w.rsplit(&['/', '\\'][..]).next().unwrap_or(&w).to_lowercase();
            name.strip_suffix(".exe").map(str::to_string).unwrap_or(name)
        })
}

/// Command family (`list`, `read`, ...), or the program itself when it
/// belongs to no known family.
pub fn family(command: &str) -> Option<String> {
    let program = program(command)?;
    let family = FAMILIES
        .iter()
        .find(|(_, members)| members.contains(&program.as_str()))
        .map(|(name, _)| name.to_string());
    Some(family.unwrap_or(program))
}

fn looks_like_path(word: &str) -> bool {
    word == "."
        || word == ".."
        || word.starts_with("./")
        || word.starts_with("../")
        || word.starts_with('~')
        || word.starts_with('/')
        || word.contains('/')
        || word.contains('\\')
        || DRIVE_PATH.as_ref().map(|re| re.is_match(word)).unwrap_or(false)
}

/// Path-like arguments of the first pipeline segment, normalized and sorted
pub fn path_args(command: &str) -> Vec<String> {
    let first_segment = command.split(&['|', ';', '\n'][..]).next().unwrap_or_default();
    let mut paths: Vec<String> = words(first_segment)
        .into_iter()
        .skip(1)
        .filter(|w| !w.starts_with('-') && looks_like_path(w))
        .map(|w| normalize_path(&w))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

/// Whether a command's arguments point into the local workspace.
pub fn targets_workspace(command: &str, state: &SessionState) -> bool {
    words(command).iter().skip(1).any(|w| {
        let w = w.as_str();
        w == "."
            || w.starts_with("./")
            || w.starts_with("../")
            || w.starts_with(".\\")
            || w.starts_with("workspace/")
            || state.files.contains(&normalize_path(w))
            || state.dirs.contains(&normalize_path(w))
    })
}

/// A multi-line script body rather than a single command
pub fn is_script_payload(command: &str) -> bool {
    command.trim_start().starts_with("#!")
        || command.lines().filter(|l| !l.trim().is_empty()).count() >= 2
}

/// Local tool call equivalent to a shell command.
pub fn local_equivalent(command: &str) -> (Tool, Map<String, Value>) {
    if let Some(caps) = ECHO_REDIRECT.as_ref().and_then(|re| re.captures(command)) {
        let text = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let content = format!("{}\n", unquote(text));
        let path = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let tool = if caps.get(2).map(|m| m.as_str()) == Some(">>") {
            Tool::AppendFile
        } else {
            Tool::WriteFile
        };
        return (tool, params([("path", path), ("content", content.as_str())]));
    }

    let parts = words(command);
    let args: Vec<&str> = parts
        .iter()
        .skip(1)
        .map(String::as_str)
        .filter(|w| !w.starts_with('-'))
        .collect();
    let program = program(command).unwrap_or_default();

    match program.as_str() {
        "touch" if !args.is_empty() => (
            Tool::WriteFile,
            params([("path", args[0]), ("content", "")]),
        ),
        "cat" | "type" | "get-content" | "gc" if !args.is_empty() => {
            (Tool::ReadFile, single("path", args[0]))
        }
        "find" | "ls" | "dir" | "get-childitem" | "gci" | "tree" => (
            Tool::ScanWorkspace,
            single("path", args.first().copied().unwrap_or(".")),
        ),
        _ => (Tool::RunShell, single("command", command)),
    }
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    for q in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// Shell an agent most likely runs, judged from commands already sent to it.
pub fn agent_language(state: &SessionState, agent: &str) -> Language {
    state
        .completed_steps
        .iter()
        .rev()
        .filter(|s| s.is_tool(Tool::RemoteExec) && s.agent_id() == Some(agent))
        .find_map(|s| s.command().map(Language::detect))
        .unwrap_or(Language::Bash)
}

/// Remote command equivalent to a local-only tool call.
pub fn remote_equivalent(tool: Tool, step_params: &Map<String, Value>, language: Language) -> Option<String> {
    let path = sdk::step::path_param(step_params);
    let language = match path {
        Some(p) if DRIVE_PATH.as_ref().map(|re| re.is_match(p)).unwrap_or(false) || p.contains('\\') => {
            Language::PowerShell
        }
        _ => language,
    };
    match (tool, language) {
        (Tool::ReadFile, Language::PowerShell) => Some(format!("Get-Content -Path '{}'", path?)),
        (Tool::ReadFile, Language::Bash) => Some(format!("cat '{}'", path?)),
        (Tool::ScanWorkspace, Language::PowerShell) => {
            Some(format!("Get-ChildItem -Path '{}'", path.unwrap_or(".")))
        }
        (Tool::ScanWorkspace, Language::Bash) => Some(format!("ls -la '{}'", path.unwrap_or("."))),
        (Tool::RunShell, _) => sdk::step::command_param(step_params).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_words_respect_quotes() {
        assert_eq!(
            words(r#"echo "a b" 'c d' e"#),
            vec!["echo", "a b", "c d", "e"]
        );
        assert_eq!(words(r#"touch """#), vec!["touch", ""]);
    }

    #[test]
    fn test_family() {
        assert_eq!(family("Get-ChildItem C:\\logs").as_deref(), Some("list"));
        assert_eq!(family("sudo ls -la /var").as_deref(), Some("list"));
        assert_eq!(family("/usr/bin/cat a.txt | head").as_deref(), Some("read"));
        assert_eq!(family("tasklist.exe /v").as_deref(), Some("process"));
        assert_eq!(family("whoami").as_deref(), Some("whoami"));
        assert_eq!(family("   "), None);
    }

    #[test]
    fn test_path_args() {
        assert_eq!(path_args("ls -la /var/log ./b | grep x"), vec!["/var/log", "b"]);
        assert_eq!(path_args(r"Get-ChildItem -Path C:\Users\admin"), vec!["C:/Users/admin"]);
        assert!(path_args("Get-Service").is_empty());
    }

    #[test]
    fn test_targets_workspace() {
        let mut state = SessionState::new();
        state.update_from_step("scan_workspace", &Map::new(), "src/app.py", true);
        assert!(targets_workspace("find . -name '*.py'", &state));
        assert!(targets_workspace("cat src/app.py", &state));
        assert!(!targets_workspace("cat /etc/hosts", &state));
    }

    #[test]
    fn test_local_equivalents() {
        let (tool, p) = local_equivalent("touch notes.md");
        assert_eq!(tool, Tool::WriteFile);
        assert_eq!(p["content"], "");

        let (tool, p) = local_equivalent("echo \"hello world\" > out.txt");
        assert_eq!(tool, Tool::WriteFile);
        assert_eq!(p["path"], "out.txt");
        assert_eq!(p["content"], "hello world\n");

        let (tool, _) = local_equivalent("echo more >> out.txt");
        assert_eq!(tool, Tool::AppendFile);

        assert_eq!(local_equivalent("cat ./a.py").0, Tool::ReadFile);
        assert_eq!(local_equivalent("find . -name x").1["path"], ".");
        assert_eq!(local_equivalent("ls").1["path"], ".");
        assert_eq!(local_equivalent("python3 main.py").0, Tool::RunShell);
    }

    #[test]
    fn test_remote_equivalents() {
        let read = single("path", "C:\\logs\\app.log");
        assert_eq!(
            remote_equivalent(Tool::ReadFile, &read, Language::Bash).as_deref(),
            Some("Get-Content -Path 'C:\\logs\\app.log'")
        );
        assert_eq!(
            remote_equivalent(Tool::ScanWorkspace, &Map::new(), Language::Bash).as_deref(),
            Some("ls -la '.'")
        );
        assert_eq!(remote_equivalent(Tool::WriteFile, &read, Language::Bash), None);
    }
}
