//! Script validation
//!
//! Checks a shell script before it is sent anywhere:
//!
//! - **syntax**: unbalanced quotes, braces, parens and brackets
//! - **logic**: pipeline blocks that never bind the current item
//! - **safety**: destructive commands (recursive deletes of a root, disk formats)
//! - **resource**: interactive prompts and commands that never return
//!
//! Deterministic fixes (closing delimiters, swapping a legacy idiom for the
//! target shell's equivalent, bounding a command that would run forever) are
//! applied to a copy of the script and returned as `fixed_script`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Script language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    PowerShell,
    Bash,
}

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "powershell" | "pwsh" | "ps" | "ps1" => Some(Language::PowerShell),
            "bash" | "sh" | "shell" | "zsh" => Some(Language::Bash),
            _ => None,
        }
    }

    /// Guess the language from the script text.
    pub fn detect(script: &str) -> Self {
        if matches(&CMDLET, script) || script.contains("$_") || script.contains("$env:") {
            Language::PowerShell
        } else {
            Language::Bash
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::PowerShell => f.write_str("powershell"),
            Language::Bash => f.write_str("bash"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Syntax,
    Logic,
    Safety,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptIssue {
    #[serde(rename = "type")]
    pub kind: IssueType,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub suggestion: String,
}

/// Result of validating one script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ScriptIssue>,
    pub can_fix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_script: Option<String>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ScriptIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

static CMDLET: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\b(Get|Set|New|Remove|Start|Stop|Invoke|Select|Where|ForEach|Write|Test|Out|Format)-[A-Z][A-Za-z]+").ok()
});

static PIPELINE_BLOCK: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(ForEach-Object|Where-Object|%|\?)\s*\{([^{}]*)\}").ok()
});

static FOREACH_LOOP: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\bforeach\s*\(\s*\$(\w+)\s+in\s+[^)]*\)\s*\{([^{}]*)\}").ok()
});

/// (pattern, description, suggestion) for commands that destroy data
const SAFETY_RULES: &[(&str, &str, &str)] = &[
    (
        r"\brm\s+-[a-zA-Z]*r[a-zA-Z]*f?[a-zA-Z]*\s+(/|~|\*)(\s|$)",
        "recursive delete of a root or home directory",
        "target a specific subdirectory",
    ),
    (
        r"(?i)\bRemove-Item\b.*-Recurse.*\s[A-Za-z]:\\?(\s|$|\*)",
        "recursive delete of a drive root",
        "target a specific subdirectory",
    ),
    (r"(?i)\b(mkfs(\.\w+)?|Format-Volume|format\s+[A-Za-z]:)", "disk format", "do not format disks from a task"),
    (r":\(\)\s*\{\s*:\|:&\s*\};:", "fork bomb", "remove this line"),
    (r"\bdd\s+if=.*\bof=/dev/(sd|nvme|hd)", "raw write to a block device", "write to a file instead"),
];

/// Legacy or foreign idioms with a deterministic replacement, per language
struct IdiomRule {
    language: Language,
    pattern: &'static str,
    replacement: Option<&'static str>,
    description: &'static str,
    suggestion: &'static str,
}

const IDIOM_RULES: &[IdiomRule] = &[
    IdiomRule {
        language: Language::PowerShell,
        pattern: r"\s*&&\s*",
        replacement: Some("; "),
        description: "'&&' is not supported by Windows PowerShell 5",
        suggestion: "separate commands with ';'",
    },
    IdiomRule {
        language: Language::PowerShell,
        pattern: r"/dev/null",
        replacement: Some("$$null"),
        description: "/dev/null does not exist on Windows",
        suggestion: "redirect to $null",
    },
    IdiomRule {
        language: Language::PowerShell,
        pattern: r"(?m)^\s*export\s+(\w+)=",
        replacement: Some("$$env:$1 = "),
        description: "'export' is a POSIX shell builtin",
        suggestion: "assign to $env:NAME",
    },
    IdiomRule {
        language: Language::PowerShell,
        pattern: r"\|\s*grep\s+",
        replacement: Some("| Select-String "),
        description: "grep is not available in PowerShell",
        suggestion: "use Select-String",
    },
    IdiomRule {
        language: Language::Bash,
        pattern: r"\b(Get-ChildItem|Get-Content|Get-Process|Set-Location|Write-Host)\b",
        replacement: None,
        description: "PowerShell cmdlet in a POSIX shell script",
        suggestion: "use the POSIX equivalent or run under PowerShell",
    },
    IdiomRule {
        language: Language::Bash,
        pattern: r"\$env:\w+",
        replacement: None,
        description: "PowerShell environment syntax in a POSIX shell script",
        suggestion: "use $NAME",
    },
];

/// Commands that wait on a terminal or never exit
struct HangRule {
    language: Option<Language>,
    pattern: &'static str,
    /// The rest of the command already bounds the call
    bounded_by: Option<&'static str>,
    replacement: Option<&'static str>,
    description: &'static str,
    suggestion: &'static str,
}

const HANG_RULES: &[HangRule] = &[
    HangRule {
        language: None,
        pattern: r"(?i)\b(Read-Host|Get-Credential|pause)\b",
        bounded_by: None,
        replacement: None,
        description: "interactive prompt will wait forever",
        suggestion: "pass the value as a parameter",
    },
    HangRule {
        language: Some(Language::Bash),
        pattern: r"(?m)(^|[;&|]\s*)read\s+",
        bounded_by: None,
        replacement: None,
        description: "'read' waits for terminal input",
        suggestion: "pass the value as an argument",
    },
    HangRule {
        language: None,
        pattern: r"\btail\s+-f\b",
        bounded_by: None,
        replacement: Some("tail -n 50"),
        description: "'tail -f' never exits",
        suggestion: "read a bounded number of lines",
    },
    HangRule {
        language: Some(Language::Bash),
        pattern: r"\bping\s+([^-\s][^\s;|&]*)",
        bounded_by: Some(r"\s-[cnw]\s*\d"),
        replacement: Some("ping -c 4 $1"),
        description: "'ping' without a count never exits on Linux",
        suggestion: "pass -c with a count",
    },
    HangRule {
        language: None,
        pattern: r"\btop\s*($|[;|&])",
        bounded_by: None,
        replacement: Some("top -b -n 1$1"),
        description: "'top' is interactive",
        suggestion: "use batch mode with one iteration",
    },
    HangRule {
        language: Some(Language::PowerShell),
        pattern: r"(?i)\bGet-Content\b([^|;\n]*)\s-Wait\b",
        bounded_by: None,
        replacement: Some("Get-Content$1 -Tail 50"),
        description: "'Get-Content -Wait' never exits",
        suggestion: "read a bounded number of lines",
    },
];

static SAFETY: Lazy<Vec<(Regex, &'static (&'static str, &'static str, &'static str))>> =
    Lazy::new(|| compile(SAFETY_RULES, |r| r.0));
static IDIOMS: Lazy<Vec<(Regex, &'static IdiomRule)>> = Lazy::new(|| compile(IDIOM_RULES, |r| r.pattern));
static HANGS: Lazy<Vec<(Regex, &'static HangRule)>> = Lazy::new(|| compile(HANG_RULES, |r| r.pattern));
static HANG_BOUNDS: Lazy<Vec<(Regex, &'static HangRule)>> = Lazy::new(|| {
    HANG_RULES
        .iter()
        .filter_map(|rule| {
            let pattern = rule.bounded_by?;
            match Regex::new(pattern) {
                Ok(re) => Some((re, rule)),
                Err(e) => {
                    tracing::error!("Dropping invalid script rule {:?}: {}", pattern, e);
                    None
                }
            }
        })
        .collect()
});

/// Whether the command segment starting at `start` already bounds the call.
fn already_bounded(rule: &HangRule, text: &str, start: usize) -> bool {
    let Some((bound, _)) = HANG_BOUNDS.iter().find(|(_, r)| std::ptr::eq(*r, rule)) else {
        return false;
    };
    let rest = &text[start..];
    let end = rest.find(|c: char| matches!(c, ';' | '|' | '&' | '\n')).unwrap_or(rest.len());
    bound.is_match(&rest[..end])
}

fn compile<T>(rules: &'static [T], pattern: fn(&T) -> &'static str) -> Vec<(Regex, &'static T)> {
    rules
        .iter()
        .filter_map(|rule| match Regex::new(pattern(rule)) {
            Ok(re) => Some((re, rule)),
            Err(e) => {
                tracing::error!("Dropping invalid script rule {:?}: {}", pattern(rule), e);
                None
            }
        })
        .collect()
}

/// Script validator
#[derive(Debug, Default, Clone)]
pub struct ScriptValidator;

impl ScriptValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a script and compute deterministic fixes.
    pub fn validate(&self, script: &str, language: Language) -> ValidationReport {
        let mut issues = Vec::new();
        let mut fixed = script.to_string();
        let mut unfixable_error = false;

        for (re, rule) in IDIOMS.iter().filter(|(_, r)| r.language == language) {
            let Some(m) = re.find(&fixed) else {
                continue;
            };
            let line = line_of(&fixed, m.start());
            let severity = if rule.replacement.is_some() {
                Severity::Warning
            } else {
                unfixable_error = true;
                Severity::Error
            };
            issues.push(issue(IssueType::Syntax, severity, rule.description, Some(line), rule.suggestion));
            if let Some(replacement) = rule.replacement {
                fixed = re.replace_all(&fixed, replacement).into_owned();
            }
        }

        for (re, rule) in HANGS
            .iter()
            .filter(|(_, r)| r.language.map(|l| l == language).unwrap_or(true))
        {
            let Some(m) = re.find_iter(&fixed).find(|m| !already_bounded(rule, &fixed, m.start())) else {
                continue;
            };
            let line = line_of(&fixed, m.start());
            issues.push(issue(IssueType::Resource, Severity::Error, rule.description, Some(line), rule.suggestion));
            match rule.replacement {
                Some(replacement) => {
                    fixed = re
                        .replace_all(&fixed, |caps: &Captures| {
                            let whole = caps.get(0).map(|m| (m.start(), m.as_str())).unwrap_or((0, ""));
                            if already_bounded(rule, &fixed, whole.0) {
                                whole.1.to_string()
                            } else {
                                let mut out = String::new();
                                caps.expand(replacement, &mut out);
                                out
                            }
                        })
                        .into_owned()
                }
                None => unfixable_error = true,
            }
        }

        for (re, (_, description, suggestion)) in SAFETY.iter() {
            if let Some(m) = re.find(script) {
                issues.push(issue(IssueType::Safety, Severity::Error, description, Some(line_of(script, m.start())), suggestion));
                unfixable_error = true;
            }
        }

        if language == Language::PowerShell {
            issues.extend(unbound_blocks(script));
        }

        let balance = Balance::scan(&fixed, language);
        if let Some((quote, line)) = balance.open_quote {
            issues.push(issue(
                IssueType::Syntax,
                Severity::Error,
                &format!("unterminated {} quote", quote_name(quote)),
                Some(line),
                "close the string",
            ));
            fixed = close_quote(&fixed, quote, line);
        }

        // Delimiters are rescanned once the quotes are closed.
        let balance = Balance::scan(&fixed, language);
        for (closer, line) in &balance.stray {
            issues.push(issue(
                IssueType::Syntax,
                Severity::Error,
                &format!("unmatched '{}'", closer),
                Some(*line),
                "remove the extra delimiter",
            ));
            unfixable_error = true;
        }
        if !balance.open.is_empty() {
            for (opener, line) in &balance.open {
                issues.push(issue(
                    IssueType::Syntax,
                    Severity::Error,
                    &format!("unclosed '{}'", opener),
                    Some(*line),
                    &format!("add the closing '{}'", closer_of(*opener)),
                ));
            }
            let closers: Vec<String> = balance
                .open
                .iter()
                .rev()
                .map(|(opener, _)| closer_of(*opener).to_string())
                .collect();
            fixed = format!("{} {}", fixed.trim_end(), closers.join(" "));
        }

        let valid = !issues.iter().any(|i| i.severity == Severity::Error);
        let changed = fixed != script;
        ValidationReport {
            valid,
            can_fix: changed && !unfixable_error,
            fixed_script: changed.then_some(fixed),
            issues,
        }
    }
}

/// Quote and delimiter state after scanning a script
#[derive(Debug, Default)]
struct Balance {
    open_quote: Option<(char, usize)>,
    open: Vec<(char, usize)>,
    stray: Vec<(char, usize)>,
}

impl Balance {
    fn scan(script: &str, language: Language) -> Self {
        let escape = match language {
            Language::PowerShell => '`',
            Language::Bash => '\\',
        };
        let mut balance = Balance::default();
        let mut line = 1;
        let mut chars = script.chars().peekable();
        let mut at_token_start = true;

        while let Some(ch) = chars.next() {
            if ch == '\n' {
                line += 1;
            }
            match balance.open_quote {
                Some((quote, _)) => {
                    if ch == escape && quote == '"' {
                        chars.next();
                    } else if ch == quote {
                        balance.open_quote = None;
                    }
                }
                None => match ch {
                    c if c == escape => {
                        chars.next();
                    }
                    '"' | '\'' => balance.open_quote = Some((ch, line)),
                    '#' if at_token_start => {
                        // Comment to end of line.
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                                break;
                            }
                        }
                    }
                    '{' | '(' | '[' => balance.open.push((ch, line)),
                    '}' | ')' | ']' => match balance.open.last() {
                        Some((opener, _)) if closer_of(*opener) == ch => {
                            balance.open.pop();
                        }
                        _ => balance.stray.push((ch, line)),
                    },
                    _ => {}
                },
            }
            at_token_start = ch.is_whitespace() || ch == ';';
        }
        balance
    }
}

fn closer_of(opener: char) -> char {
    match opener {
        '{' => '}',
        '(' => ')',
        _ => ']',
    }
}

fn quote_name(quote: char) -> &'static str {
    if quote == '"' {
        "double"
    } else {
        "single"
    }
}

/// Append `quote` to the end of line `line` (1-based).
fn close_quote(script: &str, quote: char, line: usize) -> String {
    script
        .split('\n')
        .enumerate()
        .map(|(i, text)| {
            if i + 1 == line {
                format!("{}{}", text.trim_end(), quote)
            } else {
                text.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unbound_blocks(script: &str) -> Vec<ScriptIssue> {
    let mut issues = Vec::new();
    if let Some(re) = PIPELINE_BLOCK.as_ref() {
        for caps in re.captures_iter(script) {
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if !body.contains("$_") && !body.to_lowercase().contains("$psitem") {
                let at = caps.get(0).map(|m| m.start()).unwrap_or(0);
                issues.push(issue(
                    IssueType::Logic,
                    Severity::Warning,
                    "pipeline block never references the current item",
                    Some(line_of(script, at)),
                    "use $_ inside the block",
                ));
            }
        }
    }
    if let Some(re) = FOREACH_LOOP.as_ref() {
        for caps in re.captures_iter(script) {
            let var = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if !body.contains(&format!("${}", var)) {
                let at = caps.get(0).map(|m| m.start()).unwrap_or(0);
                issues.push(issue(
                    IssueType::Logic,
                    Severity::Warning,
                    &format!("foreach body never uses ${}", var),
                    Some(line_of(script, at)),
                    &format!("reference ${} inside the loop", var),
                ));
            }
        }
    }
    issues
}

fn issue(
    kind: IssueType,
    severity: Severity,
    description: &str,
    line: Option<usize>,
    suggestion: &str,
) -> ScriptIssue {
    ScriptIssue {
        kind,
        severity,
        description: description.to_string(),
        line,
        suggestion: suggestion.to_string(),
    }
}

fn line_of(text: &str, byte: usize) -> usize {
    text[..byte.min(text.len())].matches('\n').count() + 1
}

fn matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}
