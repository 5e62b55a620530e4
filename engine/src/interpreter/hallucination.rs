//! Narrative hallucination detection
//!
//! Models sometimes answer "the next action" by narrating what the action
//! would have produced: a results header, a progress bar, a claim that a
//! command already ran. None of that came from a tool, so the payload is
//! rejected before any JSON is decoded.
//!
//! Only the payload is scanned. Reasoning text is free to talk about results.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::patterns::PatternTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeKind {
    /// `## Results`, `Output:` and similar headers
    FabricatedResultHeader,
    /// Progress bars, percentage status lines, check-mark lists
    FakeProgress,
    /// "I have executed ..." with no action object
    ExecutionClaim,
    /// A fenced code block that is not just a wrapped action object
    CodeFence,
    /// Lower-confidence result phrasing with no action object
    ResultNarrative,
}

impl NarrativeKind {
    pub fn description(self) -> &'static str {
        match self {
            NarrativeKind::FabricatedResultHeader => "fabricated result header",
            NarrativeKind::FakeProgress => "fake progress indicator",
            NarrativeKind::ExecutionClaim => "claim of execution without a tool call",
            NarrativeKind::CodeFence => "embedded code block",
            NarrativeKind::ResultNarrative => "narrated results without a tool call",
        }
    }
}

/// A detected narrative pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeMatch {
    pub kind: NarrativeKind,
    pub matched: String,
    pub position: usize,
}

static STRONG: Lazy<PatternTable<NarrativeKind>> = Lazy::new(|| {
    PatternTable::compile(&[
        (
            r"(?mi)^\s*#{1,4}\s*(execution\s+)?(results?|output|command output)\s*:?\s*$",
            NarrativeKind::FabricatedResultHeader,
        ),
        (
            r"(?mi)^\s*\**(results?|output|execution result)\**\s*:\s*\S",
            NarrativeKind::FabricatedResultHeader,
        ),
        (r"(?m)^\s*\[[=#>\.\s]{3,}\]", NarrativeKind::FakeProgress),
        (
            r"(?mi)^\s*(progress|status)\s*:\s*\d{1,3}\s*%",
            NarrativeKind::FakeProgress,
        ),
        (r"(?m)^\s*(✓|✔|✅|☑)\s*\S", NarrativeKind::FakeProgress),
    ])
});

static CLAIMS: Lazy<PatternTable<NarrativeKind>> = Lazy::new(|| {
    PatternTable::compile(&[
        (
            r"(?i)\b(i|we)\s+(have\s+|'ve\s+)?(successfully\s+)?(executed|ran|created|wrote|written|deleted|modified|installed|updated)\b",
            NarrativeKind::ExecutionClaim,
        ),
        (
            r"(?i)\b(executing|running)\s+(the\s+)?(command|script)\s*\.\.\.",
            NarrativeKind::ExecutionClaim,
        ),
    ])
});

static WEAK: Lazy<PatternTable<NarrativeKind>> = Lazy::new(|| {
    PatternTable::compile(&[
        (
            r"(?i)\bsuccessfully\s+(executed|completed|created|ran|finished)\b",
            NarrativeKind::ResultNarrative,
        ),
        (r"(?i)\bthe output (shows|is|was)\b", NarrativeKind::ResultNarrative),
        (
            r"(?i)\bhere (are|is) the (results?|output)\b",
            NarrativeKind::ResultNarrative,
        ),
        (
            r"(?i)\bcommand (completed|returned|executed|finished)\b",
            NarrativeKind::ResultNarrative,
        ),
        (r"(?i)\breturned the following\b", NarrativeKind::ResultNarrative),
    ])
});

static ACTION_OBJECT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"\{\s*"(tool|action|name|function|tool_name)"\s*:"#).ok());

static FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)(```|\z)").ok());

/// True if the payload contains something shaped like an action object.
pub fn has_action_object(payload: &str) -> bool {
    ACTION_OBJECT
        .as_ref()
        .map(|re| re.is_match(payload))
        .unwrap_or(false)
}

/// Scan an action payload for narrative output.
///
/// Execution claims and the weak phrase bag only count when the payload holds
/// no action-shaped object at all.
pub fn detect(payload: &str) -> Option<NarrativeMatch> {
    if let Some(found) = first(&STRONG, payload) {
        return Some(found);
    }

    let has_action = has_action_object(payload);
    if !has_action {
        if let Some(found) = first(&CLAIMS, payload) {
            return Some(found);
        }
    }

    if let Some(found) = non_action_fence(payload) {
        return Some(found);
    }

    if !has_action {
        return first(&WEAK, payload);
    }
    None
}

fn first(table: &PatternTable<NarrativeKind>, text: &str) -> Option<NarrativeMatch> {
    table.first_match(text).map(|(kind, m)| NarrativeMatch {
        kind,
        matched: m.as_str().trim().to_string(),
        position: m.start(),
    })
}

/// A fence counts only if its body is not itself the action object.
fn non_action_fence(payload: &str) -> Option<NarrativeMatch> {
    let re = FENCE.as_ref()?;
    re.captures_iter(payload).find_map(|caps| {
        let whole = caps.get(0)?;
        let body = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if body.starts_with('{') {
            None
        } else {
            Some(NarrativeMatch {
                kind: NarrativeKind::CodeFence,
                matched: whole.as_str().lines().next().unwrap_or("```").to_string(),
                position: whole.start(),
            })
        }
    })
}
