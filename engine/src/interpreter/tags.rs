//! Tag Interpreter
//!
//! Splits a model reply into its reasoning block and its action payload.
//! The streaming half ([`TagInterpreter`]) sees the reply one token at a time
//! and emits reasoning text as soon as it can prove the text is not part of
//! the end marker. The offline half ([`extract_thinking`], [`extract_json`])
//! works on a complete reply and agrees with the concatenated stream output.
//!
//! Tokens may split either marker anywhere. Held-back text is measured in
//! `char`s so multi-byte reasoning text is never cut mid-character.

/// Default reasoning start marker
pub const THINK_START: &str = "<think>";

/// Default reasoning end marker
pub const THINK_END: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Start marker not seen yet
    Outside,
    /// Between the markers; reasoning text is being emitted
    Inside,
    /// End marker seen; everything else is ignored
    Finished,
}

/// Incremental reasoning extractor
#[derive(Debug, Clone)]
pub struct TagInterpreter {
    start: String,
    end: String,
    state: TagState,
    pending: String,
}

impl TagInterpreter {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            state: TagState::Outside,
            pending: String::new(),
        }
    }

    pub fn state(&self) -> TagState {
        self.state
    }

    /// Consume one token and return the reasoning text that is safe to show.
    pub fn feed(&mut self, token: &str) -> String {
        match self.state {
            TagState::Finished => String::new(),
            TagState::Outside => {
                self.pending.push_str(token);
                match self.pending.find(&self.start) {
                    Some(pos) => {
                        self.pending.drain(..pos + self.start.len());
                        self.state = TagState::Inside;
                        self.emit_inside()
                    }
                    None => {
                        // Keep only a tail that could still grow into the start marker.
                        let keep = partial_marker_len(&self.pending, &self.start);
                        let cut = self.pending.len() - keep;
                        self.pending.drain(..cut);
                        String::new()
                    }
                }
            }
            TagState::Inside => {
                self.pending.push_str(token);
                self.emit_inside()
            }
        }
    }

    /// Stream ended. Emit whatever reasoning is still held back.
    pub fn flush(&mut self) -> String {
        let out = if self.state == TagState::Inside {
            std::mem::take(&mut self.pending)
        } else {
            self.pending.clear();
            String::new()
        };
        self.state = TagState::Finished;
        out
    }

    fn emit_inside(&mut self) -> String {
        if let Some(pos) = self.pending.find(&self.end) {
            let out = self.pending[..pos].to_string();
            self.pending.clear();
            self.state = TagState::Finished;
            return out;
        }

        // Hold back enough characters to cover any partial end marker.
        let danger = self.end.chars().count() + 1;
        let pending_chars = self.pending.chars().count();
        if pending_chars > danger {
            let cut = self
                .pending
                .char_indices()
                .nth(pending_chars - danger)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let out = self.pending[..cut].to_string();
            self.pending.drain(..cut);
            return out;
        }

        let opener = self.end.chars().next();
        match opener {
            Some(c) if self.pending.contains(c) => String::new(),
            _ => std::mem::take(&mut self.pending),
        }
    }
}

impl Default for TagInterpreter {
    fn default() -> Self {
        Self::new(THINK_START, THINK_END)
    }
}

/// Length in bytes of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    marker
        .char_indices()
        .map(|(i, _)| i)
        .filter(|&i| i > 0)
        .rev()
        .find(|&len| text.ends_with(&marker[..len]))
        .unwrap_or(0)
}

/// Reasoning text between the first start marker and the first end marker after it.
///
/// Without an end marker the remainder after the start marker is returned, which
/// matches what a stream that ends early flushes. `None` when there is no start
/// marker at all.
pub fn extract_thinking_with<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let begin = text.find(start)? + start.len();
    let rest = &text[begin..];
    Some(match rest.find(end) {
        Some(stop) => &rest[..stop],
        None => rest,
    })
}

pub fn extract_thinking(text: &str) -> Option<&str> {
    extract_thinking_with(text, THINK_START, THINK_END)
}

/// The action payload: everything after the end marker.
///
/// Replies with no markers are all payload. A reply that opens reasoning and
/// never closes it yields the remainder after the start marker, so a JSON
/// object the model wrote inside an unterminated block can still be found.
pub fn extract_json_with<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    if let Some(pos) = text.find(end) {
        let after_start = text.find(start).map(|s| s + start.len()).unwrap_or(0);
        if pos >= after_start {
            return &text[pos + end.len()..];
        }
        if let Some(later) = text[after_start..].find(end) {
            return &text[after_start + later + end.len()..];
        }
    }
    match text.find(start) {
        Some(pos) => &text[pos + start.len()..],
        None => text,
    }
}

pub fn extract_json(text: &str) -> &str {
    extract_json_with(text, THINK_START, THINK_END)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(tokens: &[&str]) -> String {
        let mut interp = TagInterpreter::default();
        let mut out = String::new();
        for token in tokens {
            out.push_str(&interp.feed(token));
        }
        out.push_str(&interp.flush());
        out
    }

    #[test]
    fn test_whole_reply_in_one_token() {
        let out = run(&["<think>plan it</think>{\"tool\":\"noop\"}"]);
        assert_eq!(out, "plan it");
    }

    #[test]
    fn test_markers_split_across_tokens() {
        let out = run(&["<th", "ink>abc", " def</", "thi", "nk>{}"]);
        assert_eq!(out, "abc def");
    }

    #[test]
    fn test_preamble_is_discarded() {
        let out = run(&["Sure! ", "<", "think>", "x", "</think>"]);
        assert_eq!(out, "x");
    }

    #[test]
    fn test_emits_early_when_safe() {
        let mut interp = TagInterpreter::default();
        assert_eq!(interp.feed("<think>"), "");
        let first = interp.feed("a fairly long piece of reasoning");
        assert!(!first.is_empty());
        assert!(interp.state() == TagState::Inside);
    }

    #[test]
    fn test_short_text_without_marker_char_is_emitted() {
        let mut interp = TagInterpreter::default();
        interp.feed("<think>");
        assert_eq!(interp.feed("ok"), "ok");
    }

    #[test]
    fn test_short_text_with_marker_char_is_held() {
        let mut interp = TagInterpreter::default();
        interp.feed("<think>");
        assert_eq!(interp.feed("a<"), "");
        assert_eq!(interp.feed("/think>"), "a");
    }

    #[test]
    fn test_flush_emits_unterminated_reasoning() {
        let out = run(&["<think>never", " closed"]);
        assert_eq!(out, "never closed");
    }

    #[test]
    fn test_no_start_marker_emits_nothing() {
        assert_eq!(run(&["{\"tool\":", "\"noop\"}"]), "");
    }

    #[test]
    fn test_nothing_after_finish() {
        let mut interp = TagInterpreter::default();
        interp.feed("<think>a</think>");
        assert_eq!(interp.feed("<think>b</think>"), "");
        assert_eq!(interp.flush(), "");
    }

    #[test]
    fn test_multibyte_reasoning() {
        let out = run(&["<think>héllo wörld ✓ ", "ünïcode</thi", "nk>"]);
        assert_eq!(out, "héllo wörld ✓ ünïcode");
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("<think>a</think>{\"x\":1}"), "{\"x\":1}");
        assert_eq!(extract_json("{\"x\":1}"), "{\"x\":1}");
        assert_eq!(extract_json("<think>a {\"x\":1}"), "a {\"x\":1}");
        assert_eq!(extract_json("<think>a</think>"), "");
    }

    #[test]
    fn test_extract_thinking() {
        assert_eq!(extract_thinking("x<think>a</think>b"), Some("a"));
        assert_eq!(extract_thinking("no markers"), None);
        assert_eq!(extract_thinking("<think>open"), Some("open"));
    }

    fn chunk(text: &str, cuts: &[usize]) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
        points.push(0);
        points.push(chars.len());
        points.sort_unstable();
        points.dedup();
        points
            .windows(2)
            .map(|w| chars[w[0]..w[1]].iter().collect())
            .collect()
    }

    proptest! {
        #[test]
        fn prop_stream_matches_offline(
            pre in "[a-z <>/{}]{0,12}",
            body in "[a-zA-Z0-9 <>/é]{0,40}",
            post in "[a-z {}\":<>/]{0,20}",
            cuts in proptest::collection::vec(0usize..200, 0..12),
        ) {
            prop_assume!(!pre.contains(THINK_START));
            prop_assume!(!body.contains(THINK_END));
            let text = format!("{pre}{THINK_START}{body}{THINK_END}{post}");
            let tokens = chunk(&text, &cuts);
            let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
            let streamed = run(&refs);
            prop_assert_eq!(streamed.as_str(), extract_thinking(&text).unwrap_or_default());
        }
    }
}
