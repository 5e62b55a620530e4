//! Machine-matchable error codes
//!
//! Every terminal error the core emits starts with one of these codes
//! followed by `": "` and a human-readable detail, so the host can react
//! to a specific veto without parsing prose.

pub const HALLUCINATED_OUTPUT: &str = "HALLUCINATED_OUTPUT";
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const MODEL_ERROR: &str = "MODEL_ERROR";

pub const DISCOVERY_REQUIRED: &str = "DISCOVERY_REQUIRED";
pub const NO_AGENTS_AVAILABLE: &str = "NO_AGENTS_AVAILABLE";
pub const UNKNOWN_AGENT: &str = "UNKNOWN_AGENT";
pub const PREMATURE_COMPLETION: &str = "PREMATURE_COMPLETION";
pub const DUPLICATE_REMOTE_CALL: &str = "DUPLICATE_REMOTE_CALL";
pub const LOOP_DETECTED: &str = "LOOP_DETECTED";
pub const SINGLE_USE_TOOL: &str = "SINGLE_USE_TOOL";
pub const ALREADY_READ: &str = "ALREADY_READ";
pub const STEP_CEILING: &str = "STEP_CEILING";

/// Format `CODE: detail`
pub fn format(code: &str, detail: impl AsRef<str>) -> String {
    format!("{}: {}", code, detail.as_ref())
}

/// The code prefix of an error string, if it carries one
pub fn code_of(error: &str) -> Option<&str> {
    let (code, _) = error.split_once(": ")?;
    let is_code = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit());
    is_code.then_some(code)
}
