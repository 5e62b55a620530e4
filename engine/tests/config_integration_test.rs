//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be loaded from disk,
//! validated, and processed with path expansion and canonicalization.

use std::fs;

use pilot_engine::config::Config;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("work");
    let body = format!(
        r#"
[core]
workspace = "{}"
log_level = "debug"

[llm]
base_url = "http://gpu-box:11434"
model = "qwen2.5-coder:14b"
request_timeout_secs = 120
keep_alive = "1h"
temperature = 0.2
seed = 7
num_ctx = 16384

[agent]
stream = false
plan_enabled = false
status_poll_interval_ms = 250

[guardrails]
loop_window = 8
loop_threshold = 4
step_ceiling = 60
max_replans = 1
"#,
        workspace.display()
    );
    let config = Config::load_from_path(&write_config(&dir, &body)).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(workspace.is_dir(), "workspace directory is created");
    assert_eq!(config.core.workspace, workspace.canonicalize().unwrap());
    assert_eq!(config.llm.model, "qwen2.5-coder:14b");
    assert_eq!(config.llm.num_ctx, Some(16384));
    assert_eq!(config.llm.keep_alive, "1h");
    assert!(!config.agent.stream);
    assert_eq!(config.agent.status_poll_interval_ms, 250);
    assert_eq!(config.guardrails.loop_threshold, 4);
    assert_eq!(config.guardrails.max_replans, 1);
    // Untouched thresholds keep their defaults
    assert_eq!(config.guardrails.redirect_window, 3);
    assert_eq!(config.agent.reasoning_start, "<think>");
}

#[test]
fn test_create_default_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let created = Config::create_default(&path).unwrap();
    assert!(path.exists());

    let loaded = Config::load_from_path(&path).unwrap();
    assert_eq!(loaded.llm.model, created.llm.model);
    assert_eq!(loaded.guardrails, created.guardrails);
    assert_eq!(loaded.agent.reasoning_end, "</think>");
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let cases = [
        "[core]\nlog_level = \"verbose\"\n",
        "[llm]\nbase_url = \"localhost:11434\"\n",
        "[llm]\nmodel = \"  \"\n",
        "[llm]\ntemperature = 3.5\n",
        "[agent]\nstatus_poll_interval_ms = 0\n",
        "[agent]\nreasoning_start = \"\"\n",
        "[guardrails]\nloop_threshold = 1\n",
        "[guardrails]\nstep_ceiling = 0\n",
    ];
    for body in cases {
        let body = format!(
            "{}\n{}",
            body,
            if body.starts_with("[core]") {
                String::new()
            } else {
                format!("[core]\nworkspace = \"{}\"\n", dir.path().display())
            }
        );
        let result = Config::load_from_path(&write_config(&dir, &body));
        assert!(result.is_err(), "accepted invalid config:\n{}", body);
    }
}

#[test]
fn test_malformed_toml_reports_parse_error() {
    let dir = TempDir::new().unwrap();
    let err = Config::load_from_path(&write_config(&dir, "[llm\nmodel = 1")).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn test_missing_file_reports_read_error() {
    let dir = TempDir::new().unwrap();
    let err = Config::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
