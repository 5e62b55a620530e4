//! Command handlers for CLI operations
//!
//! - step: run one turn and print the chosen step
//! - plan: print the plan the helper request produces
//! - validate-script: check a script file
//! - warm-up: load the model
//! - doctor: check configuration and the backend

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::mpsc;

use sdk::{EngineError, Step};

use crate::agent::{AgentCore, TurnEvent};
use crate::config::Config;
use crate::guardrails::{Language, ScriptValidator};
use crate::llm::ollama::OllamaBackend;
use crate::llm::ModelBackend;
use crate::planning::PlanGenerator;
use crate::session::{PlanStatus, SessionRegistry};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn backend(config: &Config) -> Arc<dyn ModelBackend> {
    Arc::new(OllamaBackend::from_config(&config.llm))
}

/// Run one turn for `task` and print the resulting step.
///
/// Streamed reasoning and status messages go to stderr so stdout only
/// carries the step.
pub async fn handle_step(
    task: String,
    session: Option<String>,
    stream: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let core = AgentCore::new(config, backend(config), SessionRegistry::new());

    let step = if stream && config.agent.stream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            let mut reasoning = false;
            while let Some(event) = rx.recv().await {
                match event {
                    TurnEvent::Reasoning(text) => {
                        reasoning = true;
                        eprint!("{}", text);
                    }
                    TurnEvent::Status(message) => eprintln!("[{}]", message),
                    TurnEvent::Step(_) => {
                        if reasoning {
                            eprintln!();
                        }
                    }
                }
            }
        });
        let step = core.stream_step(session.as_deref(), &task, tx).await;
        printer.await.ok();
        step
    } else {
        core.next_step(session.as_deref(), &task).await
    };

    print_step(&step, format)
}

fn print_step(step: &Step, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(step)?);
        }
        OutputFormat::Text => {
            println!("tool:   {}", step.tool);
            println!("params: {}", serde_json::Value::Object(step.params.clone()));
            if !step.note.is_empty() {
                println!("note:   {}", step.note);
            }
        }
    }
    Ok(())
}

/// Generate and print a plan for `task`.
pub async fn handle_plan(task: String, config: &Config, format: OutputFormat) -> Result<()> {
    let planner = PlanGenerator::new(backend(config), &config.llm);
    let plan = planner.generate(&task).await.map_err(EngineError::from)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => {
            for item in &plan.items {
                let mark = if item.status == PlanStatus::InProgress { ">" } else { " " };
                match &item.tool_hint {
                    Some(hint) => println!("{} {}. {} ({})", mark, item.index, item.description, hint),
                    None => println!("{} {}. {}", mark, item.index, item.description),
                }
            }
        }
    }
    Ok(())
}

/// Validate a script file and print the report.
pub fn handle_validate_script(
    file: &Path,
    language: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let script = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script {:?}", file))?;
    let language = match language {
        Some(name) => Language::parse(&name)
            .ok_or_else(|| anyhow::anyhow!("Unknown script language '{}'", name))?,
        None => Language::detect(&script),
    };
    let report = ScriptValidator::new().validate(&script, language);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!(
                "{:?} script: {}",
                language,
                if report.valid { "valid" } else { "invalid" }
            );
            for issue in &report.issues {
                let line = issue.line.map(|l| format!("line {}: ", l)).unwrap_or_default();
                println!("  {:?} {}{} ({})", issue.severity, line, issue.description, issue.suggestion);
            }
            if let Some(fixed) = &report.fixed_script {
                println!("\nFixed script:\n{}", fixed);
            }
        }
    }
    Ok(())
}

/// Load the configured model into memory.
pub async fn handle_warm_up(config: &Config) -> Result<()> {
    let backend = backend(config);
    backend.warm_up().await.map_err(EngineError::from)?;
    println!("{} is loaded", backend.model());
    Ok(())
}

/// Check configuration and backend reachability.
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let backend = backend(config);
    let residency = backend.residency().await;

    match format {
        OutputFormat::Json => {
            let report = json!({
                "config": "ok",
                "workspace": config.core.workspace,
                "backend": config.llm.base_url,
                "model": config.llm.model,
                "reachable": residency.is_ok(),
                "resident": residency.as_ref().map(|r| r.resident).unwrap_or(false),
                "error": residency.as_ref().err().map(|e| e.to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Config:    ok");
            println!("Workspace: {}", config.core.workspace.display());
            println!("Backend:   {}", config.llm.base_url);
            match &residency {
                Ok(r) if r.resident => println!("Model:     {} (loaded)", config.llm.model),
                Ok(_) => println!("Model:     {} (not loaded)", config.llm.model),
                Err(e) => println!("Model:     {} (backend unreachable: {})", config.llm.model, e),
            }
        }
    }
    Ok(())
}
