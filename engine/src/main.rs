// Pilot agent control core
// Main entry point for the pilot binary

use clap::Parser;
use pilot_engine::cli::{Cli, Command};
use pilot_engine::config::Config;
use pilot_engine::handlers::{
    handle_doctor, handle_plan, handle_step, handle_validate_script, handle_warm_up, OutputFormat,
};
use pilot_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // `--log` wins over the config file; `RUST_LOG` wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::info!(
        "Pilot v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH")
    );

    match cli.command {
        Command::Step {
            task,
            session,
            no_stream,
        } => handle_step(task, session, !no_stream, &config, format).await,

        Command::Plan { task } => handle_plan(task, &config, format).await,

        Command::ValidateScript { file, language } => {
            handle_validate_script(&file, language, format)
        }

        Command::WarmUp => handle_warm_up(&config).await,

        Command::Doctor => handle_doctor(&config, format).await,
    }
}
