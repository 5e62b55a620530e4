//! CLI interface for Pilot
//!
//! Command-line surface over the control core using clap's derive API.
//! The CLI never executes tools; it prints the step the core chose.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pilot agent control core
///
/// Turns a task into the next validated tool call using a local model.
#[derive(Parser, Debug)]
#[command(name = "pilot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Produce the next step for a task
    Step {
        /// The task to work on
        task: String,

        /// Session to run the turn in
        #[arg(short, long)]
        session: Option<String>,

        /// Wait for the full reply instead of streaming reasoning
        #[arg(long)]
        no_stream: bool,
    },

    /// Generate a plan for a task
    Plan {
        /// The task to plan
        task: String,
    },

    /// Check a script without running it
    ValidateScript {
        /// Script file to check
        file: PathBuf,

        /// Script language (bash or powershell), detected when omitted
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Load the model into memory ahead of the first turn
    WarmUp,

    /// Validate configuration and check the model backend
    Doctor,
}
