//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the bot (`run`, the default)
//! - Validating a catalog without starting anything (`check`)

mod check;

pub use check::{describe_catalog, run_check_command};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "request-bot")]
#[command(about = "Config-driven chat bot that turns commands into HTTP requests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Command catalog (JSON)
    #[arg(short, long, global = true, env = "CONFIG", default_value = "./config.json")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the bot with the terminal channel (default if no subcommand given)
    Run,

    /// Load and validate the catalog, then list its commands
    Check,
}

impl Cli {
    /// Check if we should run the bot (default behavior or explicit `run` command).
    pub fn should_run(&self) -> bool {
        matches!(self.command, None | Some(Command::Run))
    }
}
