//! Command-line interface for unlocker
//!
//! This module provides the main CLI structure and command handling.
//! It uses clap for argument parsing; each subcommand lives in `commands/`.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

pub use commands::config::ConfigFormat;
pub use commands::run::RunArgs;
pub use output::Output;

/// Unlocker - batch-unlock password-protected Excel, ZIP and RAR files
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Unlock every supported file in a directory
    Run(RunArgs),
    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Check configuration and external tools
    Check,
    /// Show version information
    Version,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate configuration
    Validate,
    /// Show current configuration (passwords masked)
    Show {
        /// Output format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Toml)]
        format: ConfigFormat,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        setup_logging(self.verbose, self.quiet);
        let output = Output::new(self.verbose > 0, self.quiet);
        let config_path = self.config.as_deref();

        match self.command {
            Some(Commands::Run(args)) => commands::run::execute(args, config_path, &output),
            Some(Commands::Config(cmd)) => commands::config::execute(cmd, config_path, &output),
            Some(Commands::Check) => commands::check::execute(config_path, &output),
            Some(Commands::Version) => commands::version::execute(&output),
            None => {
                // Show help when no command is provided
                let mut cmd = Cli::command();
                cmd.print_help()?;
                Ok(())
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            match verbose {
                0 => tracing_subscriber::EnvFilter::new("warn"),
                1 => tracing_subscriber::EnvFilter::new("info,ignore=warn"),
                2 => tracing_subscriber::EnvFilter::new("debug,ignore=warn"),
                _ => tracing_subscriber::EnvFilter::new("trace"), // -vvv shows everything including the walker
            }
        });

    // stderr keeps stdout clean for `config show`
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
