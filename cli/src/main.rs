// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # scanweave CLI
//!
//! Runs agent scans on the local Docker engine. Every scan gets its own
//! network, broker and coordination store, all removed when it ends.
//!
//! ## Commands
//!
//! - `scanweave scan run` - Run one scan and wait for it to finish
//! - `scanweave scanner --parallel N` - Run queued scan jobs, N at a time
//! - `scanweave agent install <key>` - Install an agent image
//! - `scanweave config show|validate` - Configuration management
//!
//! ## Exit codes
//!
//! `0` success, `2` agent or image not found (and usage errors), `3` invalid
//! configuration or input, `1` anything else.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use scanweave_cli::commands::{
    self, scanner::WorkerEnv, AgentCommand, ConfigCommand, ScanCommand, ScannerArgs,
};

/// scanweave - Local scan orchestration
#[derive(Parser)]
#[command(name = "scanweave")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SCANWEAVE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SCANWEAVE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "SCANWEAVE_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Compact
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan operations
    #[command(name = "scan")]
    Scan {
        #[command(subcommand)]
        command: ScanCommand,
    },

    /// Run queued scan jobs in parallel worker processes
    #[command(name = "scanner")]
    Scanner(ScannerArgs),

    /// Agent management
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, cli.log_format) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(3);
    }

    let result = match cli.command {
        Some(Commands::Scan { command }) => {
            commands::scan::handle_command(command, cli.config).await
        }
        Some(Commands::Scanner(args)) => {
            let env = WorkerEnv {
                config_path: cli.config.clone(),
                log_level: cli.log_level.clone(),
                log_format: cli.log_format.as_str().to_string(),
            };
            commands::scanner::handle_command(args, cli.config, env).await
        }
        Some(Commands::Agent { command }) => {
            commands::agent::handle_command(command, cli.config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(commands::exit_code(&e));
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
