// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use scanweave_core::domain::config::OrchestratorConfig;

use super::InvalidInput;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override.clone())
        .map_err(InvalidInput)
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SCANWEAVE_CONFIG_PATH: {}",
            std::env::var("SCANWEAVE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./scanweave-config.yaml");
        println!("  4. ~/.scanweave/config.yaml");
        println!("  5. /etc/scanweave/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Runtime:".bold());
    println!(
        "  Docker socket: {}",
        spec.runtime.docker_socket.as_deref().unwrap_or("(default)")
    );
    println!("  Network prefix: {}", spec.runtime.network_prefix);
    println!("  Pull attempts: {}", spec.runtime.pull_attempts);
    println!();

    println!("{}", "Backing services:".bold());
    for (name, service) in [("broker", &spec.broker), ("store", &spec.store)] {
        println!(
            "  {} {} port {} (health: {} x {}ms)",
            name.bold(),
            service.image,
            service.port,
            service.health.max_attempts,
            service.health.interval_ms
        );
    }
    println!();

    println!("{}", "Completion:".bold());
    match spec.completion.quiescence_secs {
        Some(secs) => println!("  Quiescence window: {}s", secs),
        None => println!("  Quiescence window: {}", "(disabled)".dimmed()),
    }
    println!("  Completion signal: {}", spec.completion.completion_signal);
    println!(
        "  Timeout: {}s ({:?} on expiry)",
        spec.completion.timeout_secs, spec.completion.timeout_outcome
    );
    println!();

    println!("{}", "Registry:".bold());
    if let Some(url) = &spec.registry.url {
        println!("  URL: {}", url);
    }
    if let Some(dir) = &spec.registry.definitions_dir {
        println!("  Definitions: {}", dir.display());
    }
    if spec.registry.url.is_none() && spec.registry.definitions_dir.is_none() {
        println!("  {}", "(empty)".dimmed());
    }
    println!();

    println!("{}", "Tracing:".bold());
    println!(
        "  Collector: {}",
        spec.tracing.collector_url.as_deref().unwrap_or("(disabled)")
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfig::load_or_default(config_path)
        .map_err(InvalidInput)
        .context("Failed to load configuration")?;

    config
        .validate()
        .map_err(InvalidInput)
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}
