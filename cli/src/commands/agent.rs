// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use scanweave_core::domain::agent::AgentKey;

use crate::output::BarProgress;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Install an agent image from the registry
    Install {
        /// Agent key, e.g. agent/org/nmap
        #[arg(value_name = "KEY")]
        key: String,

        /// Version to install (default: latest published)
        #[arg(short, long)]
        version: Option<String>,
    },
}

pub async fn handle_command(command: AgentCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        AgentCommand::Install { key, version } => {
            install_agent(AgentKey::new(key), version, config_path).await
        }
    }
}

async fn install_agent(
    key: AgentKey,
    version: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let orchestrator = super::build_orchestrator(config)?;

    println!("Installing agent: {}", key.to_string().bold());
    let progress = BarProgress::new();
    let installed = orchestrator
        .deployer()
        .install(&key, version.as_deref(), &progress)
        .await
        .with_context(|| format!("Failed to install {}", key))?;

    if installed.already_present {
        println!(
            "{}",
            format!("✓ {} v{} is already installed", key, installed.version).green()
        );
    } else {
        println!(
            "{}",
            format!("✓ Installed {} as {}", key, installed.image).green()
        );
    }

    Ok(())
}
