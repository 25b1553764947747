// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the scanweave CLI

pub mod agent;
pub mod config;
pub mod scan;
pub mod scanner;

pub use self::agent::AgentCommand;
pub use self::config::ConfigCommand;
pub use self::scan::ScanCommand;
pub use self::scanner::ScannerArgs;

use anyhow::{Context, Result};
use scanweave_core::application::{DeploymentError, ScanError, ScanOrchestrator};
use scanweave_core::domain::config::OrchestratorConfig;
use scanweave_core::domain::registry::RegistryError;
use scanweave_core::domain::runtime::RuntimeError;
use scanweave_core::infrastructure::registry::registry_from_settings;
use scanweave_core::infrastructure::{DockerRuntime, RedisConnector};
use std::path::PathBuf;
use std::sync::Arc;

/// Loads and validates configuration. Failures map to exit code 3.
pub fn load_config(config_path: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let config = OrchestratorConfig::load_or_default(config_path)
        .map_err(InvalidInput)
        .context("Failed to load configuration")?;
    config
        .validate()
        .map_err(InvalidInput)
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Orchestrator backed by the local Docker engine and redis endpoints.
pub fn build_orchestrator(config: OrchestratorConfig) -> Result<ScanOrchestrator> {
    let runtime = DockerRuntime::new(config.spec.runtime.docker_socket.as_deref())
        .context("Failed to connect to the Docker engine")?;
    let registry = registry_from_settings(&config.spec.registry)
        .map_err(|e| InvalidInput(e.into()))
        .context("Failed to load the agent registry")?;
    Ok(ScanOrchestrator::new(
        config,
        Arc::new(runtime),
        registry,
        Arc::new(RedisConnector),
    ))
}

/// Marks invalid configuration or user input in an error chain.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct InvalidInput(pub anyhow::Error);

/// Process exit code for a command failure: the not-found family exits 2,
/// invalid configuration or input 3, everything else 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(scan) = cause.downcast_ref::<ScanError>() {
            return scan.exit_code();
        }
        if let Some(deployment) = cause.downcast_ref::<DeploymentError>() {
            return match deployment {
                e if e.is_not_found() => 2,
                DeploymentError::InvalidReplicas { .. } => 3,
                _ => 1,
            };
        }
        if matches!(
            cause.downcast_ref::<RegistryError>(),
            Some(RegistryError::NotFound(_))
        ) || matches!(
            cause.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::ImageNotFound(_))
        ) {
            return 2;
        }
        if cause.downcast_ref::<InvalidInput>().is_some() {
            return 3;
        }
    }
    1
}
