// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Deployment Manager
//!
//! Turns agent group entries into running containers in two steps:
//!
//! 1. [`AgentDeploymentManager::prepare`] looks the key up in the registry
//!    and makes the agent image available locally. Every check that can
//!    reject the agent runs here, before any container exists.
//! 2. [`AgentDeploymentManager::deploy`] starts one replica of a prepared
//!    agent on the scan network.
//!
//! Images are cached locally as `{image_name}:v{version}`, where the image
//! name is the lower-cased key with `/` replaced by `_`. A cached image is
//! never pulled again. Otherwise `{docker_location}:v{version}` is pulled,
//! retrying transient failures, and tagged with the local name.

use crate::application::progress::{drain_pull, InstallProgress};
use crate::domain::agent::{AgentDefinition, AgentGroupEntry, AgentKey, ArgValue};
use crate::domain::registry::{AgentRegistry, RegistryError};
use crate::domain::runtime::{
    ContainerRuntime, ImageRef, NetworkHandle, RuntimeError, ServiceHandle, ServiceSpec,
};
use crate::domain::scan::ScanId;
use crate::domain::settings::{AgentSettings, AGENT_SETTINGS_ENV};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SCAN_LABEL: &str = "scanweave.scan";
pub const AGENT_LABEL: &str = "scanweave.agent";

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Agent {key} is not installable: {reason}")]
    AgentNotInstallable { key: AgentKey, reason: String },
    #[error("Invalid replica count for '{key}': {replicas} is not in the range x>=0")]
    InvalidReplicas { key: AgentKey, replicas: i64 },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("Failed to encode settings for {0}: {1}")]
    Settings(AgentKey, serde_json::Error),
}

impl DeploymentError {
    /// Agent, version or image does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DeploymentError::AgentNotInstallable { .. }
                | DeploymentError::Registry(RegistryError::NotFound(_))
                | DeploymentError::Runtime(RuntimeError::ImageNotFound(_))
        )
    }
}

/// Bounded retry for transient pull failures.
#[derive(Debug, Clone, Copy)]
pub struct PullPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for PullPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Outcome of [`AgentDeploymentManager::install`].
#[derive(Debug, Clone)]
pub struct InstalledImage {
    pub key: AgentKey,
    pub version: String,
    pub image: ImageRef,
    pub already_present: bool,
    pub definition: Option<AgentDefinition>,
}

/// An agent group entry whose image is available and whose replica count
/// has been checked.
#[derive(Debug, Clone)]
pub struct PreparedAgent {
    pub definition: AgentDefinition,
    pub image: ImageRef,
    pub args: Vec<ArgValue>,
    pub replicas: u32,
    /// Queue shared by every replica of this entry.
    pub queue: String,
}

impl PreparedAgent {
    pub fn key(&self) -> AgentKey {
        self.definition.key()
    }
}

/// Scan-wide values every agent container receives.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub scan_id: ScanId,
    pub network: NetworkHandle,
    pub bus_url: String,
    pub store_url: String,
    pub tracing_collector_url: Option<String>,
}

/// Container name of one replica: `scan-{scan}-{queue}-{replica}`.
///
/// The queue is unique per group entry, so two entries never share a name.
/// Characters Docker rejects in container names become `_`, and the `#`
/// entry separator becomes `-`.
pub fn service_name(scan_id: &ScanId, queue: &str, replica: u32) -> String {
    let queue: String = queue
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            '#' => '-',
            _ => '_',
        })
        .collect();
    format!("scan-{}-{}-{}", scan_id.short(), queue, replica)
}

/// Local cache reference for `key` at `version`.
pub fn local_image(key: &AgentKey, version: &str) -> ImageRef {
    ImageRef::new(key.image_name(), Some(format!("v{}", version)))
}

pub struct AgentDeploymentManager {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn AgentRegistry>,
    pull_policy: PullPolicy,
}

impl AgentDeploymentManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<dyn AgentRegistry>) -> Self {
        Self {
            runtime,
            registry,
            pull_policy: PullPolicy::default(),
        }
    }

    pub fn with_pull_policy(mut self, pull_policy: PullPolicy) -> Self {
        self.pull_policy = pull_policy;
        self
    }

    /// Makes the image for `key` available locally.
    pub async fn install(
        &self,
        key: &AgentKey,
        version: Option<&str>,
        progress: &dyn InstallProgress,
    ) -> Result<InstalledImage, DeploymentError> {
        let record = self.registry.lookup(key).await?;

        let location = record.docker_location.clone().ok_or_else(|| {
            DeploymentError::AgentNotInstallable {
                key: key.clone(),
                reason: "image location is not yet available".to_string(),
            }
        })?;
        let version = record
            .resolve_version(version)
            .map_err(|e| DeploymentError::AgentNotInstallable {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let local = local_image(key, &version);
        if self.runtime.image_exists(&local).await? {
            progress.already_present(&local);
            return Ok(InstalledImage {
                key: key.clone(),
                version,
                image: local,
                already_present: true,
                definition: record.definition,
            });
        }

        let remote = ImageRef::new(location, Some(format!("v{}", version)));
        self.pull_with_retry(&remote, progress).await?;
        self.runtime.tag_image(&remote, &local).await?;
        info!("Installed {} as {}", remote, local);

        Ok(InstalledImage {
            key: key.clone(),
            version,
            image: local,
            already_present: false,
            definition: record.definition,
        })
    }

    async fn pull_with_retry(
        &self,
        image: &ImageRef,
        progress: &dyn InstallProgress,
    ) -> Result<(), RuntimeError> {
        let attempts = self.pull_policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let stream = self.runtime.pull_image(image);
            match drain_pull(image, stream, progress).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "Pull of {} failed (attempt {}/{}): {}",
                        image, attempt, attempts, e
                    );
                    tokio::time::sleep(self.pull_policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Validates the entry and installs its image. Creates no containers.
    pub async fn prepare(
        &self,
        entry: &AgentGroupEntry,
        queue: String,
        progress: &dyn InstallProgress,
    ) -> Result<PreparedAgent, DeploymentError> {
        let replicas = u32::try_from(entry.replicas).map_err(|_| DeploymentError::InvalidReplicas {
            key: entry.key.clone(),
            replicas: entry.replicas,
        })?;

        let installed = self
            .install(&entry.key, entry.version.as_deref(), progress)
            .await?;
        let mut definition =
            installed
                .definition
                .ok_or_else(|| DeploymentError::AgentNotInstallable {
                    key: entry.key.clone(),
                    reason: "registry record carries no agent definition".to_string(),
                })?;
        definition.key = Some(entry.key.clone());
        definition.version = Some(installed.version);

        Ok(PreparedAgent {
            definition,
            image: installed.image,
            args: entry.args.clone(),
            replicas,
            queue,
        })
    }

    /// Starts replica `replica` of `agent`.
    pub async fn deploy(
        &self,
        agent: &PreparedAgent,
        target: &DeployTarget,
        replica: u32,
    ) -> Result<ServiceHandle, DeploymentError> {
        let key = agent.key();
        let spec = self.service_spec(agent, target, replica)?;
        debug!("Creating {} from {}", spec.name, spec.image);
        let handle = self.runtime.create_service(&spec).await?;
        info!(agent = %key, service = %handle.name, "Deployed replica {}", replica);
        Ok(handle)
    }

    fn service_spec(
        &self,
        agent: &PreparedAgent,
        target: &DeployTarget,
        replica: u32,
    ) -> Result<ServiceSpec, DeploymentError> {
        let key = agent.key();
        let settings = AgentSettings {
            scan_id: target.scan_id.to_string(),
            definition: agent.definition.clone(),
            args: agent.args.clone(),
            queue: agent.queue.clone(),
            bus_url: target.bus_url.clone(),
            store_url: target.store_url.clone(),
            tracing_collector_url: target.tracing_collector_url.clone(),
            replica,
        };
        let encoded = settings
            .to_env_value()
            .map_err(|e| DeploymentError::Settings(key.clone(), e))?;

        let mut spec = ServiceSpec::new(
            service_name(&target.scan_id, &agent.queue, replica),
            agent.image.clone(),
            target.network.clone(),
        );
        spec.env.insert(AGENT_SETTINGS_ENV.to_string(), encoded);
        spec.constraints = agent.definition.constraints.clone();
        spec.mounts = agent.definition.mounts.clone();
        spec.mem_limit = agent.definition.mem_limit;
        spec.restart_policy = agent.definition.restart_policy;
        spec.labels
            .insert(SCAN_LABEL.to_string(), target.scan_id.to_string());
        spec.labels.insert(AGENT_LABEL.to_string(), key.to_string());
        Ok(spec)
    }
}
