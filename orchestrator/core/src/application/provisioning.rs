// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Backing Service Handles
//!
//! Lifecycle for the per-scan broker and coordination store: start on the
//! scan network, poll health at a fixed interval up to a fixed attempt
//! ceiling, stop exactly once.
//!
//! Stopping is idempotent. A handle that was never started, failed to
//! start, or was already stopped stops successfully without touching the
//! runtime.

use crate::application::progress::{drain_pull, InstallProgress};
use crate::domain::config::{BackingServiceConfig, HealthPolicy};
use crate::domain::runtime::{
    ContainerRuntime, ImageRef, ImageResolution, NetworkHandle, RuntimeError, ServiceHandle,
    ServiceSpec,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("{service} did not become healthy after {attempts} attempts")]
    HealthCheckTimeout { service: String, attempts: u32 },
    #[error("{0} has not been started")]
    NotStarted(String),
    #[error("Start of {0} was cancelled")]
    Cancelled(String),
    #[error("{0} does not publish port {1}")]
    PortNotPublished(String, u16),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A single-container service owned by one scan.
pub struct ManagedService {
    runtime: Arc<dyn ContainerRuntime>,
    spec: ServiceSpec,
    port: u16,
    handle: Option<ServiceHandle>,
}

impl ManagedService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, spec: ServiceSpec, port: u16) -> Self {
        Self {
            runtime,
            spec,
            port,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn handle(&self) -> Option<&ServiceHandle> {
        self.handle.as_ref()
    }

    /// Ensures the image is present, then creates the container.
    pub async fn start(
        &mut self,
        progress: &dyn InstallProgress,
    ) -> Result<&ServiceHandle, ProvisioningError> {
        if self.handle.is_none() {
            match self.runtime.ensure_image(&self.spec.image).await? {
                ImageResolution::AlreadyPresent(image) => progress.already_present(&image),
                ImageResolution::Pull(image, stream) => drain_pull(&image, stream, progress).await?,
            }
            let handle = self.runtime.create_service(&self.spec).await?;
            info!("Started {}", handle);
            self.handle = Some(handle);
        }
        self.handle
            .as_ref()
            .ok_or_else(|| ProvisioningError::NotStarted(self.spec.name.clone()))
    }

    /// Polls readiness every `policy.interval()` for at most
    /// `policy.max_attempts` checks.
    pub async fn wait_healthy(&self, policy: HealthPolicy) -> Result<(), ProvisioningError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| ProvisioningError::NotStarted(self.spec.name.clone()))?;

        for attempt in 1..=policy.max_attempts {
            match self.runtime.is_healthy(handle).await {
                Ok(true) => {
                    debug!("{} healthy after {} attempt(s)", handle.name, attempt);
                    return Ok(());
                }
                Ok(false) => debug!("{} not healthy yet ({}/{})", handle.name, attempt, policy.max_attempts),
                Err(e) => warn!("Health check for {} failed: {}", handle.name, e),
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval()).await;
            }
        }

        Err(ProvisioningError::HealthCheckTimeout {
            service: handle.name.clone(),
            attempts: policy.max_attempts,
        })
    }

    /// Starts the container, waits until it is healthy and returns its host
    /// URL. Cancelling `cancel` abandons the health wait.
    pub async fn start_healthy(
        &mut self,
        health: HealthPolicy,
        progress: &dyn InstallProgress,
        cancel: &CancellationToken,
    ) -> Result<String, ProvisioningError> {
        self.start(progress).await?;
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProvisioningError::Cancelled(self.spec.name.clone())),
            healthy = self.wait_healthy(health) => healthy?,
        }
        self.host_url().await
    }

    /// Releases the container. Safe to call any number of times.
    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        match self.handle.take() {
            Some(handle) => self.runtime.stop_service(&handle).await,
            None => Ok(()),
        }
    }

    /// Address reachable from other containers on the scan network.
    pub fn network_url(&self) -> String {
        format!("redis://{}:{}", self.spec.name, self.port)
    }

    /// Address reachable from the host, through the published port.
    pub async fn host_url(&self) -> Result<String, ProvisioningError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| ProvisioningError::NotStarted(self.spec.name.clone()))?;
        let port = self
            .runtime
            .host_port(handle, self.port)
            .await?
            .ok_or_else(|| ProvisioningError::PortNotPublished(self.spec.name.clone(), self.port))?;
        Ok(format!("redis://127.0.0.1:{}", port))
    }
}

fn backing_spec(name: String, config: &BackingServiceConfig, network: &NetworkHandle) -> ServiceSpec {
    let mut spec = ServiceSpec::new(name, ImageRef::parse(&config.image), network.clone());
    spec.published_ports = vec![config.port];
    spec.health_cmd = Some(vec!["redis-cli".to_string(), "ping".to_string()]);
    spec
}

/// The message broker of one scan.
pub struct LocalBroker {
    pub service: ManagedService,
    pub health: HealthPolicy,
}

impl LocalBroker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: &NetworkHandle,
        scan_short_id: &str,
        config: &BackingServiceConfig,
    ) -> Self {
        let spec = backing_spec(format!("scanweave-{}-broker", scan_short_id), config, network);
        Self {
            service: ManagedService::new(runtime, spec, config.port),
            health: config.health,
        }
    }

    /// Starts the container and blocks until it is healthy. Returns the
    /// host URL.
    pub async fn start(
        &mut self,
        progress: &dyn InstallProgress,
        cancel: &CancellationToken,
    ) -> Result<String, ProvisioningError> {
        self.service.start_healthy(self.health, progress, cancel).await
    }

    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.service.stop().await
    }
}

/// The key-value coordination store of one scan.
pub struct LocalStore {
    pub service: ManagedService,
    pub health: HealthPolicy,
}

impl LocalStore {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: &NetworkHandle,
        scan_short_id: &str,
        config: &BackingServiceConfig,
    ) -> Self {
        let spec = backing_spec(format!("scanweave-{}-store", scan_short_id), config, network);
        Self {
            service: ManagedService::new(runtime, spec, config.port),
            health: config.health,
        }
    }

    pub async fn start(
        &mut self,
        progress: &dyn InstallProgress,
        cancel: &CancellationToken,
    ) -> Result<String, ProvisioningError> {
        self.service.start_healthy(self.health, progress, cancel).await
    }

    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.service.stop().await
    }
}
