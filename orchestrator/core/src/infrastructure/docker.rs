// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Docker implementation of the container runtime adapter.
//
// Each scan gets a user-defined bridge network; services are plain
// containers attached to it by name, so the broker and store are reachable
// from agents at `{container_name}:{port}`.
//
// Placement constraints have no meaning for a single local daemon. They are
// recorded verbatim as the `scanweave.constraints` label.

use crate::domain::agent::RestartPolicy;
use crate::domain::runtime::{
    ContainerRuntime, ImageRef, NetworkHandle, PullProgress, PullStream, RuntimeError,
    ServiceHandle, ServiceSpec,
};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateBody, HealthConfig, HealthStatusEnum, HostConfig, NetworkCreateRequest,
    PortBinding, ProgressDetail, RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    RemoveContainerOptionsBuilder, StartContainerOptions, TagImageOptionsBuilder,
};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const MANAGED_LABEL: &str = "scanweave.managed";
pub const CONSTRAINTS_LABEL: &str = "scanweave.constraints";

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(socket_path: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = if let Some(path) = socket_path {
            Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Check that the socket exists and is readable by the current user.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Cannot connect to Docker daemon: {}\n\nVerify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }
}

fn status_code(error: &DockerError) -> Option<u16> {
    match error {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn is_not_found_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("not found")
        || message.contains("manifest unknown")
        || message.contains("repository does not exist")
}

/// Maps a pull error to the permanent/transient split.
fn classify_pull_error(image: &str, error: DockerError) -> RuntimeError {
    if status_code(&error) == Some(404) || is_not_found_message(&error.to_string()) {
        return RuntimeError::ImageNotFound(image.to_string());
    }
    RuntimeError::PullFailed {
        image: image.to_string(),
        reason: error.to_string(),
    }
}

fn restart_policy(policy: RestartPolicy) -> DockerRestartPolicy {
    let name = match policy {
        RestartPolicy::Any => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::None => RestartPolicyNameEnum::NO,
    };
    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}

/// `current/total` bytes of a layer, when the daemon reports them.
fn progress_text(detail: Option<&ProgressDetail>) -> Option<String> {
    match detail? {
        ProgressDetail {
            current: Some(current),
            total: Some(total),
        } if *total > 0 => Some(format!("{}/{}", current, total)),
        _ => None,
    }
}

fn container_labels(spec: &ServiceSpec) -> HashMap<String, String> {
    let mut labels = spec.labels.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    if !spec.constraints.is_empty() {
        labels.insert(CONSTRAINTS_LABEL.to_string(), spec.constraints.join(","));
    }
    labels
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str) -> Result<NetworkHandle, RuntimeError> {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            labels: Some(labels),
            ..Default::default()
        };

        self.docker
            .create_network(request)
            .await
            .map_err(|e| RuntimeError::NetworkFailed(name.to_string(), e.to_string()))?;

        info!("Created network: {}", name);
        Ok(NetworkHandle::new(name))
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<(), RuntimeError> {
        match self.docker.remove_network(network.as_str()).await {
            Ok(()) => {
                info!("Removed network: {}", network);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => {
                debug!("Network {} already removed", network);
                Ok(())
            }
            Err(e) => Err(RuntimeError::StopFailed(network.to_string(), e.to_string())),
        }
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(&image.to_string()).await {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(RuntimeError::Unavailable(e.to_string())),
        }
    }

    fn pull_image(&self, image: &ImageRef) -> PullStream {
        let docker = self.docker.clone();
        let reference = image.to_string();
        let tag = image.tag.clone().unwrap_or_else(|| "latest".to_string());
        let options = CreateImageOptionsBuilder::new()
            .from_image(&image.repository)
            .tag(&tag)
            .build();

        async_stream::stream! {
            info!("Pulling image: {}", reference);
            let mut stream = Box::pin(docker.create_image(Some(options), None, None));
            while let Some(item) = stream.next().await {
                match item {
                    Ok(info) => {
                        if let Some(message) = info.error_detail.as_ref().and_then(|d| d.message.clone()) {
                            if is_not_found_message(&message) {
                                yield Err(RuntimeError::ImageNotFound(reference.clone()));
                            } else {
                                yield Err(RuntimeError::PullFailed {
                                    image: reference.clone(),
                                    reason: message,
                                });
                            }
                            return;
                        }
                        let progress = progress_text(info.progress_detail.as_ref());
                        yield Ok(PullProgress {
                            id: info.id,
                            status: info.status.unwrap_or_default(),
                            progress,
                        });
                    }
                    Err(e) => {
                        yield Err(classify_pull_error(&reference, e));
                        return;
                    }
                }
            }
            info!("Successfully pulled image: {}", reference);
        }
        .boxed()
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<(), RuntimeError> {
        let tag = target.tag.clone().unwrap_or_else(|| "latest".to_string());
        let options = TagImageOptionsBuilder::new()
            .repo(&target.repository)
            .tag(&tag)
            .build();
        self.docker
            .tag_image(&source.to_string(), Some(options))
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => RuntimeError::ImageNotFound(source.to_string()),
                _ => RuntimeError::Unavailable(e.to_string()),
            })?;
        info!("Tagged image {} as {}", source, target);
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceHandle, RuntimeError> {
        let mut exposed_ports = Vec::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.published_ports {
            let key = format!("{}/tcp", port);
            exposed_ports.push(key.clone());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(String::new()),
                }]),
            );
        }

        let host_config = HostConfig {
            network_mode: Some(spec.network.as_str().to_string()),
            restart_policy: Some(restart_policy(spec.restart_policy)),
            memory: spec.mem_limit.map(|bytes| bytes as i64),
            binds: if spec.mounts.is_empty() {
                None
            } else {
                Some(spec.mounts.clone())
            },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let healthcheck = spec.health_cmd.as_ref().map(|cmd| {
            let mut test = vec!["CMD".to_string()];
            test.extend(cmd.iter().cloned());
            HealthConfig {
                test: Some(test),
                interval: Some(1_000_000_000),
                timeout: Some(3_000_000_000),
                retries: Some(3),
                ..Default::default()
            }
        });

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let options = CreateContainerOptionsBuilder::new().name(&spec.name).build();

        let config = ContainerCreateBody {
            image: Some(spec.image.to_string()),
            env: Some(env),
            labels: Some(container_labels(spec)),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            healthcheck,
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => RuntimeError::ImageNotFound(spec.image.to_string()),
                _ => RuntimeError::ServiceFailed(spec.name.clone(), e.to_string()),
            })?;

        let handle = ServiceHandle::new(created.id, spec.name.clone());

        if let Err(e) = self
            .docker
            .start_container(&handle.id, None::<StartContainerOptions>)
            .await
        {
            // A created but unstarted container would otherwise leak.
            let _ = self.stop_service(&handle).await;
            return Err(RuntimeError::ServiceFailed(
                spec.name.clone(),
                format!("Failed to start container: {}", e),
            ));
        }

        info!("Started service {} from {}", handle, spec.image);
        Ok(handle)
    }

    async fn stop_service(&self, service: &ServiceHandle) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(true).build();

        match self.docker.remove_container(&service.id, Some(options)).await {
            Ok(()) => {
                info!("Removed service: {}", service);
                Ok(())
            }
            Err(e) if matches!(status_code(&e), Some(404) | Some(409)) => {
                // 409: removal already in progress
                debug!("Service {} already gone: {}", service, e);
                Ok(())
            }
            Err(e) => Err(RuntimeError::StopFailed(service.to_string(), e.to_string())),
        }
    }

    async fn is_healthy(&self, service: &ServiceHandle) -> Result<bool, RuntimeError> {
        let inspect = match self
            .docker
            .inspect_container(&service.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if status_code(&e) == Some(404) => {
                warn!("Service {} no longer exists", service);
                return Ok(false);
            }
            Err(e) => return Err(RuntimeError::Unavailable(e.to_string())),
        };

        let Some(state) = inspect.state else {
            return Ok(false);
        };

        if let Some(status) = state.health.and_then(|h| h.status) {
            return Ok(status == HealthStatusEnum::HEALTHY);
        }
        Ok(state.running.unwrap_or(false))
    }

    async fn host_port(
        &self,
        service: &ServiceHandle,
        container_port: u16,
    ) -> Result<Option<u16>, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(&service.id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        let key = format!("{}/tcp", container_port);
        let port = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key))
            .flatten()
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
            .and_then(|port| port.parse::<u16>().ok());
        Ok(port)
    }
}
