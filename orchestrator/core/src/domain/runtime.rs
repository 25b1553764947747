// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Runtime Adapter
//!
//! [`ContainerRuntime`] is the only seam between the orchestration core and a
//! container platform. Networks, images and services are addressed through
//! opaque handles; the Docker implementation lives in
//! `infrastructure::docker`, and tests substitute an in-process fake.

use crate::domain::agent::RestartPolicy;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkHandle(pub String);

impl NetworkHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a running container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub id: String,
    pub name: String,
}

impl ServiceHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Fully qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: Option<String>,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            repository: repository.into(),
            tag,
        }
    }

    /// Parses `repo[:tag]` or `repo@digest`.
    pub fn parse(reference: &str) -> Self {
        let (repository, tag) = parse_repository_tag(reference);
        Self::new(repository, tag.map(str::to_string))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) if tag.starts_with("sha256:") => write!(f, "{}@{}", self.repository, tag),
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => f.write_str(&self.repository),
        }
    }
}

/// Splits an image reference into repository and tag.
///
/// A `@digest` marker wins over a `:tag` marker. A `:` only starts a tag
/// when nothing after it contains `/`, so `registry:5000/repo` keeps its
/// port.
pub fn parse_repository_tag(reference: &str) -> (&str, Option<&str>) {
    if let Some((repository, digest)) = reference.rsplit_once('@') {
        return (repository, Some(digest));
    }
    if let Some((repository, tag)) = reference.rsplit_once(':') {
        if !tag.contains('/') {
            return (repository, Some(tag));
        }
    }
    (reference, None)
}

/// One record from an image pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: String,
    pub progress: Option<String>,
}

/// Finite, single-use sequence of pull records.
pub type PullStream = BoxStream<'static, Result<PullProgress, RuntimeError>>;

/// Result of [`ContainerRuntime::ensure_image`].
pub enum ImageResolution {
    AlreadyPresent(ImageRef),
    Pull(ImageRef, PullStream),
}

impl fmt::Debug for ImageResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageResolution::AlreadyPresent(image) => {
                f.debug_tuple("AlreadyPresent").field(image).finish()
            }
            ImageResolution::Pull(image, _) => f.debug_tuple("Pull").field(image).finish(),
        }
    }
}

/// Everything needed to start one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: ImageRef,
    pub env: HashMap<String, String>,
    pub network: NetworkHandle,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<String>,
    /// Container ports published on the host loopback at ephemeral ports.
    #[serde(default)]
    pub published_ports: Vec<u16>,
    pub mem_limit: Option<u64>,
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Check run inside the container; readiness falls back to "running"
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_cmd: Option<Vec<String>>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: ImageRef, network: NetworkHandle) -> Self {
        Self {
            name: name.into(),
            image,
            env: HashMap::new(),
            network,
            constraints: Vec::new(),
            mounts: Vec::new(),
            published_ports: Vec::new(),
            mem_limit: None,
            restart_policy: RestartPolicy::Any,
            labels: HashMap::new(),
            health_cmd: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Failed to pull image {image}: {reason}")]
    PullFailed { image: String, reason: String },
    #[error("Failed to create network {0}: {1}")]
    NetworkFailed(String, String),
    #[error("Failed to create service {0}: {1}")]
    ServiceFailed(String, String),
    #[error("Failed to stop {0}: {1}")]
    StopFailed(String, String),
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
}

impl RuntimeError {
    /// Transient failures that may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::PullFailed { .. } | RuntimeError::Unavailable(_)
        )
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_network(&self, name: &str) -> Result<NetworkHandle, RuntimeError>;

    /// Removing an absent network succeeds.
    async fn remove_network(&self, network: &NetworkHandle) -> Result<(), RuntimeError>;

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, RuntimeError>;

    /// Starts pulling `image`. Progress and the terminal error, if any,
    /// arrive through the returned stream.
    fn pull_image(&self, image: &ImageRef) -> PullStream;

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<(), RuntimeError>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceHandle, RuntimeError>;

    /// Stopping an absent or already-stopped service succeeds.
    async fn stop_service(&self, service: &ServiceHandle) -> Result<(), RuntimeError>;

    async fn is_healthy(&self, service: &ServiceHandle) -> Result<bool, RuntimeError>;

    /// Host port bound to `container_port`, if it was published.
    async fn host_port(
        &self,
        service: &ServiceHandle,
        container_port: u16,
    ) -> Result<Option<u16>, RuntimeError>;

    /// Returns the local image when present, otherwise a pull stream for it.
    async fn ensure_image(&self, image: &ImageRef) -> Result<ImageResolution, RuntimeError> {
        if self.image_exists(image).await? {
            return Ok(ImageResolution::AlreadyPresent(image.clone()));
        }
        Ok(ImageResolution::Pull(image.clone(), self.pull_image(image)))
    }
}
