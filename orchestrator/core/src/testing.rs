// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process test doubles for the orchestration seams.
//!
//! Compiled for this crate's tests and, through the `testing` feature, for
//! downstream test suites.

use crate::application::progress::InstallProgress;
use crate::domain::bus::{BusError, MessageBus};
use crate::domain::runtime::{
    ContainerRuntime, ImageRef, NetworkHandle, PullProgress, PullStream, RuntimeError,
    ServiceHandle, ServiceSpec,
};
use crate::domain::store::{CoordinationStore, StoreError};
use crate::infrastructure::connector::EndpointConnector;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

type CreateHook = Arc<dyn Fn(&ServiceSpec) + Send + Sync>;

#[derive(Default)]
struct FakeState {
    images: HashSet<String>,
    networks: Vec<String>,
    running: BTreeMap<String, ServiceSpec>,
    created: Vec<ServiceSpec>,
    calls: Vec<String>,
    tags: Vec<(String, String)>,
    pulls: usize,
    stops: usize,
    checks: HashMap<String, usize>,
    never_healthy: HashSet<String>,
    fail_create: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_network: bool,
    missing_images: HashSet<String>,
    transient_pull_failures: HashMap<String, usize>,
    next_id: usize,
}

/// Container runtime that keeps every resource in memory and records each
/// call in order.
#[derive(Default)]
pub struct FakeContainerRuntime {
    state: Mutex<FakeState>,
    on_create: Mutex<Option<CreateHook>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `image` (`repo:tag`) as present locally.
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().images.insert(image.to_string());
        self
    }

    /// Runs after every successful `create_service`.
    pub fn on_create(&self, hook: impl Fn(&ServiceSpec) + Send + Sync + 'static) {
        *self.on_create.lock() = Some(Arc::new(hook));
    }

    pub fn fail_create(&self, service_name: &str) {
        self.state.lock().fail_create.insert(service_name.to_string());
    }

    pub fn fail_stop(&self, service_name: &str) {
        self.state.lock().fail_stop.insert(service_name.to_string());
    }

    pub fn fail_network(&self) {
        self.state.lock().fail_network = true;
    }

    pub fn set_never_healthy(&self, service_name: &str) {
        self.state.lock().never_healthy.insert(service_name.to_string());
    }

    /// Pulls of `image` fail permanently with `ImageNotFound`.
    pub fn missing_image(&self, image: &str) {
        self.state.lock().missing_images.insert(image.to_string());
    }

    /// The next `times` pulls of `image` fail with a retryable error.
    pub fn fail_pulls(&self, image: &str, times: usize) {
        self.state
            .lock()
            .transient_pull_failures
            .insert(image.to_string(), times);
    }

    pub fn running_services(&self) -> Vec<String> {
        self.state.lock().running.keys().cloned().collect()
    }

    pub fn created_specs(&self) -> Vec<ServiceSpec> {
        self.state.lock().created.clone()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().networks.clone()
    }

    /// Every runtime call as `operation:target`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.state.lock().tags.clone()
    }

    pub fn pull_count(&self) -> usize {
        self.state.lock().pulls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stops
    }

    pub fn health_checks(&self, service_name: &str) -> usize {
        self.state
            .lock()
            .checks
            .get(service_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().images.contains(image)
    }
}

fn record(status: &str) -> Result<PullProgress, RuntimeError> {
    Ok(PullProgress {
        id: Some("layer".to_string()),
        status: status.to_string(),
        progress: None,
    })
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn create_network(&self, name: &str) -> Result<NetworkHandle, RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(format!("create_network:{}", name));
        if state.fail_network {
            return Err(RuntimeError::NetworkFailed(name.to_string(), "injected".into()));
        }
        state.networks.push(name.to_string());
        Ok(NetworkHandle::new(name))
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_network:{}", network));
        state.networks.retain(|n| n != network.as_str());
        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().images.contains(&image.to_string()))
    }

    fn pull_image(&self, image: &ImageRef) -> PullStream {
        let name = image.to_string();
        let mut state = self.state.lock();
        state.pulls += 1;
        state.calls.push(format!("pull:{}", name));

        if state.missing_images.contains(&name) {
            return futures::stream::iter(vec![Err(RuntimeError::ImageNotFound(name))]).boxed();
        }
        if let Some(remaining) = state.transient_pull_failures.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return futures::stream::iter(vec![
                    record("Pulling fs layer"),
                    Err(RuntimeError::PullFailed {
                        image: name,
                        reason: "connection reset".into(),
                    }),
                ])
                .boxed();
            }
        }

        state.images.insert(name);
        futures::stream::iter(vec![
            record("Pulling fs layer"),
            record("Download complete"),
            record("Pull complete"),
        ])
        .boxed()
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let source = source.to_string();
        if !state.images.contains(&source) {
            return Err(RuntimeError::ImageNotFound(source));
        }
        state.calls.push(format!("tag:{}", target));
        state.images.insert(target.to_string());
        state.tags.push((source, target.to_string()));
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceHandle, RuntimeError> {
        let handle = {
            let mut state = self.state.lock();
            state.calls.push(format!("create_service:{}", spec.name));
            if state.fail_create.contains(&spec.name) {
                return Err(RuntimeError::ServiceFailed(spec.name.clone(), "injected".into()));
            }
            if state.running.contains_key(&spec.name) {
                return Err(RuntimeError::ServiceFailed(spec.name.clone(), "name in use".into()));
            }
            state.next_id += 1;
            let handle = ServiceHandle::new(format!("fake-{}", state.next_id), spec.name.clone());
            state.running.insert(spec.name.clone(), spec.clone());
            state.created.push(spec.clone());
            handle
        };

        let hook = self.on_create.lock().clone();
        if let Some(hook) = hook {
            hook(spec);
        }
        Ok(handle)
    }

    async fn stop_service(&self, service: &ServiceHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.stops += 1;
        state.calls.push(format!("stop_service:{}", service.name));
        if state.fail_stop.contains(&service.name) {
            return Err(RuntimeError::StopFailed(service.name.clone(), "injected".into()));
        }
        state.running.remove(&service.name);
        Ok(())
    }

    async fn is_healthy(&self, service: &ServiceHandle) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock();
        *state.checks.entry(service.name.clone()).or_insert(0) += 1;
        Ok(state.running.contains_key(&service.name) && !state.never_healthy.contains(&service.name))
    }

    async fn host_port(
        &self,
        service: &ServiceHandle,
        container_port: u16,
    ) -> Result<Option<u16>, RuntimeError> {
        let state = self.state.lock();
        Ok(state.running.get(&service.name).and_then(|spec| {
            spec.published_ports
                .iter()
                .position(|p| *p == container_port)
                .map(|i| 40000 + i as u16)
        }))
    }
}

/// Hands out pre-built clients regardless of the URL asked for.
pub struct StaticConnector {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn CoordinationStore>,
    urls: Mutex<Vec<String>>,
}

impl StaticConnector {
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            bus,
            store,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl EndpointConnector for StaticConnector {
    async fn bus(&self, url: &str) -> Result<Arc<dyn MessageBus>, BusError> {
        self.urls.lock().push(url.to_string());
        Ok(self.bus.clone())
    }

    async fn store(&self, url: &str) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        self.urls.lock().push(url.to_string());
        Ok(self.store.clone())
    }
}

/// Records install progress as short lines.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl InstallProgress for RecordingProgress {
    fn already_present(&self, image: &ImageRef) {
        self.lines.lock().push(format!("{} already exists", image));
    }

    fn pull_started(&self, image: &ImageRef) {
        self.lines.lock().push(format!("pulling {}", image));
    }

    fn pull_progress(&self, _image: &ImageRef, record: &PullProgress) {
        self.lines.lock().push(record.status.clone());
    }

    fn pull_finished(&self, image: &ImageRef) {
        self.lines.lock().push(format!("pulled {}", image));
    }
}
