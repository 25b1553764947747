// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scan Orchestrator
//!
//! Drives one scan through its phases:
//!
//! ```text
//! Init → Provisioning → Deploying → Running → {Completed | Failed | Aborted}
//! ```
//!
//! - **Provisioning** creates the scan network, then the broker and the
//!   coordination store, each polled until healthy.
//! - **Deploying** prepares every group entry (registry lookup, image
//!   install), declares the agent queues, then starts the replicas.
//! - **Running** publishes the start control message and one message per
//!   initial asset, then polls the [`CompletionPolicy`] conditions.
//!
//! Every resource is pushed on a [`ResourceStack`] as soon as it may exist.
//! Whatever the outcome, the stack is released in reverse creation order,
//! continuing past individual failures.
//!
//! Cancellation is checked between steps. A runtime call already in flight
//! completes; its resource is on the stack by then and is released with the
//! rest.
//!
//! [`CompletionPolicy`]: crate::domain::config::CompletionPolicy

use crate::application::context::RunContext;
use crate::application::deployment::{
    AgentDeploymentManager, DeployTarget, DeploymentError, PreparedAgent, PullPolicy,
};
use crate::application::provisioning::{LocalBroker, LocalStore, ProvisioningError};
use crate::application::request::ScanRequest;
use crate::domain::agent::{AgentGroup, AgentKey};
use crate::domain::bus::{BusError, MessageBus};
use crate::domain::config::{OrchestratorConfig, TimeoutOutcome};
use crate::domain::events::{ResourceKind, ScanEvent};
use crate::domain::message::{Envelope, MessageId};
use crate::domain::registry::AgentRegistry;
use crate::domain::runtime::{ContainerRuntime, NetworkHandle, RuntimeError, ServiceHandle};
use crate::domain::scan::{Scan, ScanId, ScanPhase, TransitionError};
use crate::domain::store::{completion_key, CoordinationStore, StoreError};
use crate::infrastructure::connector::EndpointConnector;
use crate::wire::{self, START_AGENT_SCAN_SELECTOR};
use chrono::{DateTime, Utc};
use prost::Message as _;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid scan request: {0}")]
    InvalidRequest(String),
    #[error("Failed to create scan network: {0}")]
    Network(RuntimeError),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Scan did not complete within {0:?}")]
    Timeout(Duration),
    #[error("Scan aborted")]
    Aborted,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl ScanError {
    /// Process exit code for the CLI: not-found family 2, invalid input 3,
    /// anything else 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Deployment(e) if e.is_not_found() => 2,
            ScanError::InvalidRequest(_)
            | ScanError::Deployment(DeploymentError::InvalidReplicas { .. }) => 3,
            _ => 1,
        }
    }
}

fn aborted_on_cancel(error: ProvisioningError) -> ScanError {
    match error {
        ProvisioningError::Cancelled(_) => ScanError::Aborted,
        other => ScanError::Provisioning(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Fabric empty and idle for the quiescence window.
    Quiescent,
    /// An agent set the scan's completion flag.
    Signalled,
    /// Wall-clock timeout with a `completed` outcome.
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployedAgent {
    pub key: AgentKey,
    pub queue: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownFailure {
    pub kind: ResourceKind,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    /// Released resource names, in release order.
    pub released: Vec<String>,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: ScanId,
    pub title: Option<String>,
    pub phase: ScanPhase,
    pub completion: Option<CompletionReason>,
    pub agents: Vec<DeployedAgent>,
    pub injected: usize,
    pub teardown: TeardownReport,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

enum Resource {
    Network(NetworkHandle),
    Broker(LocalBroker),
    Store(LocalStore),
    Agent { key: AgentKey, handle: ServiceHandle },
}

impl Resource {
    fn kind(&self) -> ResourceKind {
        match self {
            Resource::Network(_) => ResourceKind::Network,
            Resource::Broker(_) => ResourceKind::Broker,
            Resource::Store(_) => ResourceKind::Store,
            Resource::Agent { .. } => ResourceKind::Agent,
        }
    }

    fn name(&self) -> String {
        match self {
            Resource::Network(network) => network.to_string(),
            Resource::Broker(broker) => broker.service.name().to_string(),
            Resource::Store(store) => store.service.name().to_string(),
            Resource::Agent { handle, .. } => handle.name.clone(),
        }
    }
}

/// Resources owned by one scan, released last-in first-out.
#[derive(Default)]
pub struct ResourceStack {
    entries: Vec<Resource>,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, resource: Resource) {
        self.entries.push(resource);
    }

    fn agent_handles(&self) -> Vec<ServiceHandle> {
        self.entries
            .iter()
            .filter_map(|r| match r {
                Resource::Agent { handle, .. } => Some(handle.clone()),
                _ => None,
            })
            .collect()
    }

    /// Releases everything, newest first. A failed step is reported and
    /// skipped. The stack is empty afterwards, so a second call is a no-op.
    pub async fn teardown(
        &mut self,
        runtime: &dyn ContainerRuntime,
        ctx: &RunContext,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();
        while let Some(resource) = self.entries.pop() {
            let kind = resource.kind();
            let name = resource.name();
            let result = match resource {
                Resource::Network(network) => runtime.remove_network(&network).await,
                Resource::Broker(mut broker) => broker.stop().await,
                Resource::Store(mut store) => store.stop().await,
                Resource::Agent { key, handle } => {
                    debug!(agent = %key, "Stopping {}", handle.name);
                    runtime.stop_service(&handle).await
                }
            };
            match result {
                Ok(()) => {
                    debug!("Released {:?} {}", kind, name);
                    report.released.push(name);
                }
                Err(e) => {
                    warn!("Failed to release {:?} {}: {}", kind, name, e);
                    ctx.teardown_failed(kind, &name, &e.to_string());
                    report.failures.push(TeardownFailure {
                        kind,
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

/// Queue per group entry: the agent key, suffixed with the entry index when
/// the same key appears more than once.
pub fn queue_names(group: &AgentGroup) -> Vec<String> {
    let mut counts: HashMap<&AgentKey, usize> = HashMap::new();
    for entry in &group.agents {
        *counts.entry(&entry.key).or_default() += 1;
    }
    group
        .agents
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            if counts.get(&entry.key).copied().unwrap_or(0) > 1 {
                format!("{}#{}", entry.key, index)
            } else {
                entry.key.to_string()
            }
        })
        .collect()
}

/// Live clients for a provisioned scan.
struct Endpoints {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn CoordinationStore>,
    target: DeployTarget,
}

#[derive(Default)]
struct Progress {
    agents: Vec<DeployedAgent>,
    injected: usize,
}

pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    deployer: AgentDeploymentManager,
    connector: Arc<dyn EndpointConnector>,
}

impl ScanOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn AgentRegistry>,
        connector: Arc<dyn EndpointConnector>,
    ) -> Self {
        let pull_policy = PullPolicy {
            attempts: config.spec.runtime.pull_attempts,
            backoff: Duration::from_millis(config.spec.runtime.pull_backoff_ms),
        };
        let deployer =
            AgentDeploymentManager::new(runtime.clone(), registry).with_pull_policy(pull_policy);
        Self {
            config,
            runtime,
            deployer,
            connector,
        }
    }

    pub fn deployer(&self) -> &AgentDeploymentManager {
        &self.deployer
    }

    /// Runs `request` to a terminal phase. The scan takes `ctx.scan_id`.
    ///
    /// An invalid request is rejected before anything is created. Once
    /// provisioning has started, teardown always runs before this returns.
    pub async fn run(&self, request: ScanRequest, ctx: RunContext) -> Result<ScanReport, ScanError> {
        request
            .validate()
            .map_err(|e| ScanError::InvalidRequest(e.to_string()))?;
        let span = ctx.span.clone();
        self.run_validated(request, ctx).instrument(span).await
    }

    async fn run_validated(
        &self,
        request: ScanRequest,
        ctx: RunContext,
    ) -> Result<ScanReport, ScanError> {
        let mut scan = request.into_scan(ctx.scan_id);
        let mut stack = ResourceStack::new();
        let mut progress = Progress::default();

        info!(
            "Starting scan {} with {} agent(s) and {} asset(s)",
            scan.id,
            scan.group.total_replicas(),
            scan.assets.len()
        );

        let outcome = self.drive(&mut scan, &ctx, &mut stack, &mut progress).await;

        let terminal = match &outcome {
            Ok(_) => ScanPhase::Completed,
            Err(ScanError::Aborted) => ScanPhase::Aborted,
            Err(_) => ScanPhase::Failed,
        };
        if let Err(e) = self.advance(&mut scan, &ctx, terminal) {
            error!("{}", e);
        }

        let teardown = stack.teardown(self.runtime.as_ref(), &ctx).await;
        if !teardown.is_clean() {
            warn!(
                "Teardown of scan {} left {} resource(s) behind",
                scan.id,
                teardown.failures.len()
            );
        }

        match outcome {
            Ok(completion) => {
                info!("Scan {} completed ({:?})", scan.id, completion);
                Ok(ScanReport {
                    scan_id: scan.id,
                    title: scan.title.clone(),
                    phase: scan.phase(),
                    completion: Some(completion),
                    agents: progress.agents,
                    injected: progress.injected,
                    teardown,
                    started_at: scan.started_at,
                    ended_at: scan.ended_at,
                })
            }
            Err(e) => {
                error!("Scan {} ended {}: {}", scan.id, scan.phase(), e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        scan: &mut Scan,
        ctx: &RunContext,
        stack: &mut ResourceStack,
        progress: &mut Progress,
    ) -> Result<CompletionReason, ScanError> {
        self.advance(scan, ctx, ScanPhase::Provisioning)?;
        let endpoints = self.provision(scan, ctx, stack).await?;

        self.checkpoint(ctx)?;
        self.advance(scan, ctx, ScanPhase::Deploying)?;
        progress.agents = self.deploy_group(scan, ctx, stack, &endpoints).await?;

        self.checkpoint(ctx)?;
        self.advance(scan, ctx, ScanPhase::Running)?;
        progress.injected = self.inject(scan, ctx, endpoints.bus.as_ref()).await?;

        self.wait_for_completion(scan, ctx, stack, &endpoints).await
    }

    fn checkpoint(&self, ctx: &RunContext) -> Result<(), ScanError> {
        if ctx.is_cancelled() {
            return Err(ScanError::Aborted);
        }
        Ok(())
    }

    fn advance(
        &self,
        scan: &mut Scan,
        ctx: &RunContext,
        next: ScanPhase,
    ) -> Result<(), TransitionError> {
        let from = scan.phase();
        scan.transition(next)?;
        info!("Scan {}: {} -> {}", scan.id, from, next);
        ctx.phase_changed(from, next);
        Ok(())
    }

    async fn provision(
        &self,
        scan: &Scan,
        ctx: &RunContext,
        stack: &mut ResourceStack,
    ) -> Result<Endpoints, ScanError> {
        self.checkpoint(ctx)?;
        let short = scan.id.short();
        let network_name = format!("{}-{}", self.config.spec.runtime.network_prefix, short);
        let network = self
            .runtime
            .create_network(&network_name)
            .await
            .map_err(ScanError::Network)?;
        stack.push(Resource::Network(network.clone()));
        ctx.provisioned(ResourceKind::Network, &network_name);

        self.checkpoint(ctx)?;
        let mut broker = LocalBroker::new(self.runtime.clone(), &network, &short, &self.config.spec.broker);
        let started = broker.start(ctx.progress.as_ref(), &ctx.cancel).await;
        let broker_name = broker.service.name().to_string();
        let bus_url = broker.service.network_url();
        stack.push(Resource::Broker(broker));
        let broker_host_url = started.map_err(aborted_on_cancel)?;
        ctx.provisioned(ResourceKind::Broker, &broker_name);

        self.checkpoint(ctx)?;
        let mut store = LocalStore::new(self.runtime.clone(), &network, &short, &self.config.spec.store);
        let started = store.start(ctx.progress.as_ref(), &ctx.cancel).await;
        let store_name = store.service.name().to_string();
        let store_url = store.service.network_url();
        stack.push(Resource::Store(store));
        let store_host_url = started.map_err(aborted_on_cancel)?;
        ctx.provisioned(ResourceKind::Store, &store_name);

        let bus = self.connector.bus(&broker_host_url).await?;
        let store = self.connector.store(&store_host_url).await?;
        store.ping().await?;

        Ok(Endpoints {
            bus,
            store,
            target: DeployTarget {
                scan_id: scan.id,
                network,
                bus_url,
                store_url,
                tracing_collector_url: self.config.spec.tracing.collector_url.clone(),
            },
        })
    }

    async fn deploy_group(
        &self,
        scan: &Scan,
        ctx: &RunContext,
        stack: &mut ResourceStack,
        endpoints: &Endpoints,
    ) -> Result<Vec<DeployedAgent>, ScanError> {
        // Every entry is resolved before the first container starts, so a
        // missing agent fails the scan without partial deployment.
        let mut prepared: Vec<PreparedAgent> = Vec::with_capacity(scan.group.agents.len());
        for (entry, queue) in scan.group.agents.iter().zip(queue_names(&scan.group)) {
            self.checkpoint(ctx)?;
            prepared.push(
                self.deployer
                    .prepare(entry, queue, ctx.progress.as_ref())
                    .await?,
            );
        }

        for agent in &prepared {
            endpoints
                .bus
                .declare_queue(&agent.queue, &agent.definition.in_selectors)
                .await?;
        }

        let mut deployed = Vec::with_capacity(prepared.len());
        for agent in &prepared {
            let key = agent.key();
            let mut services = Vec::with_capacity(agent.replicas as usize);
            for replica in 0..agent.replicas {
                self.checkpoint(ctx)?;
                let handle = self.deployer.deploy(agent, &endpoints.target, replica).await?;
                services.push(handle.name.clone());
                ctx.events.publish(ScanEvent::AgentDeployed {
                    scan_id: scan.id,
                    key: key.clone(),
                    service: handle.name.clone(),
                    replica,
                    deployed_at: Utc::now(),
                });
                stack.push(Resource::Agent {
                    key: key.clone(),
                    handle,
                });
            }
            deployed.push(DeployedAgent {
                key,
                queue: agent.queue.clone(),
                services,
            });
        }
        Ok(deployed)
    }

    /// Publishes the start control message, then one message per asset.
    /// Returns the number of assets published.
    async fn inject(
        &self,
        scan: &Scan,
        ctx: &RunContext,
        bus: &dyn MessageBus,
    ) -> Result<usize, ScanError> {
        let control = ScanRequest::from_scan(scan)
            .to_start_agent_scan(None)
            .encode_to_vec();
        bus.publish(Envelope::new(
            START_AGENT_SCAN_SELECTOR,
            &MessageId::generate(),
            control,
        ))
        .await?;

        for asset in &scan.assets {
            let selector = asset.selector();
            let envelope = Envelope::new(selector, &MessageId::generate(), wire::encode_asset(asset));
            let topic = envelope.topic.clone();
            let routed = bus.publish(envelope).await?;
            if routed == 0 {
                warn!("No agent consumes {}; asset {} is dropped", selector, asset.describe());
            } else {
                info!("Injected {} on {}", asset.describe(), selector);
            }
            ctx.events.publish(ScanEvent::AssetInjected {
                scan_id: scan.id,
                selector: selector.to_string(),
                topic,
                injected_at: Utc::now(),
            });
        }
        Ok(scan.assets.len())
    }

    async fn wait_for_completion(
        &self,
        scan: &Scan,
        ctx: &RunContext,
        stack: &ResourceStack,
        endpoints: &Endpoints,
    ) -> Result<CompletionReason, ScanError> {
        let policy = &self.config.spec.completion;
        let deadline = Instant::now() + policy.timeout();
        let flag = completion_key(&scan.id.to_string());
        let agents = stack.agent_handles();
        let mut unhealthy: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ScanError::Aborted),
                _ = tokio::time::sleep(policy.poll_interval()) => {}
            }

            if policy.completion_signal {
                match endpoints.store.is_flag_set(&flag).await {
                    Ok(true) => return Ok(CompletionReason::Signalled),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to read completion flag: {}", e),
                }
            }

            if let Some(window) = policy.quiescence_window() {
                match endpoints.bus.activity().await {
                    Ok(activity) if activity.is_quiescent(window) => {
                        return Ok(CompletionReason::Quiescent)
                    }
                    Ok(activity) => debug!("{} message(s) pending", activity.pending),
                    Err(e) => warn!("Failed to read fabric activity: {}", e),
                }
            }

            self.check_liveness(scan, ctx, &agents, &mut unhealthy).await;

            if Instant::now() >= deadline {
                return match policy.timeout_outcome {
                    TimeoutOutcome::Completed => Ok(CompletionReason::TimedOut),
                    TimeoutOutcome::Failed => Err(ScanError::Timeout(policy.timeout())),
                };
            }
        }
    }

    /// Warns once per agent container that stops reporting healthy.
    async fn check_liveness(
        &self,
        scan: &Scan,
        ctx: &RunContext,
        agents: &[ServiceHandle],
        unhealthy: &mut HashSet<String>,
    ) {
        for handle in agents {
            let reason = match self.runtime.is_healthy(handle).await {
                Ok(true) => {
                    unhealthy.remove(&handle.name);
                    continue;
                }
                Ok(false) => "not running".to_string(),
                Err(e) => e.to_string(),
            };
            if unhealthy.insert(handle.name.clone()) {
                warn!("Agent container {} is unhealthy: {}", handle.name, reason);
                ctx.events.publish(ScanEvent::LivenessWarning {
                    scan_id: scan.id,
                    service: handle.name.clone(),
                    reason,
                    observed_at: Utc::now(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentGroupEntry;

    #[test]
    fn test_queue_names_disambiguate_repeated_keys() {
        let group = AgentGroup::new(
            "g",
            vec![
                AgentGroupEntry::new("agent/org/a"),
                AgentGroupEntry::new("agent/org/b"),
                AgentGroupEntry::new("agent/org/a"),
            ],
        );
        assert_eq!(
            queue_names(&group),
            vec!["agent/org/a#0", "agent/org/b", "agent/org/a#2"]
        );
    }

    #[test]
    fn test_exit_codes() {
        let not_found = ScanError::Deployment(DeploymentError::AgentNotInstallable {
            key: AgentKey::new("agent/org/x"),
            reason: "missing".into(),
        });
        assert_eq!(not_found.exit_code(), 2);
        assert_eq!(ScanError::InvalidRequest("bad".into()).exit_code(), 3);
        assert_eq!(ScanError::Aborted.exit_code(), 1);
        assert_eq!(ScanError::Timeout(Duration::from_secs(1)).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_teardown_is_reverse_order_and_best_effort() {
        use crate::testing::FakeContainerRuntime;

        let runtime = Arc::new(FakeContainerRuntime::new());
        let network = runtime.create_network("net").await.unwrap();
        let mut stack = ResourceStack::new();
        stack.push(Resource::Network(network));
        for name in ["a-0", "a-1"] {
            let spec = crate::domain::runtime::ServiceSpec::new(
                name,
                crate::domain::runtime::ImageRef::parse("img:v1"),
                NetworkHandle::new("net"),
            );
            let handle = runtime.create_service(&spec).await.unwrap();
            stack.push(Resource::Agent {
                key: AgentKey::new("agent/org/a"),
                handle,
            });
        }
        runtime.fail_stop("a-1");

        let ctx = RunContext::new(ScanId::new());
        let mut events = ctx.events.subscribe();
        let report = stack.teardown(runtime.as_ref(), &ctx).await;

        assert_eq!(report.released, vec!["a-0", "net"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "a-1");
        assert!(runtime.networks().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            ScanEvent::TeardownStepFailed { .. }
        ));

        let again = stack.teardown(runtime.as_ref(), &ctx).await;
        assert!(again.released.is_empty() && again.is_clean());
    }
}
