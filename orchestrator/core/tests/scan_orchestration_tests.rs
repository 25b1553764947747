// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use scanweave_core::application::deployment::{local_image, service_name};
use scanweave_core::application::orchestrator::{CompletionReason, ScanError, ScanOrchestrator};
use scanweave_core::application::{RunContext, ScanRequest};
use scanweave_core::domain::agent::{
    AgentDefinition, AgentGroup, AgentGroupEntry, AgentKey, Durability, RestartPolicy,
};
use scanweave_core::domain::asset::{Asset, DOMAIN_NAME_SELECTOR};
use scanweave_core::domain::bus::MessageBus;
use scanweave_core::domain::config::{OrchestratorConfig, TimeoutOutcome};
use scanweave_core::domain::events::ScanEvent;
use scanweave_core::domain::runtime::ImageRef;
use scanweave_core::domain::scan::{ScanId, ScanPhase};
use scanweave_core::domain::store::{completion_key, CoordinationStore};
use scanweave_core::infrastructure::fabric::InMemoryFabric;
use scanweave_core::infrastructure::registry::StaticAgentRegistry;
use scanweave_core::infrastructure::store::InMemoryCoordinationStore;
use scanweave_core::testing::{FakeContainerRuntime, StaticConnector};
use scanweave_core::wire::{decode_asset, START_AGENT_SCAN_SELECTOR};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn definition(name: &str, in_selectors: &[&str]) -> AgentDefinition {
    AgentDefinition {
        name: name.to_string(),
        key: Some(AgentKey::new(format!("agent/org/{}", name))),
        version: Some("1.0.0".to_string()),
        description: None,
        image: format!("registry.local:5000/agents/{}:latest", name),
        source: "https://example.com/agent".to_string(),
        durability: Durability::Published,
        restrictions: vec![],
        in_selectors: in_selectors.iter().map(|s| s.to_string()).collect(),
        out_selectors: vec![],
        restart_policy: RestartPolicy::OnFailure,
        args: vec![],
        constraints: vec![],
        mounts: vec![],
        mem_limit: None,
    }
}

fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.spec.completion.poll_interval_ms = 10;
    config.spec.runtime.pull_backoff_ms = 1;
    config.spec.broker.health.interval_ms = 1;
    config.spec.store.health.interval_ms = 1;
    config
}

struct Harness {
    runtime: Arc<FakeContainerRuntime>,
    fabric: InMemoryFabric,
    store: InMemoryCoordinationStore,
    orchestrator: ScanOrchestrator,
}

impl Harness {
    fn new(config: OrchestratorConfig, runtime: FakeContainerRuntime) -> Self {
        let runtime = Arc::new(runtime);
        let fabric = InMemoryFabric::new();
        let store = InMemoryCoordinationStore::new();
        let registry = StaticAgentRegistry::from_definitions(vec![
            definition("nmap", &[DOMAIN_NAME_SELECTOR]),
            definition("whatweb", &["v3.asset.link"]),
            AgentDefinition {
                key: Some(AgentKey::new("agent/acme/nmap")),
                ..definition("nmap", &[DOMAIN_NAME_SELECTOR])
            },
        ]);
        let connector = StaticConnector::new(Arc::new(fabric.clone()), Arc::new(store.clone()));
        let orchestrator = ScanOrchestrator::new(
            config,
            runtime.clone(),
            Arc::new(registry),
            Arc::new(connector),
        );
        Self {
            runtime,
            fabric,
            store,
            orchestrator,
        }
    }

    async fn signal_completion(&self, scan_id: ScanId) {
        self.store
            .set_flag(&completion_key(&scan_id.to_string()))
            .await
            .unwrap();
    }
}

fn group(entries: Vec<AgentGroupEntry>) -> AgentGroup {
    AgentGroup::new("test group", entries)
}

fn releases(runtime: &FakeContainerRuntime) -> Vec<String> {
    runtime
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("stop_service:") || c.starts_with("remove_network:"))
        .collect()
}

#[tokio::test]
async fn test_scan_injects_assets_and_releases_everything() {
    let harness = Harness::new(fast_config(), FakeContainerRuntime::new());
    let scan_id = ScanId::new();
    harness.signal_completion(scan_id).await;

    let request = ScanRequest::new(
        group(vec![AgentGroupEntry::new("agent/org/nmap").with_replicas(2)]),
        vec![Asset::domain("example.com"), Asset::domain("ostorlab.co")],
    );
    let report = harness
        .orchestrator
        .run(request, RunContext::new(scan_id))
        .await
        .unwrap();

    assert_eq!(report.phase, ScanPhase::Completed);
    assert_eq!(report.completion, Some(CompletionReason::Signalled));
    assert_eq!(report.injected, 2);
    assert_eq!(report.agents[0].services.len(), 2);
    assert!(report.teardown.is_clean());

    let published = harness.fabric.published();
    assert_eq!(published[0].selector(), START_AGENT_SCAN_SELECTOR);

    // Agents were never consumed, so both assets still sit in their queue.
    let mut subscription = harness
        .fabric
        .subscribe("agent/org/nmap", &[DOMAIN_NAME_SELECTOR.to_string()])
        .await
        .unwrap();
    let mut names = Vec::new();
    for _ in 0..2 {
        let delivery = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.envelope.selector(), DOMAIN_NAME_SELECTOR);
        match decode_asset(DOMAIN_NAME_SELECTOR, &delivery.envelope.payload).unwrap() {
            Asset::DomainName { name } => names.push(name),
            other => panic!("unexpected asset {:?}", other),
        }
        delivery.ack().await.unwrap();
    }
    names.sort();
    assert_eq!(names, vec!["example.com", "ostorlab.co"]);

    assert!(harness.runtime.running_services().is_empty());
    assert!(harness.runtime.networks().is_empty());
}

#[tokio::test]
async fn test_teardown_runs_in_reverse_creation_order() {
    let harness = Harness::new(fast_config(), FakeContainerRuntime::new());
    let scan_id = ScanId::new();
    harness.signal_completion(scan_id).await;

    let request = ScanRequest::new(
        group(vec![AgentGroupEntry::new("agent/org/nmap").with_replicas(2)]),
        vec![],
    );
    harness
        .orchestrator
        .run(request, RunContext::new(scan_id))
        .await
        .unwrap();

    let short = scan_id.short();
    assert_eq!(
        releases(&harness.runtime),
        vec![
            format!("stop_service:{}", service_name(&scan_id, "agent/org/nmap", 1)),
            format!("stop_service:{}", service_name(&scan_id, "agent/org/nmap", 0)),
            format!("stop_service:scanweave-{}-store", short),
            format!("stop_service:scanweave-{}-broker", short),
            format!("remove_network:scanweave-{}", short),
        ]
    );
}

#[tokio::test]
async fn test_entries_sharing_a_short_name_get_distinct_containers() {
    let harness = Harness::new(fast_config(), FakeContainerRuntime::new());
    let scan_id = ScanId::new();
    harness.signal_completion(scan_id).await;

    let request = ScanRequest::new(
        group(vec![
            AgentGroupEntry::new("agent/org/nmap"),
            AgentGroupEntry::new("agent/org/nmap"),
            AgentGroupEntry::new("agent/acme/nmap"),
        ]),
        vec![],
    );
    let report = harness
        .orchestrator
        .run(request, RunContext::new(scan_id))
        .await
        .unwrap();

    assert_eq!(report.phase, ScanPhase::Completed);
    let mut services: Vec<String> = report
        .agents
        .iter()
        .flat_map(|agent| agent.services.iter().cloned())
        .collect();
    assert_eq!(services.len(), 3);
    services.sort();
    services.dedup();
    assert_eq!(services.len(), 3);
    assert!(services.contains(&service_name(&scan_id, "agent/org/nmap#0", 0)));
    assert!(services.contains(&service_name(&scan_id, "agent/org/nmap#1", 0)));
    assert!(services.contains(&service_name(&scan_id, "agent/acme/nmap", 0)));
    assert!(harness.runtime.running_services().is_empty());
}

#[tokio::test]
async fn test_negative_replicas_rejected_before_provisioning() {
    let harness = Harness::new(fast_config(), FakeContainerRuntime::new());
    let request = ScanRequest::new(
        group(vec![AgentGroupEntry::new("agent/org/nmap").with_replicas(-1)]),
        vec![Asset::domain("example.com")],
    );

    let err = harness
        .orchestrator
        .run(request, RunContext::new(ScanId::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::InvalidRequest(_)));
    assert!(err.to_string().contains("is not in the range"));
    assert_eq!(err.exit_code(), 3);
    assert!(harness.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_agent_fails_before_any_agent_starts() {
    let harness = Harness::new(fast_config(), FakeContainerRuntime::new());
    let request = ScanRequest::new(
        group(vec![
            AgentGroupEntry::new("agent/org/nmap"),
            AgentGroupEntry::new("agent/org/missing"),
        ]),
        vec![],
    );

    let err = harness
        .orchestrator
        .run(request, RunContext::new(ScanId::new()))
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 2);
    let agent_creates = harness
        .runtime
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("create_service:scan-"))
        .count();
    assert_eq!(agent_creates, 0);
    assert!(harness.runtime.running_services().is_empty());
    assert!(harness.runtime.networks().is_empty());
}

#[tokio::test]
async fn test_partial_deployment_failure_releases_started_agents() {
    let runtime = FakeContainerRuntime::new();
    let scan_id = ScanId::new();
    runtime.fail_create(&service_name(&scan_id, "agent/org/whatweb", 0));
    let harness = Harness::new(fast_config(), runtime);

    let request = ScanRequest::new(
        group(vec![
            AgentGroupEntry::new("agent/org/nmap"),
            AgentGroupEntry::new("agent/org/whatweb"),
        ]),
        vec![],
    );
    let err = harness
        .orchestrator
        .run(request, RunContext::new(scan_id))
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Deployment(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(harness.runtime.running_services().is_empty());
    assert!(harness
        .runtime
        .calls()
        .contains(&format!("stop_service:{}", service_name(&scan_id, "agent/org/nmap", 0))));
}

#[tokio::test]
async fn test_present_images_are_not_pulled() {
    let config = fast_config();
    let runtime = FakeContainerRuntime::new()
        .with_image(&ImageRef::parse(&config.spec.broker.image).to_string())
        .with_image(&local_image(&AgentKey::new("agent/org/nmap"), "1.0.0").to_string());
    let harness = Harness::new(config, runtime);
    let scan_id = ScanId::new();
    harness.signal_completion(scan_id).await;

    let request = ScanRequest::new(group(vec![AgentGroupEntry::new("agent/org/nmap")]), vec![]);
    harness
        .orchestrator
        .run(request, RunContext::new(scan_id))
        .await
        .unwrap();

    assert_eq!(harness.runtime.pull_count(), 0);
}

#[tokio::test]
async fn test_cancellation_during_deployment_aborts_and_releases() {
    let harness = Harness::new(fast_config(), FakeContainerRuntime::new());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    harness.runtime.on_create(move |spec| {
        if spec.name.starts_with("scan-") {
            trigger.cancel();
        }
    });

    let scan_id = ScanId::new();
    let ctx = RunContext::new(scan_id).with_cancel(cancel);
    let mut events = ctx.events.subscribe();
    let request = ScanRequest::new(
        group(vec![AgentGroupEntry::new("agent/org/nmap").with_replicas(3)]),
        vec![],
    );

    let err = harness.orchestrator.run(request, ctx).await.unwrap_err();

    assert!(matches!(err, ScanError::Aborted));
    let agents_created = harness
        .runtime
        .created_specs()
        .iter()
        .filter(|s| s.name.starts_with("scan-"))
        .count();
    assert_eq!(agents_created, 1);
    assert!(harness.runtime.running_services().is_empty());

    let mut last_phase = None;
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::PhaseChanged { to, .. } = event {
            last_phase = Some(to);
        }
    }
    assert_eq!(last_phase, Some(ScanPhase::Aborted));
}

#[tokio::test(start_paused = true)]
async fn test_idle_fabric_completes_scan() {
    let mut config = fast_config();
    config.spec.completion.quiescence_secs = Some(5);
    let harness = Harness::new(config, FakeContainerRuntime::new());

    let request = ScanRequest::new(group(vec![AgentGroupEntry::new("agent/org/nmap")]), vec![]);
    let report = harness
        .orchestrator
        .run(request, RunContext::new(ScanId::new()))
        .await
        .unwrap();

    assert_eq!(report.completion, Some(CompletionReason::Quiescent));
}

#[tokio::test(start_paused = true)]
async fn test_pending_messages_hold_scan_until_timeout() {
    let mut config = fast_config();
    config.spec.completion.quiescence_secs = Some(1);
    config.spec.completion.completion_signal = false;
    config.spec.completion.timeout_secs = 30;
    config.spec.completion.timeout_outcome = TimeoutOutcome::Failed;
    let harness = Harness::new(config, FakeContainerRuntime::new());

    let request = ScanRequest::new(
        group(vec![AgentGroupEntry::new("agent/org/nmap")]),
        vec![Asset::domain("example.com")],
    );
    let err = harness
        .orchestrator
        .run(request, RunContext::new(ScanId::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Timeout(_)));
    assert!(harness.runtime.running_services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_completed_outcome() {
    let mut config = fast_config();
    config.spec.completion.quiescence_secs = None;
    config.spec.completion.timeout_secs = 2;
    config.spec.completion.timeout_outcome = TimeoutOutcome::Completed;
    let harness = Harness::new(config, FakeContainerRuntime::new());

    let request = ScanRequest::new(group(vec![AgentGroupEntry::new("agent/org/nmap")]), vec![]);
    let report = harness
        .orchestrator
        .run(request, RunContext::new(ScanId::new()))
        .await
        .unwrap();

    assert_eq!(report.phase, ScanPhase::Completed);
    assert_eq!(report.completion, Some(CompletionReason::TimedOut));
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_agent_warned_once() {
    let mut config = fast_config();
    config.spec.completion.quiescence_secs = None;
    config.spec.completion.timeout_secs = 1;
    config.spec.completion.timeout_outcome = TimeoutOutcome::Completed;

    let scan_id = ScanId::new();
    let runtime = FakeContainerRuntime::new();
    let agent = service_name(&scan_id, "agent/org/nmap", 0);
    runtime.set_never_healthy(&agent);
    let harness = Harness::new(config, runtime);

    let ctx = RunContext::new(scan_id);
    let mut events = ctx.events.subscribe();
    let request = ScanRequest::new(group(vec![AgentGroupEntry::new("agent/org/nmap")]), vec![]);
    harness.orchestrator.run(request, ctx).await.unwrap();

    let mut warnings = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::LivenessWarning { service, .. } = event {
            warnings.push(service);
        }
    }
    assert_eq!(warnings, vec![agent.clone()]);
    assert!(harness.runtime.health_checks(&agent) > 1);
}

#[tokio::test]
async fn test_teardown_continues_past_failed_step() {
    let runtime = FakeContainerRuntime::new();
    let scan_id = ScanId::new();
    runtime.fail_stop(&format!("scanweave-{}-broker", scan_id.short()));
    let harness = Harness::new(fast_config(), runtime);
    harness.signal_completion(scan_id).await;

    let request = ScanRequest::new(group(vec![AgentGroupEntry::new("agent/org/nmap")]), vec![]);
    let report = harness
        .orchestrator
        .run(request, RunContext::new(scan_id))
        .await
        .unwrap();

    assert_eq!(report.teardown.failures.len(), 1);
    assert_eq!(report.teardown.failures[0].name, format!("scanweave-{}-broker", scan_id.short()));
    assert!(harness.runtime.networks().is_empty());
    assert_eq!(harness.runtime.running_services(), vec![format!("scanweave-{}-broker", scan_id.short())]);
}
