// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Full scans with agents running in-process: every container the
// orchestrator creates is backed by an AgentRuntime task on the same
// in-memory fabric.

use async_trait::async_trait;
use parking_lot::Mutex;
use scanweave_core::application::orchestrator::{CompletionReason, ScanOrchestrator};
use scanweave_core::application::{RunContext, ScanRequest};
use scanweave_core::domain::agent::{
    AgentDefinition, AgentGroup, AgentGroupEntry, AgentKey, Durability, RestartPolicy,
};
use scanweave_core::domain::asset::{Asset, DOMAIN_NAME_SELECTOR};
use scanweave_core::domain::config::OrchestratorConfig;
use scanweave_core::domain::scan::ScanId;
use scanweave_core::domain::settings::{AgentSettings, AGENT_SETTINGS_ENV};
use scanweave_core::domain::trace::TraceContext;
use scanweave_core::infrastructure::fabric::InMemoryFabric;
use scanweave_core::infrastructure::registry::StaticAgentRegistry;
use scanweave_core::infrastructure::store::InMemoryCoordinationStore;
use scanweave_core::testing::{FakeContainerRuntime, StaticConnector};
use scanweave_core::wire::FINGERPRINT_LIBRARY_SELECTOR;
use scanweave_sdk::trace::{RecordingSpanFactory, EMIT_SPAN, PROCESS_SPAN};
use scanweave_sdk::{Agent, AgentContext, AgentError, AgentRuntime, Message};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DISCOVERY: &str = "agent/org/discovery";
const SINK: &str = "agent/org/sink";

fn definition(key: &str, in_selectors: &[&str], out_selectors: &[&str]) -> AgentDefinition {
    AgentDefinition {
        name: key.rsplit('/').next().unwrap_or(key).to_string(),
        key: Some(AgentKey::new(key)),
        version: Some("1.0.0".to_string()),
        description: None,
        image: format!("registry.local:5000/{}:latest", key),
        source: "https://example.com".to_string(),
        durability: Durability::Development,
        restrictions: vec![],
        in_selectors: in_selectors.iter().map(|s| s.to_string()).collect(),
        out_selectors: out_selectors.iter().map(|s| s.to_string()).collect(),
        restart_policy: RestartPolicy::OnFailure,
        args: vec![],
        constraints: vec![],
        mounts: vec![],
        mem_limit: None,
    }
}

/// Reports one web server library per domain.
struct Discovery {
    seen: Arc<Mutex<Vec<Message>>>,
}

#[async_trait]
impl Agent for Discovery {
    async fn process(&self, ctx: &mut AgentContext, message: Message) -> Result<(), AgentError> {
        let domain = message.data["name"].as_str().unwrap_or_default().to_string();
        self.seen.lock().push(message);
        ctx.emit(
            FINGERPRINT_LIBRARY_SELECTOR,
            json!({
                "domain_name": domain,
                "library_name": "nginx",
                "library_type": "WEB_SERVER",
            }),
        )
        .await?;
        Ok(())
    }
}

/// Records fingerprints; signals completion after `expected` of them.
struct Sink {
    seen: Arc<Mutex<Vec<Message>>>,
    expected: Option<usize>,
}

#[async_trait]
impl Agent for Sink {
    async fn process(&self, ctx: &mut AgentContext, message: Message) -> Result<(), AgentError> {
        let count = {
            let mut seen = self.seen.lock();
            seen.push(message);
            seen.len()
        };
        if Some(count) == self.expected {
            ctx.signal_completion().await?;
        }
        Ok(())
    }
}

struct Pipeline {
    runtime: Arc<FakeContainerRuntime>,
    orchestrator: ScanOrchestrator,
    discovered: Arc<Mutex<Vec<Message>>>,
    sunk: Arc<Mutex<Vec<Message>>>,
    spans: RecordingSpanFactory,
    agents: CancellationToken,
}

fn pipeline(config: OrchestratorConfig, sink_expects: Option<usize>) -> Pipeline {
    let runtime = Arc::new(FakeContainerRuntime::new());
    let fabric = InMemoryFabric::new();
    let store = InMemoryCoordinationStore::new();
    let spans = RecordingSpanFactory::new();
    let agents = CancellationToken::new();
    let discovered = Arc::new(Mutex::new(Vec::new()));
    let sunk = Arc::new(Mutex::new(Vec::new()));

    {
        let fabric = fabric.clone();
        let store = store.clone();
        let spans = spans.clone();
        let agents = agents.clone();
        let discovered = discovered.clone();
        let sunk = sunk.clone();
        runtime.on_create(move |spec| {
            let Some(raw) = spec.env.get(AGENT_SETTINGS_ENV) else {
                return;
            };
            let settings = AgentSettings::from_env_value(raw).unwrap();
            let agent: Arc<dyn Agent> = if settings.definition.key().as_str() == DISCOVERY {
                Arc::new(Discovery {
                    seen: discovered.clone(),
                })
            } else {
                Arc::new(Sink {
                    seen: sunk.clone(),
                    expected: sink_expects,
                })
            };
            let builder = AgentRuntime::builder(agent, settings)
                .with_bus(Arc::new(fabric.clone()))
                .with_store(Arc::new(store.clone()))
                .with_span_factory(Arc::new(spans.clone()))
                .with_cancel(agents.clone());
            tokio::spawn(async move {
                let agent_runtime = builder.build().await.unwrap();
                agent_runtime.run().await.unwrap();
            });
        });
    }

    let registry = StaticAgentRegistry::from_definitions(vec![
        definition(DISCOVERY, &[DOMAIN_NAME_SELECTOR], &[FINGERPRINT_LIBRARY_SELECTOR]),
        definition(SINK, &["v3.fingerprint"], &[]),
    ]);
    let connector = StaticConnector::new(Arc::new(fabric), Arc::new(store));
    let orchestrator = ScanOrchestrator::new(
        config,
        runtime.clone(),
        Arc::new(registry),
        Arc::new(connector),
    );

    Pipeline {
        runtime,
        orchestrator,
        discovered,
        sunk,
        spans,
        agents,
    }
}

fn base_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.spec.completion.poll_interval_ms = 10;
    config.spec.broker.health.interval_ms = 1;
    config.spec.store.health.interval_ms = 1;
    config
}

fn request() -> ScanRequest {
    ScanRequest::new(
        AgentGroup::new(
            "discovery pipeline",
            vec![AgentGroupEntry::new(DISCOVERY), AgentGroupEntry::new(SINK)],
        ),
        vec![Asset::domain("example.com"), Asset::domain("ostorlab.co")],
    )
}

#[tokio::test(start_paused = true)]
async fn test_assets_flow_through_agents_until_idle() {
    let mut config = base_config();
    config.spec.completion.quiescence_secs = Some(2);
    let pipeline = pipeline(config, None);

    let report = pipeline
        .orchestrator
        .run(request(), RunContext::new(ScanId::new()))
        .await
        .unwrap();
    pipeline.agents.cancel();

    assert_eq!(report.completion, Some(CompletionReason::Quiescent));

    let mut domains: Vec<String> = pipeline
        .discovered
        .lock()
        .iter()
        .map(|m| m.data["name"].as_str().unwrap().to_string())
        .collect();
    domains.sort();
    assert_eq!(domains, vec!["example.com", "ostorlab.co"]);

    let sunk = pipeline.sunk.lock().clone();
    assert_eq!(sunk.len(), 2);
    assert!(sunk.iter().all(|m| m.selector == FINGERPRINT_LIBRARY_SELECTOR));
    assert!(sunk.iter().all(|m| m.data["library_name"] == json!("nginx")));

    assert!(pipeline.runtime.running_services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sink_spans_are_children_of_discovery_emits() {
    let mut config = base_config();
    config.spec.completion.quiescence_secs = Some(2);
    let pipeline = pipeline(config, None);

    pipeline
        .orchestrator
        .run(request(), RunContext::new(ScanId::new()))
        .await
        .unwrap();
    pipeline.agents.cancel();

    let emits: Vec<TraceContext> = pipeline
        .spans
        .named(EMIT_SPAN)
        .iter()
        .map(|s| s.context)
        .collect();
    assert_eq!(emits.len(), 2);

    let sink_processes: Vec<_> = pipeline
        .spans
        .named(PROCESS_SPAN)
        .into_iter()
        .filter(|s| s.attribute("agent.name") == Some(SINK))
        .collect();
    assert_eq!(sink_processes.len(), 2);
    for span in sink_processes {
        let parent = span.parent.unwrap();
        assert!(parent.remote);
        assert!(emits
            .iter()
            .any(|e| e.trace_id == parent.trace_id && e.span_id == parent.span_id));
    }
}

#[tokio::test(start_paused = true)]
async fn test_agent_completion_signal_ends_scan() {
    let mut config = base_config();
    config.spec.completion.quiescence_secs = None;
    let pipeline = pipeline(config, Some(2));

    let report = pipeline
        .orchestrator
        .run(request(), RunContext::new(ScanId::new()))
        .await
        .unwrap();
    pipeline.agents.cancel();

    assert_eq!(report.completion, Some(CompletionReason::Signalled));
    assert_eq!(pipeline.sunk.lock().len(), 2);
}
