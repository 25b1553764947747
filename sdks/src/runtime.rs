// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Runtime
//!
//! The consume loop of one agent process:
//!
//! ```text
//! received → decoding → processing → (emits) → acknowledged
//! ```
//!
//! A payload that fails to decode is rejected without retry. A handler error
//! is logged and the message rejected. Deliveries are processed one at a
//! time.

use crate::agent::{Agent, AgentContext, Message};
use crate::error::AgentError;
use crate::pipeline::{
    compose_emit, compose_process, AgentProcess, BusEmitter, EmitHandler, EmitLayer,
    ProcessHandler, ProcessLayer,
};
use crate::telemetry::span_factory_for;
use crate::trace::{SpanFactory, TraceEmitLayer, TraceProcessLayer};
use scanweave_core::domain::bus::{Delivery, MessageBus};
use scanweave_core::domain::message::Envelope;
use scanweave_core::domain::settings::AgentSettings;
use scanweave_core::domain::store::CoordinationStore;
use scanweave_core::infrastructure::connector::{EndpointConnector, RedisConnector};
use scanweave_core::wire::SchemaRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
}

pub struct AgentRuntimeBuilder {
    agent: Arc<dyn Agent>,
    settings: AgentSettings,
    bus: Option<Arc<dyn MessageBus>>,
    store: Option<Arc<dyn CoordinationStore>>,
    schemas: SchemaRegistry,
    span_factory: Option<Arc<dyn SpanFactory>>,
    process_layers: Vec<Arc<dyn ProcessLayer>>,
    emit_layers: Vec<Arc<dyn EmitLayer>>,
    cancel: CancellationToken,
}

impl AgentRuntimeBuilder {
    /// Uses `bus` instead of connecting to `settings.bus_url`.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Uses `store` instead of connecting to `settings.store_url`.
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Enables tracing with `factory`, regardless of the collector URL in
    /// the settings.
    pub fn with_span_factory(mut self, factory: Arc<dyn SpanFactory>) -> Self {
        self.span_factory = Some(factory);
        self
    }

    pub fn with_process_layer(mut self, layer: Arc<dyn ProcessLayer>) -> Self {
        self.process_layers.push(layer);
        self
    }

    pub fn with_emit_layer(mut self, layer: Arc<dyn EmitLayer>) -> Self {
        self.emit_layers.push(layer);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn build(self) -> Result<AgentRuntime, AgentError> {
        let bus = match self.bus {
            Some(bus) => bus,
            None => RedisConnector.bus(&self.settings.bus_url).await?,
        };
        let store = match self.store {
            Some(store) => store,
            None => RedisConnector.store(&self.settings.store_url).await?,
        };

        let agent_name = self.settings.definition.key().to_string();
        let span_factory = match (self.span_factory, &self.settings.tracing_collector_url) {
            (Some(factory), _) => Some(factory),
            (None, Some(url)) if !url.is_empty() => Some(span_factory_for(url, &agent_name)?),
            _ => None,
        };

        let schemas = Arc::new(self.schemas);
        let mut process_layers = Vec::new();
        let mut emit_layers = Vec::new();
        if let Some(factory) = &span_factory {
            process_layers.push(Arc::new(
                TraceProcessLayer::new(factory.clone(), &agent_name).with_schemas(schemas.clone()),
            ) as Arc<dyn ProcessLayer>);
            emit_layers.push(Arc::new(
                TraceEmitLayer::new(factory.clone(), &agent_name).with_schemas(schemas.clone()),
            ) as Arc<dyn EmitLayer>);
        }
        process_layers.extend(self.process_layers);
        emit_layers.extend(self.emit_layers);

        let process = compose_process(Arc::new(AgentProcess::new(self.agent.clone())), &process_layers);
        let emitter = compose_emit(Arc::new(BusEmitter::new(bus.clone(), schemas.clone())), &emit_layers);

        Ok(AgentRuntime {
            agent: self.agent,
            settings: Arc::new(self.settings),
            bus,
            store,
            schemas,
            process,
            emitter,
            span_factory,
            cancel: self.cancel,
        })
    }
}

/// Broker consumer name of a replica. Stable across container restarts so
/// a restarted replica picks up the deliveries it left unsettled.
pub fn consumer_name(replica: u32) -> String {
    format!("replica-{}", replica)
}

pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    settings: Arc<AgentSettings>,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn CoordinationStore>,
    schemas: Arc<SchemaRegistry>,
    process: Arc<dyn ProcessHandler>,
    emitter: Arc<dyn EmitHandler>,
    span_factory: Option<Arc<dyn SpanFactory>>,
    cancel: CancellationToken,
}

impl AgentRuntime {
    pub fn builder(agent: Arc<dyn Agent>, settings: AgentSettings) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            agent,
            settings,
            bus: None,
            store: None,
            schemas: SchemaRegistry::v3(),
            span_factory: None,
            process_layers: Vec::new(),
            emit_layers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a runtime from the settings in the process environment.
    pub async fn from_env(agent: Arc<dyn Agent>) -> Result<AgentRuntime, AgentError> {
        let settings = AgentSettings::from_env().map_err(|e| AgentError::Settings(e.to_string()))?;
        Self::builder(agent, settings).build().await
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A fresh context carrying no trace.
    pub fn context(&self) -> AgentContext {
        AgentContext::new(self.settings.clone(), self.store.clone(), self.emitter.clone())
    }

    /// Consumes the agent's queue until cancelled or the fabric closes.
    pub async fn run(&self) -> Result<(), AgentError> {
        let definition = &self.settings.definition;
        let mut ctx = self.context();
        self.agent.start(&mut ctx).await?;

        let mut subscription = self
            .bus
            .subscribe_as(
                &self.settings.queue,
                &consumer_name(self.settings.replica),
                &definition.in_selectors,
            )
            .await?;
        info!(
            "Agent {} consuming {} ({:?})",
            definition.key(),
            self.settings.queue,
            definition.in_selectors
        );

        loop {
            let delivery = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = subscription.recv() => match next? {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            self.handle(delivery).await;
        }

        info!("Agent {} stopped", definition.key());
        if let Some(factory) = &self.span_factory {
            if let Err(e) = factory.shutdown() {
                warn!("Failed to flush spans: {}", e);
            }
        }
        Ok(())
    }

    /// Processes one delivery and settles it.
    pub async fn handle(&self, delivery: Delivery) -> Settlement {
        let topic = delivery.envelope.topic.clone();
        if delivery.redelivered {
            debug!("Redelivery of {}", topic);
        }

        let settlement = match self.process_envelope(&delivery.envelope).await {
            Ok(()) => Settlement::Acked,
            Err(e) if e.is_permanent() => {
                warn!("Dropping {}: {}", topic, e);
                Settlement::Rejected
            }
            Err(e) => {
                error!("Agent failed on {}: {}", topic, e);
                Settlement::Rejected
            }
        };

        let settled = match settlement {
            Settlement::Acked => delivery.ack().await,
            Settlement::Rejected => delivery.reject().await,
        };
        if let Err(e) = settled {
            warn!("Failed to settle {}: {}", topic, e);
        }
        settlement
    }

    /// Decodes `envelope` and runs it through the process pipeline.
    pub async fn process_envelope(&self, envelope: &Envelope) -> Result<(), AgentError> {
        let data = self
            .schemas
            .decode(&envelope.topic, &envelope.payload)
            .map_err(|e| AgentError::Decode {
                topic: envelope.topic.clone(),
                source: e,
            })?;
        let message = Message::from_topic(&envelope.topic, data);
        let mut ctx = self.context();
        self.process.process(&mut ctx, message).await
    }
}
