// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Process and emit pipelines.
//
// Each pipeline is a base handler wrapped by zero or more layers. A layer
// takes the next handler and returns a handler that calls through to it;
// the first layer in the list ends up outermost.

use crate::agent::{Agent, AgentContext, Message};
use crate::error::AgentError;
use async_trait::async_trait;
use scanweave_core::domain::bus::MessageBus;
use scanweave_core::domain::message::{Envelope, MessageId};
use scanweave_core::domain::trace::{correlation_of, TraceContext};
use scanweave_core::wire::SchemaRegistry;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A message on its way out, before its id is fixed.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub selector: String,
    pub data: serde_json::Value,
    /// Caller-supplied correlation; a uuid is generated when absent.
    pub correlation: Option<String>,
    /// Context current at the emit call.
    pub parent: Option<TraceContext>,
    /// Context to encode into the message id.
    pub trace: Option<TraceContext>,
}

impl Outgoing {
    pub fn new(selector: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            selector: selector.into(),
            data,
            correlation: None,
            parent: None,
            trace: None,
        }
    }
}

#[async_trait]
pub trait ProcessHandler: Send + Sync {
    async fn process(&self, ctx: &mut AgentContext, message: Message) -> Result<(), AgentError>;
}

#[async_trait]
pub trait EmitHandler: Send + Sync {
    async fn emit(&self, outgoing: Outgoing) -> Result<MessageId, AgentError>;
}

pub trait ProcessLayer: Send + Sync {
    fn wrap(&self, next: Arc<dyn ProcessHandler>) -> Arc<dyn ProcessHandler>;
}

pub trait EmitLayer: Send + Sync {
    fn wrap(&self, next: Arc<dyn EmitHandler>) -> Arc<dyn EmitHandler>;
}

pub fn compose_process(
    base: Arc<dyn ProcessHandler>,
    layers: &[Arc<dyn ProcessLayer>],
) -> Arc<dyn ProcessHandler> {
    layers.iter().rev().fold(base, |next, layer| layer.wrap(next))
}

pub fn compose_emit(base: Arc<dyn EmitHandler>, layers: &[Arc<dyn EmitLayer>]) -> Arc<dyn EmitHandler> {
    layers.iter().rev().fold(base, |next, layer| layer.wrap(next))
}

/// Hands the message to the agent.
pub struct AgentProcess {
    agent: Arc<dyn Agent>,
}

impl AgentProcess {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ProcessHandler for AgentProcess {
    async fn process(&self, ctx: &mut AgentContext, message: Message) -> Result<(), AgentError> {
        self.agent.process(ctx, message).await
    }
}

/// Encodes per the topic's schema and publishes on the fabric.
pub struct BusEmitter {
    bus: Arc<dyn MessageBus>,
    schemas: Arc<SchemaRegistry>,
}

impl BusEmitter {
    pub fn new(bus: Arc<dyn MessageBus>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { bus, schemas }
    }
}

const UUID_LEN: usize = 36;

/// A hyphenated uuid, optionally followed by `-{trace_id}-{span_id}` as
/// found on incoming message ids.
fn is_correlation(correlation: &str) -> bool {
    let Some(base) = correlation.get(..UUID_LEN) else {
        return false;
    };
    if Uuid::try_parse(base).is_err() {
        return false;
    }
    let rest = &correlation[UUID_LEN..];
    if rest.is_empty() {
        return true;
    }
    let mut segments = rest.split('-');
    matches!(
        (segments.next(), segments.next(), segments.next(), segments.next()),
        (Some(""), Some(trace), Some(span), None)
            if trace.parse::<u128>().is_ok() && span.parse::<u64>().is_ok()
    )
}

/// The id segment of an outgoing topic: the correlation, followed by the
/// trace ids when a context is attached. Trace ids already on the
/// correlation are replaced by the attached context.
pub fn outgoing_id(correlation: Option<&str>, trace: Option<TraceContext>) -> Result<MessageId, AgentError> {
    let correlation = match correlation {
        Some(c) if !is_correlation(c) => return Err(AgentError::InvalidCorrelation(c.to_string())),
        Some(c) => c.to_string(),
        None => MessageId::generate().into_inner(),
    };
    Ok(match trace {
        Some(trace) => trace.append_to(correlation_of(&correlation)),
        None => MessageId::new(correlation),
    })
}

#[async_trait]
impl EmitHandler for BusEmitter {
    async fn emit(&self, outgoing: Outgoing) -> Result<MessageId, AgentError> {
        let id = outgoing_id(outgoing.correlation.as_deref(), outgoing.trace)?;
        let payload = self
            .schemas
            .encode(&outgoing.selector, &outgoing.data)
            .map_err(|e| AgentError::Encode {
                selector: outgoing.selector.clone(),
                source: e,
            })?;

        let envelope = Envelope::new(&outgoing.selector, &id, payload);
        let routed = self.bus.publish(envelope).await?;
        if routed == 0 {
            warn!("No queue is bound to {}", outgoing.selector);
        } else {
            debug!("Emitted {} to {} queue(s)", outgoing.selector, routed);
        }
        Ok(id)
    }
}
