// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trace Propagation
//!
//! Tracing is a pair of pipeline layers. Without a collector they are not
//! installed and process/emit run untouched.
//!
//! - [`TraceProcessLayer`] parents a `process_message` span on the context
//!   carried in the incoming message id and makes it the current context
//!   for the duration of the agent's handler.
//! - [`TraceEmitLayer`] opens an `emit_message` span under the current
//!   context and writes that span's ids into the outgoing message id, so
//!   the receiving agent's `process_message` becomes its child.

mod local;
mod otel;

pub use local::{FileSpanFactory, RecordingSpanFactory, SpanRecord};
pub use otel::OtelSpanFactory;

use crate::agent::{AgentContext, Message};
use crate::error::AgentError;
use crate::minify;
use crate::pipeline::{EmitHandler, EmitLayer, Outgoing, ProcessHandler, ProcessLayer};
use crate::telemetry::TelemetryError;
use async_trait::async_trait;
use scanweave_core::domain::message::MessageId;
use scanweave_core::domain::trace::TraceContext;
use scanweave_core::wire::SchemaRegistry;
use std::sync::Arc;

pub const PROCESS_SPAN: &str = "process_message";
pub const EMIT_SPAN: &str = "emit_message";

pub trait SpanFactory: Send + Sync {
    /// Starts a span under `parent`, or a new trace when there is none.
    fn start_span(&self, name: &'static str, parent: Option<TraceContext>) -> Box<dyn ActiveSpan>;

    fn flush(&self) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        self.flush()
    }
}

pub trait ActiveSpan: Send {
    fn context(&self) -> TraceContext;
    fn set_attribute(&mut self, key: &'static str, value: String);
    fn record_error(&mut self, message: &str);
    fn end(self: Box<Self>);
}

pub struct TraceProcessLayer {
    factory: Arc<dyn SpanFactory>,
    agent_name: String,
    schemas: Arc<SchemaRegistry>,
}

impl TraceProcessLayer {
    pub fn new(factory: Arc<dyn SpanFactory>, agent_name: impl Into<String>) -> Self {
        Self {
            factory,
            agent_name: agent_name.into(),
            schemas: Arc::new(SchemaRegistry::v3()),
        }
    }

    /// Schemas used to show `bytes` fields of `message.data` as text.
    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }
}

impl ProcessLayer for TraceProcessLayer {
    fn wrap(&self, next: Arc<dyn ProcessHandler>) -> Arc<dyn ProcessHandler> {
        Arc::new(TracedProcess {
            next,
            factory: self.factory.clone(),
            agent_name: self.agent_name.clone(),
            schemas: self.schemas.clone(),
        })
    }
}

struct TracedProcess {
    next: Arc<dyn ProcessHandler>,
    factory: Arc<dyn SpanFactory>,
    agent_name: String,
    schemas: Arc<SchemaRegistry>,
}

#[async_trait]
impl ProcessHandler for TracedProcess {
    async fn process(&self, ctx: &mut AgentContext, message: Message) -> Result<(), AgentError> {
        let parent = message
            .message_id
            .as_ref()
            .and_then(|id| TraceContext::from_message_id(id.as_str()));

        let mut span = self.factory.start_span(PROCESS_SPAN, parent);
        span.set_attribute("agent.name", self.agent_name.clone());
        span.set_attribute("message.selector", message.selector.clone());
        span.set_attribute(
            "message.data",
            minify::data_attribute(&self.schemas, &message.selector, &message.data),
        );

        let previous = ctx.replace_trace(Some(span.context()));
        let result = self.next.process(ctx, message).await;
        ctx.replace_trace(previous);

        if let Err(e) = &result {
            span.record_error(&e.to_string());
        }
        span.end();
        result
    }
}

pub struct TraceEmitLayer {
    factory: Arc<dyn SpanFactory>,
    agent_name: String,
    schemas: Arc<SchemaRegistry>,
}

impl TraceEmitLayer {
    pub fn new(factory: Arc<dyn SpanFactory>, agent_name: impl Into<String>) -> Self {
        Self {
            factory,
            agent_name: agent_name.into(),
            schemas: Arc::new(SchemaRegistry::v3()),
        }
    }

    /// Schemas used to show `bytes` fields of `message.data` as text.
    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }
}

impl EmitLayer for TraceEmitLayer {
    fn wrap(&self, next: Arc<dyn EmitHandler>) -> Arc<dyn EmitHandler> {
        Arc::new(TracedEmit {
            next,
            factory: self.factory.clone(),
            agent_name: self.agent_name.clone(),
            schemas: self.schemas.clone(),
        })
    }
}

struct TracedEmit {
    next: Arc<dyn EmitHandler>,
    factory: Arc<dyn SpanFactory>,
    agent_name: String,
    schemas: Arc<SchemaRegistry>,
}

#[async_trait]
impl EmitHandler for TracedEmit {
    async fn emit(&self, mut outgoing: Outgoing) -> Result<MessageId, AgentError> {
        let mut span = self.factory.start_span(EMIT_SPAN, outgoing.parent);
        span.set_attribute("agent.name", self.agent_name.clone());
        span.set_attribute("message.selector", outgoing.selector.clone());
        span.set_attribute(
            "message.data",
            minify::data_attribute(&self.schemas, &outgoing.selector, &outgoing.data),
        );
        outgoing.trace = Some(span.context());

        let result = self.next.emit(outgoing).await;
        match &result {
            Ok(id) => span.set_attribute("message.id", id.to_string()),
            Err(e) => span.record_error(&e.to_string()),
        }
        span.end();
        result
    }
}
