// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::error::AgentError;
use crate::pipeline::{EmitHandler, Outgoing};
use async_trait::async_trait;
use scanweave_core::domain::agent::{AgentDefinition, AgentKey};
use scanweave_core::domain::message::{split_topic, MessageId};
use scanweave_core::domain::settings::AgentSettings;
use scanweave_core::domain::store::{completion_key, CoordinationStore};
use scanweave_core::domain::trace::TraceContext;
use std::sync::Arc;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic without its identity segment.
    pub selector: String,
    pub message_id: Option<MessageId>,
    pub data: serde_json::Value,
}

impl Message {
    pub fn from_topic(topic: &str, data: serde_json::Value) -> Self {
        let (selector, message_id) = split_topic(topic);
        Self {
            selector: selector.to_string(),
            message_id,
            data,
        }
    }
}

/// Agent behaviour. One message is processed at a time per agent process.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Runs once before the first message is consumed.
    async fn start(&self, _ctx: &mut AgentContext) -> Result<(), AgentError> {
        Ok(())
    }

    async fn process(&self, ctx: &mut AgentContext, message: Message) -> Result<(), AgentError>;
}

/// Per-message handle an agent uses to emit and reach shared state.
pub struct AgentContext {
    settings: Arc<AgentSettings>,
    store: Arc<dyn CoordinationStore>,
    emitter: Arc<dyn EmitHandler>,
    trace: Option<TraceContext>,
}

impl AgentContext {
    pub fn new(
        settings: Arc<AgentSettings>,
        store: Arc<dyn CoordinationStore>,
        emitter: Arc<dyn EmitHandler>,
    ) -> Self {
        Self {
            settings,
            store,
            emitter,
            trace: None,
        }
    }

    pub fn key(&self) -> AgentKey {
        self.settings.definition.key()
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.settings.definition
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.settings.arg(name)
    }

    pub fn store(&self) -> &dyn CoordinationStore {
        self.store.as_ref()
    }

    /// Trace context of the span currently open, if tracing is active.
    pub fn trace(&self) -> Option<TraceContext> {
        self.trace
    }

    pub(crate) fn replace_trace(&mut self, trace: Option<TraceContext>) -> Option<TraceContext> {
        std::mem::replace(&mut self.trace, trace)
    }

    /// Publishes `data` on `selector` under a fresh correlation id.
    pub async fn emit(&self, selector: &str, data: serde_json::Value) -> Result<MessageId, AgentError> {
        self.emit_with_correlation(selector, data, None).await
    }

    /// Publishes `data` on `selector`. `selector` must be one of the
    /// agent's declared `out_selectors`.
    pub async fn emit_with_correlation(
        &self,
        selector: &str,
        data: serde_json::Value,
        correlation: Option<String>,
    ) -> Result<MessageId, AgentError> {
        if !self.settings.definition.may_emit(selector) {
            return Err(AgentError::SelectorNotPermitted {
                agent: self.key().to_string(),
                selector: selector.to_string(),
            });
        }
        let mut outgoing = Outgoing::new(selector, data);
        outgoing.correlation = correlation;
        outgoing.parent = self.trace;
        self.emitter.emit(outgoing).await
    }

    /// Marks the scan complete for the orchestrator.
    pub async fn signal_completion(&self) -> Result<(), AgentError> {
        self.store
            .set_flag(&completion_key(&self.settings.scan_id))
            .await?;
        Ok(())
    }
}
