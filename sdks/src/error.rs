// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::telemetry::TelemetryError;
use scanweave_core::domain::bus::BusError;
use scanweave_core::domain::store::StoreError;
use scanweave_core::wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Emitting on a topic the agent does not declare in `out_selectors`.
    #[error("Agent {agent} is not permitted to emit on '{selector}'")]
    SelectorNotPermitted { agent: String, selector: String },

    #[error("Invalid correlation id '{0}': expected a uuid, optionally followed by -{{trace_id}}-{{span_id}}")]
    InvalidCorrelation(String),

    #[error("Failed to decode message on {topic}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: WireError,
    },

    #[error("Failed to encode message for {selector}: {source}")]
    Encode {
        selector: String,
        #[source]
        source: WireError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Invalid agent settings: {0}")]
    Settings(String),

    /// Raised by the agent's own processing code.
    #[error("Processing failed: {0}")]
    Handler(#[from] anyhow::Error),
}

impl AgentError {
    /// Malformed input that no retry can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AgentError::Decode { .. }
                | AgentError::SelectorNotPermitted { .. }
                | AgentError::InvalidCorrelation(_)
        )
    }
}
