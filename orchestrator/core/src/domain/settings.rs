// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Runtime settings handed to every agent container through a single JSON
//! environment variable.

use crate::domain::agent::{AgentDefinition, ArgValue};
use serde::{Deserialize, Serialize};

/// Environment variable carrying [`AgentSettings`] as JSON.
pub const AGENT_SETTINGS_ENV: &str = "SCANWEAVE_AGENT_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub scan_id: String,
    pub definition: AgentDefinition,
    pub args: Vec<ArgValue>,
    /// Queue the agent consumes from; shared by all replicas.
    pub queue: String,
    pub bus_url: String,
    pub store_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_collector_url: Option<String>,
    /// Replica index within the agent group entry.
    #[serde(default)]
    pub replica: u32,
}

impl AgentSettings {
    pub fn to_env_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_env_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }

    /// Reads the settings from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var(AGENT_SETTINGS_ENV)
            .map_err(|_| anyhow::anyhow!("{} is not set", AGENT_SETTINGS_ENV))?;
        Ok(Self::from_env_value(&raw)?)
    }

    /// Group-supplied value for argument `name`.
    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }
}
