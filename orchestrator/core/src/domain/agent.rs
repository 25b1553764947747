// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Definitions and Agent Groups
//!
//! An [`AgentDefinition`] describes a single deployable scanning agent: its
//! image, the topics it consumes (`in_selectors`) and produces
//! (`out_selectors`), and how the container runtime should treat it.
//!
//! An [`AgentGroup`] is a named pipeline topology. It never lists edges
//! explicitly; the pipeline emerges from overlap between one agent's
//! `out_selectors` and another agent's `in_selectors`.
//!
//! Both types are immutable once a scan starts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical agent identity, e.g. `agent/ostorlab/nmap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentKey(String);

impl AgentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local image name derived from the key: lower-cased with path
    /// separators replaced by underscores (`agent/Org/Name` → `agent_org_name`).
    pub fn image_name(&self) -> String {
        image_name_from_key(&self.0)
    }

    /// Last path segment of the key, used as the human-readable agent name.
    pub fn short_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub fn image_name_from_key(key: &str) -> String {
    key.replace('/', "_").to_lowercase()
}

/// Container restart semantics requested by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Always restart.
    Any,
    /// Restart only after a non-zero exit.
    OnFailure,
    /// Never restart.
    None,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Any
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Temporary,
    Development,
    Published,
}

/// Declared agent parameter: a name and a JSON-schema type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentArg {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Concrete argument value supplied by an agent group entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgValue {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,

    /// Registry key. Definitions loaded from disk may omit it, in which
    /// case [`AgentDefinition::key`] falls back to `agent/{name}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<AgentKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub image: String,
    pub source: String,
    pub durability: Durability,
    pub restrictions: Vec<String>,
    pub in_selectors: Vec<String>,
    pub out_selectors: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub args: Vec<AgentArg>,

    #[serde(default)]
    pub constraints: Vec<String>,

    #[serde(default)]
    pub mounts: Vec<String>,

    /// Memory ceiling in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<u64>,
}

impl AgentDefinition {
    pub fn key(&self) -> AgentKey {
        self.key
            .clone()
            .unwrap_or_else(|| AgentKey::new(format!("agent/{}", self.name)))
    }

    /// Schema-level validation: required strings non-empty, selectors
    /// well-formed, args named.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.name.len() > 2048 {
            return Err("name exceeds 2048 characters".to_string());
        }
        if self.image.trim().is_empty() {
            return Err(format!("agent '{}': image cannot be empty", self.name));
        }
        if !(self.source.starts_with("http://") || self.source.starts_with("https://")) {
            return Err(format!(
                "agent '{}': source must be an http(s) URL, got '{}'",
                self.name, self.source
            ));
        }
        for selector in self.in_selectors.iter().chain(self.out_selectors.iter()) {
            crate::domain::message::validate_selector(selector)
                .map_err(|e| format!("agent '{}': {}", self.name, e))?;
        }
        for arg in &self.args {
            if arg.name.is_empty() || arg.arg_type.is_empty() {
                return Err(format!(
                    "agent '{}': every argument requires a name and a type",
                    self.name
                ));
            }
        }
        Ok(())
    }

    /// Whether `selector` is one of the declared output topics.
    pub fn may_emit(&self, selector: &str) -> bool {
        self.out_selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentGroupKind {
    AgentGroup,
}

/// One agent in a group: a definition reference, concrete args and a
/// replica count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGroupEntry {
    pub key: AgentKey,

    #[serde(default)]
    pub args: Vec<ArgValue>,

    /// Signed so that negative counts survive parsing and are rejected by
    /// [`AgentGroup::validate`] with a descriptive message.
    #[serde(default = "default_replicas")]
    pub replicas: i64,

    /// Registry version to install; the latest published one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn default_replicas() -> i64 {
    1
}

impl AgentGroupEntry {
    pub fn new(key: impl Into<AgentKey>) -> Self {
        Self {
            key: key.into(),
            args: Vec::new(),
            replicas: default_replicas(),
            version: None,
        }
    }

    pub fn with_replicas(mut self, replicas: i64) -> Self {
        self.replicas = replicas;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGroup {
    pub kind: AgentGroupKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub description: String,
    pub agents: Vec<AgentGroupEntry>,
}

impl AgentGroup {
    pub fn new(description: impl Into<String>, agents: Vec<AgentGroupEntry>) -> Self {
        Self {
            kind: AgentGroupKind::AgentGroup,
            name: None,
            description: description.into(),
            agents,
        }
    }

    /// Rejects empty keys and negative replica counts. Runs before any
    /// infrastructure is provisioned.
    pub fn validate(&self) -> Result<(), String> {
        for entry in &self.agents {
            if entry.key.as_str().trim().is_empty() {
                return Err("agent group entry has an empty key".to_string());
            }
            if entry.replicas < 0 {
                return Err(format!(
                    "Invalid replica count for '{}': {} is not in the range x>=0",
                    entry.key, entry.replicas
                ));
            }
            for arg in &entry.args {
                if arg.name.is_empty() || arg.arg_type.is_empty() {
                    return Err(format!(
                        "agent '{}': every argument requires a name and a type",
                        entry.key
                    ));
                }
            }
        }
        Ok(())
    }

    /// Total number of agent containers the group will produce.
    pub fn total_replicas(&self) -> i64 {
        self.agents.iter().map(|a| a.replicas.max(0)).sum()
    }
}
