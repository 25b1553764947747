// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Definition and Agent Group YAML Parser
//!
//! Translates the YAML documents shipped next to agent images, and the
//! group files passed to `scanweave scan run`, into domain objects.
//!
//! # Agent definition
//!
//! ```yaml
//! kind: Agent
//! name: nmap
//! image: images/agents/nmap:latest
//! source: https://github.com/org/agent_nmap
//! durability: published
//! restrictions: []
//! in_selectors: [v3.asset.ip]
//! out_selectors: [v3.report.vulnerability]
//! restart_policy: on-failure
//! args:
//!   - name: ports
//!     type: string
//! mem_limit: 1073741824
//! ```
//!
//! # Agent group
//!
//! ```yaml
//! kind: AgentGroup
//! description: Network discovery
//! agents:
//!   - key: agent/org/nmap
//!     replicas: 2
//!     args:
//!       - name: ports
//!         type: string
//!         value: "1-1024"
//! ```

use crate::domain::agent::{AgentDefinition, AgentGroup};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Expected kind '{expected}', found '{found}'")]
    WrongKind { expected: &'static str, found: String },
    #[error("Validation failed: {0}")]
    Invalid(String),
}

/// Only the discriminator, read before the full document.
#[derive(Deserialize)]
struct KindHeader {
    #[serde(default)]
    kind: Option<String>,
}

fn read(path: &Path) -> Result<String, ParseError> {
    std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub struct DefinitionParser;

impl DefinitionParser {
    /// `kind` is optional on agent definitions; when present it must be
    /// `Agent`.
    pub fn parse_agent(yaml: &str) -> Result<AgentDefinition, ParseError> {
        let header: KindHeader = serde_yaml::from_str(yaml)?;
        if let Some(kind) = header.kind {
            if kind != "Agent" {
                return Err(ParseError::WrongKind {
                    expected: "Agent",
                    found: kind,
                });
            }
        }
        let definition: AgentDefinition = serde_yaml::from_str(yaml)?;
        definition.validate().map_err(ParseError::Invalid)?;
        Ok(definition)
    }

    pub fn parse_agent_file(path: impl AsRef<Path>) -> Result<AgentDefinition, ParseError> {
        Self::parse_agent(&read(path.as_ref())?)
    }

    pub fn parse_group(yaml: &str) -> Result<AgentGroup, ParseError> {
        let header: KindHeader = serde_yaml::from_str(yaml)?;
        match header.kind.as_deref() {
            Some("AgentGroup") => {}
            other => {
                return Err(ParseError::WrongKind {
                    expected: "AgentGroup",
                    found: other.unwrap_or("<missing>").to_string(),
                })
            }
        }
        let group: AgentGroup = serde_yaml::from_str(yaml)?;
        group.validate().map_err(ParseError::Invalid)?;
        Ok(group)
    }

    pub fn parse_group_file(path: impl AsRef<Path>) -> Result<AgentGroup, ParseError> {
        Self::parse_group(&read(path.as_ref())?)
    }

    /// Every `*.yaml` / `*.yml` agent definition directly inside `dir`,
    /// sorted by file name.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<AgentDefinition>, ParseError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ParseError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml") | Some("yml")
                    )
            })
            .collect();
        paths.sort();

        paths.iter().map(Self::parse_agent_file).collect()
    }
}
