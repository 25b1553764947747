// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent registry boundary: resolves an agent key to its published image
//! location, versions and definition.

use crate::domain::agent::{AgentDefinition, AgentKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub key: AgentKey,

    /// Remote repository the image is pulled from. `None` until the agent
    /// has been built and published.
    pub docker_location: Option<String>,

    /// Published versions, newest first.
    pub versions: Vec<String>,

    pub definition: Option<AgentDefinition>,
}

impl AgentRecord {
    /// `version` if given, else the newest published one. An explicit
    /// version must be listed, unless the registry lists none.
    pub fn resolve_version(&self, version: Option<&str>) -> Result<String, VersionError> {
        match version {
            Some(v) if self.versions.is_empty() || self.versions.iter().any(|p| p == v) => {
                Ok(v.to_string())
            }
            Some(v) => Err(VersionError::Unpublished(v.to_string())),
            None => self.versions.first().cloned().ok_or(VersionError::NonePublished),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("no published version")]
    NonePublished,
    #[error("version {0} is not published")]
    Unpublished(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent {0} not found")]
    NotFound(AgentKey),
    #[error("Registry request failed: {0}")]
    Transport(String),
    #[error("Malformed registry response for {0}: {1}")]
    Malformed(AgentKey, String),
}

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn lookup(&self, key: &AgentKey) -> Result<AgentRecord, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_version_defaults_to_newest() {
        let record = AgentRecord {
            key: AgentKey::new("agent/org/nmap"),
            docker_location: Some("registry/nmap".into()),
            versions: vec!["2.0.0".into(), "1.0.0".into()],
            definition: None,
        };
        assert_eq!(record.resolve_version(None), Ok("2.0.0".to_string()));
        assert_eq!(record.resolve_version(Some("1.0.0")), Ok("1.0.0".to_string()));

        let empty = AgentRecord {
            versions: vec![],
            ..record
        };
        assert_eq!(empty.resolve_version(None), Err(VersionError::NonePublished));
    }

    #[test]
    fn test_explicit_version_must_be_published() {
        let record = AgentRecord {
            key: AgentKey::new("agent/org/nmap"),
            docker_location: Some("registry/nmap".into()),
            versions: vec!["2.0.0".into(), "1.0.0".into()],
            definition: None,
        };
        assert_eq!(
            record.resolve_version(Some("9.9.9")),
            Err(VersionError::Unpublished("9.9.9".to_string()))
        );

        let unlisted = AgentRecord {
            versions: vec![],
            ..record
        };
        assert_eq!(unlisted.resolve_version(Some("9.9.9")), Ok("9.9.9".to_string()));
    }
}
