// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Registry Clients
//!
//! - [`StaticAgentRegistry`]: records built from local agent definitions,
//!   typically a definitions directory.
//! - [`HttpAgentRegistry`]: `GET {base}/agents/{key}` against a remote
//!   catalogue returning
//!   `{key, dockerLocation, versions: {versions: [{version}]}, definition}`.

use crate::domain::agent::{AgentDefinition, AgentKey};
use crate::domain::config::RegistrySettings;
use crate::domain::registry::{AgentRecord, AgentRegistry, RegistryError};
use crate::domain::runtime::ImageRef;
use crate::infrastructure::definition_parser::{DefinitionParser, ParseError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry selected by configuration: the remote catalogue when a URL is
/// set, otherwise the definitions directory, otherwise an empty registry.
pub fn registry_from_settings(
    settings: &RegistrySettings,
) -> Result<Arc<dyn AgentRegistry>, ParseError> {
    if let Some(url) = &settings.url {
        info!("Using agent registry at {}", url);
        return Ok(Arc::new(HttpAgentRegistry::new(url.clone())));
    }
    match &settings.definitions_dir {
        Some(dir) => {
            let registry = StaticAgentRegistry::from_dir(dir)?;
            info!("Loaded {} agent definitions from {}", registry.len(), dir.display());
            Ok(Arc::new(registry))
        }
        None => Ok(Arc::new(StaticAgentRegistry::new())),
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticAgentRegistry {
    records: HashMap<AgentKey, AgentRecord>,
}

impl StaticAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One record per definition. The image repository becomes the docker
    /// location and the definition version the only published version.
    pub fn from_definitions(definitions: impl IntoIterator<Item = AgentDefinition>) -> Self {
        let mut registry = Self::new();
        for definition in definitions {
            registry.insert_definition(definition);
        }
        registry
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ParseError> {
        Ok(Self::from_definitions(DefinitionParser::load_dir(dir)?))
    }

    pub fn insert_definition(&mut self, definition: AgentDefinition) {
        let key = definition.key();
        let record = AgentRecord {
            key: key.clone(),
            docker_location: Some(ImageRef::parse(&definition.image).repository),
            versions: definition.version.iter().cloned().collect(),
            definition: Some(definition),
        };
        self.records.insert(key, record);
    }

    pub fn insert(&mut self, record: AgentRecord) {
        self.records.insert(record.key.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AgentRegistry for StaticAgentRegistry {
    async fn lookup(&self, key: &AgentKey) -> Result<AgentRecord, RegistryError> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }
}

// Wire shape of the remote catalogue.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAgent {
    key: String,
    #[serde(default)]
    docker_location: Option<String>,
    #[serde(default)]
    versions: Option<RemoteVersions>,
    #[serde(default)]
    definition: Option<AgentDefinition>,
}

#[derive(Debug, Deserialize)]
struct RemoteVersions {
    #[serde(default)]
    versions: Vec<RemoteVersion>,
}

#[derive(Debug, Deserialize)]
struct RemoteVersion {
    version: String,
}

impl From<RemoteAgent> for AgentRecord {
    fn from(remote: RemoteAgent) -> Self {
        AgentRecord {
            key: AgentKey::new(remote.key),
            docker_location: remote.docker_location.filter(|l| !l.is_empty()),
            versions: remote
                .versions
                .map(|v| v.versions.into_iter().map(|v| v.version).collect())
                .unwrap_or_default(),
            definition: remote.definition,
        }
    }
}

pub struct HttpAgentRegistry {
    base_url: String,
    client: Client,
}

impl HttpAgentRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl AgentRegistry for HttpAgentRegistry {
    async fn lookup(&self, key: &AgentKey) -> Result<AgentRecord, RegistryError> {
        let url = format!("{}/agents/{}", self.base_url, key);
        debug!("Looking up {} at {}", key, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(key.clone()));
        }
        if !response.status().is_success() {
            return Err(RegistryError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let body: Option<RemoteAgent> = response
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(key.clone(), e.to_string()))?;
        body.map(AgentRecord::from)
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_registry_from_definitions() {
        let yaml = r#"
name: nmap
key: agent/org/nmap
version: 1.2.0
image: registry.local:5000/agents/nmap:latest
source: https://github.com/org/agent_nmap
durability: published
restrictions: []
in_selectors: [v3.asset.ip]
out_selectors: []
restart_policy: any
args: []
"#;
        let definition = DefinitionParser::parse_agent(yaml).unwrap();
        let registry = StaticAgentRegistry::from_definitions(vec![definition]);

        let record = registry.lookup(&AgentKey::new("agent/org/nmap")).await.unwrap();
        assert_eq!(record.docker_location.as_deref(), Some("registry.local:5000/agents/nmap"));
        assert_eq!(record.versions, vec!["1.2.0"]);

        let missing = registry.lookup(&AgentKey::new("agent/org/none")).await;
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_registry_from_settings_prefers_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/agents/agent/org/nmap")
            .with_status(404)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();

        let settings = RegistrySettings {
            definitions_dir: Some(dir.path().to_path_buf()),
            url: Some(server.url()),
        };
        let registry = registry_from_settings(&settings).unwrap();

        assert!(matches!(
            registry.lookup(&AgentKey::new("agent/org/nmap")).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_registry_from_settings_missing_dir() {
        let settings = RegistrySettings {
            definitions_dir: Some("/nonexistent/scanweave/agents".into()),
            url: None,
        };
        assert!(registry_from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn test_http_registry_parses_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/agents/agent/org/nmap")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "key": "agent/org/nmap",
                    "dockerLocation": "registry.example.com/agents/nmap",
                    "versions": {"versions": [{"version": "2.0.0"}, {"version": "1.0.0"}]},
                    "definition": null
                }"#,
            )
            .create_async()
            .await;

        let registry = HttpAgentRegistry::new(format!("{}/", server.url()));
        let record = registry.lookup(&AgentKey::new("agent/org/nmap")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(record.docker_location.as_deref(), Some("registry.example.com/agents/nmap"));
        assert_eq!(record.resolve_version(None), Ok("2.0.0".to_string()));
        assert!(record.definition.is_none());
    }

    #[tokio::test]
    async fn test_http_registry_null_location() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/agents/agent/org/draft")
            .with_status(200)
            .with_body(r#"{"key": "agent/org/draft", "dockerLocation": null, "versions": null}"#)
            .create_async()
            .await;

        let registry = HttpAgentRegistry::new(server.url());
        let record = registry.lookup(&AgentKey::new("agent/org/draft")).await.unwrap();
        assert!(record.docker_location.is_none());
        assert!(record.versions.is_empty());
    }

    #[tokio::test]
    async fn test_http_registry_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/agents/agent/org/ghost")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/agents/agent/org/null")
            .with_status(200)
            .with_body("null")
            .create_async()
            .await;

        let registry = HttpAgentRegistry::new(server.url());
        assert!(matches!(
            registry.lookup(&AgentKey::new("agent/org/ghost")).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.lookup(&AgentKey::new("agent/org/null")).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_http_registry_server_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/agents/agent/org/nmap")
            .with_status(503)
            .create_async()
            .await;

        let registry = HttpAgentRegistry::new(server.url());
        assert!(matches!(
            registry.lookup(&AgentKey::new("agent/org/nmap")).await,
            Err(RegistryError::Transport(_))
        ));
    }
}
