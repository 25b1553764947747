// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) that tunes the
// local scan engine:
// - container runtime connection and pull retries
// - broker and coordination store images and health polling
// - completion policy (quiescence window, completion signal, timeout)
// - agent registry sources
// - trace collector

use crate::domain::trace::CollectorUrl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "scanweave.io/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level orchestrator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// API version (must be "scanweave.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: OrchestratorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSpec {
    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default = "BackingServiceConfig::broker_default")]
    pub broker: BackingServiceConfig,

    #[serde(default = "BackingServiceConfig::store_default")]
    pub store: BackingServiceConfig,

    #[serde(default)]
    pub completion: CompletionPolicy,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub tracing: TracingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Docker daemon socket; auto-detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,

    /// Prefix for per-scan network names.
    #[serde(default = "default_network_prefix")]
    pub network_prefix: String,

    /// Attempts per image pull when the failure is transient.
    #[serde(default = "default_pull_attempts")]
    pub pull_attempts: u32,

    #[serde(default = "default_pull_backoff_ms")]
    pub pull_backoff_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_socket: None,
            network_prefix: default_network_prefix(),
            pull_attempts: default_pull_attempts(),
            pull_backoff_ms: default_pull_backoff_ms(),
        }
    }
}

/// Fixed-interval, fixed-ceiling health polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl HealthPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: 30,
        }
    }
}

/// Broker or coordination store container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackingServiceConfig {
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub health: HealthPolicy,
}

impl BackingServiceConfig {
    pub fn broker_default() -> Self {
        Self {
            image: "redis:7-alpine".to_string(),
            port: 6379,
            health: HealthPolicy::default(),
        }
    }

    pub fn store_default() -> Self {
        Self {
            image: "redis:7-alpine".to_string(),
            port: 6379,
            health: HealthPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutOutcome {
    Completed,
    Failed,
}

/// Terminal conditions for a running scan. Whichever fires first wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPolicy {
    /// Complete once the fabric has been empty and idle this long.
    /// `None` disables quiescence detection.
    #[serde(default = "default_quiescence_secs")]
    pub quiescence_secs: Option<u64>,

    /// Complete when an agent sets the scan's completion flag.
    #[serde(default = "default_true")]
    pub completion_signal: bool,

    /// Wall-clock ceiling for the running phase.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_timeout_outcome")]
    pub timeout_outcome: TimeoutOutcome,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl CompletionPolicy {
    pub fn quiescence_window(&self) -> Option<Duration> {
        self.quiescence_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            quiescence_secs: default_quiescence_secs(),
            completion_signal: true,
            timeout_secs: default_timeout_secs(),
            timeout_outcome: default_timeout_outcome(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Directory of agent definition YAML files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions_dir: Option<PathBuf>,

    /// Base URL of a remote agent registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracingSettings {
    /// `jaeger:host:port`, `gcp:project:credentials` or `file:path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_url: Option<String>,
}

fn default_network_prefix() -> String {
    "scanweave".to_string()
}

fn default_pull_attempts() -> u32 {
    3
}

fn default_pull_backoff_ms() -> u64 {
    2000
}

fn default_quiescence_secs() -> Option<u64> {
    Some(30)
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_timeout_outcome() -> TimeoutOutcome {
    TimeoutOutcome::Failed
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ConfigMetadata {
                name: "local".to_string(),
                labels: None,
            },
            spec: OrchestratorSpec::default(),
        }
    }
}

impl Default for OrchestratorSpec {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings::default(),
            broker: BackingServiceConfig::broker_default(),
            store: BackingServiceConfig::store_default(),
            completion: CompletionPolicy::default(),
            registry: RegistrySettings::default(),
            tracing: TracingSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. SCANWEAVE_CONFIG_PATH environment variable
    /// 2. ./scanweave-config.yaml (working directory)
    /// 3. ~/.scanweave/config.yaml (user home)
    /// 4. /etc/scanweave/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SCANWEAVE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./scanweave-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".scanweave").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/scanweave/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("SCANWEAVE_DOCKER_SOCKET") {
            tracing::info!("Environment override: SCANWEAVE_DOCKER_SOCKET={}", socket);
            self.spec.runtime.docker_socket = Some(socket);
        }
        if let Some(url) = lookup("SCANWEAVE_TRACING_COLLECTOR_URL") {
            tracing::info!("Environment override: SCANWEAVE_TRACING_COLLECTOR_URL={}", url);
            self.spec.tracing.collector_url = Some(url);
        }
        if let Some(url) = lookup("SCANWEAVE_REGISTRY_URL") {
            tracing::info!("Environment override: SCANWEAVE_REGISTRY_URL={}", url);
            self.spec.registry.url = Some(url);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        for (section, service) in [("broker", &self.spec.broker), ("store", &self.spec.store)] {
            if service.image.is_empty() {
                anyhow::bail!("spec.{}.image cannot be empty", section);
            }
            if service.health.max_attempts == 0 {
                anyhow::bail!("spec.{}.health.max_attempts must be at least 1", section);
            }
        }

        if self.spec.runtime.pull_attempts == 0 {
            anyhow::bail!("spec.runtime.pull_attempts must be at least 1");
        }

        if self.spec.completion.poll_interval_ms == 0 {
            anyhow::bail!("spec.completion.poll_interval_ms must be greater than 0");
        }

        if let Some(url) = &self.spec.tracing.collector_url {
            CollectorUrl::parse(url)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spec.broker.image, "redis:7-alpine");
        assert_eq!(config.spec.completion.timeout_outcome, TimeoutOutcome::Failed);
    }

    #[test]
    fn test_yaml_parsing_with_defaults() {
        let yaml = r#"
apiVersion: scanweave.io/v1
kind: OrchestratorConfig
metadata:
  name: ci
spec:
  completion:
    quiescence_secs: 10
    timeout_secs: 120
    timeout_outcome: completed
  tracing:
    collector_url: "file:/tmp/spans.jsonl"
"#;
        let config = OrchestratorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "ci");
        assert_eq!(config.spec.completion.quiescence_window(), Some(Duration::from_secs(10)));
        assert_eq!(config.spec.completion.timeout_outcome, TimeoutOutcome::Completed);
        assert!(config.spec.completion.completion_signal);
        assert_eq!(config.spec.broker.port, 6379);
        assert_eq!(config.spec.runtime.pull_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = OrchestratorConfig::default();

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.spec.broker.health.max_attempts = 0;
        assert!(config.validate().is_err());
        config.spec.broker.health.max_attempts = 5;

        config.spec.tracing.collector_url = Some("zipkin:localhost:9411".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("zipkin"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = OrchestratorConfig::default();
        config.apply_overrides_from(|name| match name {
            "SCANWEAVE_DOCKER_SOCKET" => Some("/tmp/docker.sock".to_string()),
            "SCANWEAVE_REGISTRY_URL" => Some("https://registry.local".to_string()),
            _ => None,
        });
        assert_eq!(config.spec.runtime.docker_socket.as_deref(), Some("/tmp/docker.sock"));
        assert_eq!(config.spec.registry.url.as_deref(), Some("https://registry.local"));
        assert!(config.spec.tracing.collector_url.is_none());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "apiVersion: scanweave.io/v1\nkind: OrchestratorConfig\nmetadata:\n  name: file\n",
        )
        .unwrap();
        let config = OrchestratorConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(config.metadata.name, "file");

        let missing = dir.path().join("missing.yaml");
        assert!(OrchestratorConfig::load_or_default(Some(missing)).is_err());
    }
}
