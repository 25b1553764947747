// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// A scan request: the agent group to run and the initial assets.
//
// The `StartAgentScan` control message is the wire form of a request. The
// orchestrator publishes it once agents are up, and agents that coordinate
// sub-scans read it back.

use crate::domain::agent::{AgentGroup, AgentGroupEntry, AgentKey, ArgValue};
use crate::domain::asset::Asset;
use crate::domain::scan::{Scan, ScanId};
use crate::wire::{file_asset, file_message, v3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid agent group: {0}")]
    InvalidGroup(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub title: Option<String>,
    pub group: AgentGroup,
    pub assets: Vec<Asset>,
}

impl ScanRequest {
    pub fn new(group: AgentGroup, assets: Vec<Asset>) -> Self {
        Self {
            title: None,
            group,
            assets,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        self.group.validate().map_err(RequestError::InvalidGroup)
    }

    /// The scan aggregate for this request, under `id`.
    pub fn into_scan(self, id: ScanId) -> Scan {
        let mut scan = Scan::new(self.group, self.assets);
        scan.id = id;
        scan.title = self.title;
        scan
    }

    /// The request a scan was started from.
    pub fn from_scan(scan: &Scan) -> Self {
        Self {
            title: scan.title.clone(),
            group: scan.group.clone(),
            assets: scan.assets.clone(),
        }
    }

    /// Group entries and file/domain/link assets. Fields the message has
    /// no slot for (IP and store assets) are left out.
    pub fn to_start_agent_scan(&self, reference_scan_id: Option<i32>) -> v3::StartAgentScan {
        let mut message = v3::StartAgentScan {
            reference_scan_id,
            key: self
                .group
                .name
                .clone()
                .unwrap_or_else(|| "agentgroup".to_string()),
            agents: self.group.agents.iter().map(agent_spec).collect(),
            ..Default::default()
        };

        for asset in &self.assets {
            match asset {
                Asset::AndroidApk(file) if message.android_apk.is_none() => {
                    message.android_apk = Some(file_message(file))
                }
                Asset::AndroidAab(file) if message.android_aab.is_none() => {
                    message.android_aab = Some(file_message(file))
                }
                Asset::IosIpa(file) if message.ios_ipa.is_none() => {
                    message.ios_ipa = Some(file_message(file))
                }
                Asset::File(file) if message.file.is_none() => message.file = Some(file_message(file)),
                Asset::DomainName { name } if message.domain_name.is_none() => {
                    message.domain_name = Some(v3::DomainName { name: name.clone() })
                }
                Asset::Link { url, method } if message.link.is_none() => {
                    message.link = Some(v3::Link {
                        url: url.clone(),
                        method: method.clone(),
                    })
                }
                _ => {}
            }
        }
        message
    }

    pub fn from_start_agent_scan(message: v3::StartAgentScan) -> Result<Self, RequestError> {
        let agents = message
            .agents
            .into_iter()
            .map(|spec| AgentGroupEntry {
                key: AgentKey::new(spec.key),
                args: spec.args.into_iter().map(arg_value).collect(),
                replicas: i64::from(spec.replicas.unwrap_or(1)),
                version: spec.version,
            })
            .collect();
        let mut group = AgentGroup::new(format!("Start agent scan {}", message.key), agents);
        group.name = Some(message.key);

        let mut assets = Vec::new();
        if let Some(file) = message.android_apk {
            assets.push(Asset::AndroidApk(file_asset(file)));
        }
        if let Some(file) = message.android_aab {
            assets.push(Asset::AndroidAab(file_asset(file)));
        }
        if let Some(file) = message.ios_ipa {
            assets.push(Asset::IosIpa(file_asset(file)));
        }
        if let Some(file) = message.file {
            assets.push(Asset::File(file_asset(file)));
        }
        if let Some(domain) = message.domain_name {
            assets.push(Asset::DomainName { name: domain.name });
        }
        if let Some(link) = message.link {
            assets.push(Asset::Link {
                url: link.url,
                method: link.method,
            });
        }

        let request = Self::new(group, assets);
        request.validate()?;
        Ok(request)
    }
}

fn agent_spec(entry: &AgentGroupEntry) -> v3::AgentSpec {
    v3::AgentSpec {
        key: entry.key.to_string(),
        version: entry.version.clone(),
        replicas: i32::try_from(entry.replicas).ok(),
        args: entry
            .args
            .iter()
            .map(|arg| v3::Arg {
                name: arg.name.clone(),
                r#type: arg.arg_type.clone(),
                value: serde_json::to_vec(&arg.value).unwrap_or_default(),
            })
            .collect(),
    }
}

/// Arg values travel as JSON bytes; anything else is kept as text.
fn arg_value(arg: v3::Arg) -> ArgValue {
    let value = serde_json::from_slice(&arg.value)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&arg.value).into_owned()));
    ArgValue {
        name: arg.name,
        arg_type: arg.r#type,
        value,
    }
}
