// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::agent::AgentKey;
use crate::domain::scan::{ScanId, ScanPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which backing resource an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Broker,
    Store,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    PhaseChanged {
        scan_id: ScanId,
        from: ScanPhase,
        to: ScanPhase,
        changed_at: DateTime<Utc>,
    },
    ResourceProvisioned {
        scan_id: ScanId,
        kind: ResourceKind,
        name: String,
        provisioned_at: DateTime<Utc>,
    },
    AgentDeployed {
        scan_id: ScanId,
        key: AgentKey,
        service: String,
        replica: u32,
        deployed_at: DateTime<Utc>,
    },
    AssetInjected {
        scan_id: ScanId,
        selector: String,
        topic: String,
        injected_at: DateTime<Utc>,
    },
    LivenessWarning {
        scan_id: ScanId,
        service: String,
        reason: String,
        observed_at: DateTime<Utc>,
    },
    TeardownStepFailed {
        scan_id: ScanId,
        kind: ResourceKind,
        name: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl ScanEvent {
    pub fn scan_id(&self) -> ScanId {
        match self {
            ScanEvent::PhaseChanged { scan_id, .. }
            | ScanEvent::ResourceProvisioned { scan_id, .. }
            | ScanEvent::AgentDeployed { scan_id, .. }
            | ScanEvent::AssetInjected { scan_id, .. }
            | ScanEvent::LivenessWarning { scan_id, .. }
            | ScanEvent::TeardownStepFailed { scan_id, .. } => *scan_id,
        }
    }
}
