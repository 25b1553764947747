// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scan Aggregate
//!
//! A [`Scan`] is owned by the orchestrator. Its [`ScanPhase`] only moves
//! forward:
//!
//! ```text
//! Init → Provisioning → Deploying → Running → {Completed | Failed | Aborted}
//! ```
//!
//! Any non-terminal phase may jump straight to `Failed` or `Aborted`.
//! Terminal phases accept no further transition.

use crate::domain::agent::AgentGroup;
use crate::domain::asset::Asset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex characters, used in resource names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Init,
    Provisioning,
    Deploying,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl ScanPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanPhase::Completed | ScanPhase::Failed | ScanPhase::Aborted
        )
    }

    pub fn can_transition_to(&self, next: ScanPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ScanPhase::Failed | ScanPhase::Aborted => true,
            ScanPhase::Completed => *self == ScanPhase::Running,
            other => other > *self && (other as u8) == (*self as u8) + 1,
        }
    }

    pub fn status(&self) -> ScanStatus {
        match self {
            ScanPhase::Init | ScanPhase::Provisioning | ScanPhase::Deploying => {
                ScanStatus::Provisioning
            }
            ScanPhase::Running => ScanStatus::Running,
            ScanPhase::Completed => ScanStatus::Completed,
            ScanPhase::Failed => ScanStatus::Failed,
            ScanPhase::Aborted => ScanStatus::Aborted,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::Init => "init",
            ScanPhase::Provisioning => "provisioning",
            ScanPhase::Deploying => "deploying",
            ScanPhase::Running => "running",
            ScanPhase::Completed => "completed",
            ScanPhase::Failed => "failed",
            ScanPhase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Coarse externally visible status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Provisioning,
    Running,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid scan transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ScanPhase,
    pub to: ScanPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub title: Option<String>,
    pub group: AgentGroup,
    pub assets: Vec<Asset>,
    phase: ScanPhase,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Scan {
    pub fn new(group: AgentGroup, assets: Vec<Asset>) -> Self {
        Self {
            id: ScanId::new(),
            title: None,
            group,
            assets,
            phase: ScanPhase::Init,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn status(&self) -> ScanStatus {
        self.phase.status()
    }

    pub fn transition(&mut self, next: ScanPhase) -> Result<(), TransitionError> {
        if !self.phase.can_transition_to(next) {
            return Err(TransitionError {
                from: self.phase,
                to: next,
            });
        }
        if next == ScanPhase::Running {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.phase = next;
        Ok(())
    }
}
