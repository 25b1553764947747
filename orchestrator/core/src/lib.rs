// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scanweave Core
//!
//! Local scan orchestration: ephemeral per-scan infrastructure, agent
//! deployment, selector-based message routing and the scan state machine.
//!
//! # Architecture
//!
//! - **domain:** aggregates, value objects and the port traits
//!   (`ContainerRuntime`, `MessageBus`, `CoordinationStore`, `AgentRegistry`)
//! - **application:** provisioning, deployment and the scan orchestrator
//! - **infrastructure:** Docker, Redis and HTTP adapters behind those ports
//! - **wire:** protobuf payload schemas carried on the fabric

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use domain::*;
