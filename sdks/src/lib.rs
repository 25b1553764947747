// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! scanweave Rust SDK
//!
//! Build scanning agents: implement [`Agent`], then hand it to an
//! [`AgentRuntime`] built from the settings the orchestrator injects.

pub mod agent;
pub mod error;
pub mod minify;
pub mod pipeline;
pub mod runtime;
pub mod telemetry;
pub mod trace;

pub use agent::{Agent, AgentContext, Message};
pub use error::AgentError;
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, Settlement};
pub use scanweave_core::domain::settings::AgentSettings;
