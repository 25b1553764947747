// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod context;
pub mod deployment;
pub mod orchestrator;
pub mod progress;
pub mod provisioning;
pub mod request;

// Re-export use cases for convenience
pub use context::RunContext;
pub use deployment::{AgentDeploymentManager, DeployTarget, DeploymentError, PullPolicy};
pub use orchestrator::{CompletionReason, ScanError, ScanOrchestrator, ScanReport};
pub use progress::{InstallProgress, LogProgress};
pub use request::ScanRequest;
