// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared key-value coordination store. Last write wins per key; the engine
//! holds no locks and runs no transactions across agents.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Coordination store connection failed: {0}")]
    Connection(String),
    #[error("Coordination store command failed: {0}")]
    Command(String),
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically adds `by` and returns the new value.
    async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError>;

    async fn set_flag(&self, key: &str) -> Result<(), StoreError>;

    async fn is_flag_set(&self, key: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Key an agent sets to signal that a scan is finished.
pub fn completion_key(scan_id: &str) -> String {
    format!("scan:{}:completed", scan_id)
}
