// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Opens clients for a scan's broker and store once their containers are
// healthy. The orchestrator only knows the URLs; the connector decides what
// speaks to them.

use crate::domain::bus::{BusError, MessageBus};
use crate::domain::store::{CoordinationStore, StoreError};
use crate::infrastructure::fabric::RedisStreamFabric;
use crate::infrastructure::store::RedisCoordinationStore;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EndpointConnector: Send + Sync {
    async fn bus(&self, url: &str) -> Result<Arc<dyn MessageBus>, BusError>;

    async fn store(&self, url: &str) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl EndpointConnector for RedisConnector {
    async fn bus(&self, url: &str) -> Result<Arc<dyn MessageBus>, BusError> {
        Ok(Arc::new(RedisStreamFabric::connect(url).await?))
    }

    async fn store(&self, url: &str) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        Ok(Arc::new(RedisCoordinationStore::connect(url).await?))
    }
}
