// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory;
pub mod redis_streams;

pub use memory::InMemoryFabric;
pub use redis_streams::RedisStreamFabric;
