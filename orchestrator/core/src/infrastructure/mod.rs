// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod connector;
pub mod definition_parser;
pub mod docker;
pub mod event_bus;
pub mod fabric;
pub mod registry;
pub mod store;

pub use connector::{EndpointConnector, RedisConnector};
pub use docker::DockerRuntime;
pub use event_bus::EventBus;
