// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod asset;
pub mod bus;
pub mod config;
pub mod events;
pub mod message;
pub mod registry;
pub mod runtime;
pub mod scan;
pub mod settings;
pub mod store;
pub mod trace;
