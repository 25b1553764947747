// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Routing Fabric
//!
//! Topic-based publish/subscribe between agents. Every agent owns one named
//! queue bound to its `in_selectors`; a publish on topic `T` enqueues one
//! copy on every queue with at least one binding that is a whole-segment
//! prefix of `T`. Replicas of the same agent compete for deliveries on the
//! shared queue.
//!
//! Delivery is at-least-once: a delivery that is neither acked nor rejected
//! is handed out again. Order is preserved per publisher per queue only.

use crate::domain::message::Envelope;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Broker connection failed: {0}")]
    Connection(String),
    #[error("Publish to {0} failed: {1}")]
    Publish(String, String),
    #[error("Subscription on {0} failed: {1}")]
    Subscribe(String, String),
    #[error("Acknowledgement failed: {0}")]
    Ack(String),
    #[error("Subscription closed")]
    Closed,
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&mut self) -> Result<(), BusError>;

    /// Discards the delivery. It is not redelivered.
    async fn reject(&mut self) -> Result<(), BusError>;
}

pub struct Delivery {
    pub envelope: Envelope,
    /// Set when the broker handed this message out before without a
    /// settlement.
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(envelope: Envelope, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            redelivered,
            acker,
        }
    }

    pub async fn ack(mut self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    pub async fn reject(mut self) -> Result<(), BusError> {
        self.acker.reject().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.envelope.topic)
            .field("len", &self.envelope.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

#[async_trait]
pub trait Subscription: Send {
    /// Next delivery, or `None` once the fabric is shut down.
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError>;
}

/// Fabric-wide activity, used for quiescence detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Messages enqueued or in flight and not yet settled.
    pub pending: u64,
    /// Time since the last publish or settlement.
    pub idle_for: Duration,
}

impl ActivitySnapshot {
    pub fn is_quiescent(&self, window: Duration) -> bool {
        self.pending == 0 && self.idle_for >= window
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Creates `queue` if needed and binds it to `selectors`. Bindings only
    /// accumulate.
    async fn declare_queue(&self, queue: &str, selectors: &[String]) -> Result<(), BusError>;

    /// Routes `envelope` to every matching queue; returns how many queues
    /// received a copy.
    async fn publish(&self, envelope: Envelope) -> Result<usize, BusError>;

    /// Declares `queue` with `selectors` and starts consuming from it as
    /// `consumer`. A consumer that subscribes again under the same name
    /// first receives the deliveries it left unsettled.
    async fn subscribe_as(
        &self,
        queue: &str,
        consumer: &str,
        selectors: &[String],
    ) -> Result<Box<dyn Subscription>, BusError>;

    /// Subscribes under a fresh consumer name.
    async fn subscribe(
        &self,
        queue: &str,
        selectors: &[String],
    ) -> Result<Box<dyn Subscription>, BusError> {
        let consumer = uuid::Uuid::new_v4().to_string();
        self.subscribe_as(queue, &consumer, selectors).await
    }

    async fn activity(&self) -> Result<ActivitySnapshot, BusError>;
}
