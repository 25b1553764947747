// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-process routing fabric.
//
// Same routing and delivery contract as the Redis Streams fabric, without a
// broker: one unbounded channel per queue, consumers of a queue share its
// receiver. A delivery dropped without ack or reject goes back on its queue
// flagged as redelivered.

use crate::domain::bus::{
    Acknowledger, ActivitySnapshot, BusError, Delivery, MessageBus, Subscription,
};
use crate::domain::message::{any_selector_matches, Envelope};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Queued {
    envelope: Envelope,
    redelivered: bool,
}

struct Queue {
    bindings: Vec<String>,
    tx: mpsc::UnboundedSender<Queued>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Queued>>>,
}

struct Shared {
    queues: Mutex<HashMap<String, Queue>>,
    pending: AtomicU64,
    last_activity: Mutex<Instant>,
    published: Mutex<Vec<Envelope>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn settle(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.touch();
    }
}

#[derive(Clone)]
pub struct InMemoryFabric {
    shared: Arc<Shared>,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                pending: AtomicU64::new(0),
                last_activity: Mutex::new(Instant::now()),
                published: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Every envelope published so far, in publish order.
    pub fn published(&self) -> Vec<Envelope> {
        self.shared.published.lock().clone()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Ends every subscription; pending `recv` calls return `None`.
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    fn declare(&self, queue: &str, selectors: &[String]) -> Arc<AsyncMutex<mpsc::UnboundedReceiver<Queued>>> {
        let mut queues = self.shared.queues.lock();
        let entry = queues.entry(queue.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            Queue {
                bindings: Vec::new(),
                tx,
                rx: Arc::new(AsyncMutex::new(rx)),
            }
        });
        for selector in selectors {
            if !entry.bindings.contains(selector) {
                entry.bindings.push(selector.clone());
            }
        }
        entry.rx.clone()
    }
}

impl Default for InMemoryFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryFabric {
    async fn declare_queue(&self, queue: &str, selectors: &[String]) -> Result<(), BusError> {
        self.declare(queue, selectors);
        debug!("Declared queue {} bound to {:?}", queue, selectors);
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<usize, BusError> {
        let queues = self.shared.queues.lock();
        let mut routed = 0;
        for (name, queue) in queues.iter() {
            if !any_selector_matches(&queue.bindings, &envelope.topic) {
                continue;
            }
            queue
                .tx
                .send(Queued {
                    envelope: envelope.clone(),
                    redelivered: false,
                })
                .map_err(|e| BusError::Publish(name.clone(), e.to_string()))?;
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            routed += 1;
        }
        drop(queues);

        trace!("Published {} to {} queue(s)", envelope.topic, routed);
        self.shared.published.lock().push(envelope);
        self.shared.touch();
        Ok(routed)
    }

    async fn subscribe_as(
        &self,
        queue: &str,
        _consumer: &str,
        selectors: &[String],
    ) -> Result<Box<dyn Subscription>, BusError> {
        let rx = self.declare(queue, selectors);
        let tx = self
            .shared
            .queues
            .lock()
            .get(queue)
            .map(|q| q.tx.clone())
            .ok_or_else(|| BusError::Subscribe(queue.to_string(), "queue vanished".into()))?;
        Ok(Box::new(MemorySubscription {
            rx,
            tx,
            shared: self.shared.clone(),
        }))
    }

    async fn activity(&self) -> Result<ActivitySnapshot, BusError> {
        Ok(ActivitySnapshot {
            pending: self.shared.pending.load(Ordering::SeqCst),
            idle_for: self.shared.last_activity.lock().elapsed(),
        })
    }
}

struct MemorySubscription {
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Queued>>>,
    tx: mpsc::UnboundedSender<Queued>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError> {
        let queued = tokio::select! {
            _ = self.shared.shutdown.cancelled() => return Ok(None),
            queued = async {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            } => queued,
        };

        let Some(queued) = queued else {
            return Ok(None);
        };
        let envelope = queued.envelope.clone();
        let redelivered = queued.redelivered;
        let acker = MemoryAcker {
            queued: Some(queued),
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        };
        Ok(Some(Delivery::new(envelope, redelivered, Box::new(acker))))
    }
}

struct MemoryAcker {
    queued: Option<Queued>,
    tx: mpsc::UnboundedSender<Queued>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&mut self) -> Result<(), BusError> {
        if self.queued.take().is_some() {
            self.shared.settle();
        }
        Ok(())
    }

    async fn reject(&mut self) -> Result<(), BusError> {
        if let Some(queued) = self.queued.take() {
            debug!("Rejected {}", queued.envelope.topic);
            self.shared.settle();
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(mut queued) = self.queued.take() {
            queued.redelivered = true;
            if self.tx.send(queued).is_err() {
                self.shared.settle();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageId;
    use std::time::Duration;

    fn envelope(selector: &str) -> Envelope {
        Envelope::new(selector, &MessageId::generate(), b"payload".to_vec())
    }

    fn selectors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_prefix_routing() {
        let fabric = InMemoryFabric::new();
        let mut fingerprint = fabric
            .subscribe("fingerprint", &selectors(&["v3.fingerprint"]))
            .await
            .unwrap();
        fabric
            .declare_queue("other", &selectors(&["v3.fingerprinter"]))
            .await
            .unwrap();

        let routed = fabric
            .publish(envelope("v3.fingerprint.domain_name.library"))
            .await
            .unwrap();
        assert_eq!(routed, 1);
        assert_eq!(fabric.publish(envelope("v3.fingerprintx")).await.unwrap(), 0);

        let delivery = fingerprint.recv().await.unwrap().unwrap();
        assert_eq!(delivery.envelope.selector(), "v3.fingerprint.domain_name.library");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_copy_per_queue_even_with_overlapping_bindings() {
        let fabric = InMemoryFabric::new();
        let mut sub = fabric
            .subscribe("agent", &selectors(&["v3.asset", "v3.asset.file"]))
            .await
            .unwrap();

        assert_eq!(fabric.publish(envelope("v3.asset.file")).await.unwrap(), 1);
        sub.recv().await.unwrap().unwrap().ack().await.unwrap();
        assert_eq!(fabric.activity().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let fabric = InMemoryFabric::new();
        let mut sub = fabric.subscribe("q", &selectors(&["v3.a"])).await.unwrap();
        for i in 0..5 {
            let id = MessageId::new(format!("0000-{}", i));
            fabric.publish(Envelope::new("v3.a", &id, vec![i])).await.unwrap();
        }
        for i in 0..5 {
            let delivery = sub.recv().await.unwrap().unwrap();
            assert_eq!(delivery.envelope.payload, vec![i]);
            delivery.ack().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unsettled_delivery_is_redelivered() {
        let fabric = InMemoryFabric::new();
        let mut sub = fabric.subscribe("q", &selectors(&["v3.a"])).await.unwrap();
        fabric.publish(envelope("v3.a")).await.unwrap();

        let first = sub.recv().await.unwrap().unwrap();
        assert!(!first.redelivered);
        drop(first);

        let second = sub.recv().await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_eq!(fabric.activity().await.unwrap().pending, 1);
        second.reject().await.unwrap();
        assert_eq!(fabric.activity().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_competing_consumers_share_a_queue() {
        let fabric = InMemoryFabric::new();
        let mut a = fabric.subscribe("q", &selectors(&["v3.a"])).await.unwrap();
        let mut b = fabric.subscribe("q", &selectors(&["v3.a"])).await.unwrap();
        fabric.publish(envelope("v3.a")).await.unwrap();
        fabric.publish(envelope("v3.a")).await.unwrap();

        let first = a.recv().await.unwrap().unwrap();
        let second = b.recv().await.unwrap().unwrap();
        assert_ne!(first.envelope.topic, second.envelope.topic);
        first.ack().await.unwrap();
        second.ack().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_tracks_idle_time() {
        let fabric = InMemoryFabric::new();
        let mut sub = fabric.subscribe("q", &selectors(&["v3.a"])).await.unwrap();
        fabric.publish(envelope("v3.a")).await.unwrap();

        let busy = fabric.activity().await.unwrap();
        assert_eq!(busy.pending, 1);

        sub.recv().await.unwrap().unwrap().ack().await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        let idle = fabric.activity().await.unwrap();
        assert_eq!(idle.pending, 0);
        assert!(idle.is_quiescent(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let fabric = InMemoryFabric::new();
        let mut sub = fabric.subscribe("q", &selectors(&["v3.a"])).await.unwrap();
        fabric.close();
        assert!(sub.recv().await.unwrap().is_none());
    }
}
