// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Scan Event Bus - Pub/Sub for scan lifecycle events
//
// In-memory fan-out over a tokio broadcast channel. The CLI subscribes to
// render progress; the orchestrator publishes and never blocks on slow
// receivers (lagging receivers drop the oldest events).

use crate::domain::events::ScanEvent;
use crate::domain::scan::ScanId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ScanEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events are buffered per receiver before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: ScanEvent) {
        debug!("Publishing scan event: {:?}", event);
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to scan event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            scan_id: None,
        }
    }

    /// Receiver that only yields events for `scan_id`.
    pub fn subscribe_scan(&self, scan_id: ScanId) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            scan_id: Some(scan_id),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<ScanEvent>,
    scan_id: Option<ScanId>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<ScanEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<ScanEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    fn accepts(&self, event: &ScanEvent) -> bool {
        self.scan_id.map_or(true, |id| event.scan_id() == id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scan::ScanPhase;
    use chrono::Utc;

    fn phase_event(scan_id: ScanId) -> ScanEvent {
        ScanEvent::PhaseChanged {
            scan_id,
            from: ScanPhase::Init,
            to: ScanPhase::Provisioning,
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();
        let scan_id = ScanId::new();

        bus.publish(phase_event(scan_id));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.scan_id(), scan_id);
    }

    #[tokio::test]
    async fn test_scan_filter() {
        let bus = EventBus::new(10);
        let wanted = ScanId::new();
        let mut receiver = bus.subscribe_scan(wanted);

        bus.publish(phase_event(ScanId::new()));
        bus.publish(phase_event(wanted));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.scan_id(), wanted);
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(phase_event(ScanId::new()));
    }
}
