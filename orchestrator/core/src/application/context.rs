// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Per-run context: built once for each scan and passed to every step, so
// no component reaches for process-global state to log, report progress or
// check for cancellation.

use crate::application::progress::{InstallProgress, LogProgress};
use crate::domain::events::{ResourceKind, ScanEvent};
use crate::domain::scan::{ScanId, ScanPhase};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

#[derive(Clone)]
pub struct RunContext {
    pub scan_id: ScanId,
    pub span: Span,
    pub events: EventBus,
    pub progress: Arc<dyn InstallProgress>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(scan_id: ScanId) -> Self {
        Self {
            scan_id,
            span: tracing::info_span!("scan", scan_id = %scan_id),
            events: EventBus::with_default_capacity(),
            progress: Arc::new(LogProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn InstallProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn phase_changed(&self, from: ScanPhase, to: ScanPhase) {
        self.events.publish(ScanEvent::PhaseChanged {
            scan_id: self.scan_id,
            from,
            to,
            changed_at: Utc::now(),
        });
    }

    pub fn provisioned(&self, kind: ResourceKind, name: &str) {
        self.events.publish(ScanEvent::ResourceProvisioned {
            scan_id: self.scan_id,
            kind,
            name: name.to_string(),
            provisioned_at: Utc::now(),
        });
    }

    pub fn teardown_failed(&self, kind: ResourceKind, name: &str, error: &str) {
        self.events.publish(ScanEvent::TeardownStepFailed {
            scan_id: self.scan_id,
            kind,
            name: name.to_string(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
    }
}
