// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Terminal rendering: image pull progress bars and scan lifecycle lines.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use scanweave_core::application::InstallProgress;
use scanweave_core::domain::events::{ResourceKind, ScanEvent};
use scanweave_core::domain::runtime::{ImageRef, PullProgress};
use scanweave_core::infrastructure::event_bus::{EventBusError, EventReceiver};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;

/// One spinner per image being pulled.
pub struct BarProgress {
    bars: MultiProgress,
    active: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bars: MultiProgress::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn spinner(&self, image: &ImageRef) -> ProgressBar {
        let bar = self.bars.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}") {
            bar.set_style(style);
        }
        bar.set_prefix(image.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallProgress for BarProgress {
    fn already_present(&self, image: &ImageRef) {
        println!("{} {} already exist", "✓".green(), image);
    }

    fn pull_started(&self, image: &ImageRef) {
        let bar = self.spinner(image);
        bar.set_message("pulling");
        self.active.lock().insert(image.to_string(), bar);
    }

    fn pull_progress(&self, image: &ImageRef, record: &PullProgress) {
        if let Some(bar) = self.active.lock().get(&image.to_string()) {
            bar.set_message(pull_line(record));
        }
    }

    fn pull_finished(&self, image: &ImageRef) {
        if let Some(bar) = self.active.lock().remove(&image.to_string()) {
            bar.finish_with_message("pulled".green().to_string());
        }
    }
}

/// `layer: status progress`, skipping absent parts.
pub fn pull_line(record: &PullProgress) -> String {
    let mut line = String::new();
    if let Some(id) = &record.id {
        line.push_str(id);
        line.push_str(": ");
    }
    line.push_str(&record.status);
    if let Some(progress) = &record.progress {
        line.push(' ');
        line.push_str(progress);
    }
    line
}

fn kind_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "network",
        ResourceKind::Broker => "broker",
        ResourceKind::Store => "store",
        ResourceKind::Agent => "agent",
    }
}

/// Plain line for one lifecycle event.
pub fn render_event(event: &ScanEvent) -> String {
    match event {
        ScanEvent::PhaseChanged { from, to, .. } => format!("Scan {} → {}", from, to),
        ScanEvent::ResourceProvisioned { kind, name, .. } => {
            format!("Provisioned {} {}", kind_label(*kind), name)
        }
        ScanEvent::AgentDeployed {
            key,
            service,
            replica,
            ..
        } => format!("Deployed {} (replica {}) as {}", key, replica, service),
        ScanEvent::AssetInjected { selector, .. } => format!("Injected asset on {}", selector),
        ScanEvent::LivenessWarning {
            service, reason, ..
        } => format!("Agent {} is not running: {}", service, reason),
        ScanEvent::TeardownStepFailed {
            kind, name, error, ..
        } => format!("Failed to release {} {}: {}", kind_label(*kind), name, error),
    }
}

/// Prints events until the bus closes.
pub fn spawn_event_printer(mut events: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let line = render_event(&event);
                    match event {
                        ScanEvent::LivenessWarning { .. } | ScanEvent::TeardownStepFailed { .. } => {
                            eprintln!("{}", line.yellow())
                        }
                        _ => println!("{}", line.dimmed()),
                    }
                }
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scanweave_core::domain::agent::AgentKey;
    use scanweave_core::domain::scan::{ScanId, ScanPhase};

    #[test]
    fn test_pull_line() {
        let record = PullProgress {
            id: Some("a1b2".to_string()),
            status: "Downloading".to_string(),
            progress: Some("[==>   ]".to_string()),
        };
        assert_eq!(pull_line(&record), "a1b2: Downloading [==>   ]");

        let bare = PullProgress {
            id: None,
            status: "Pulling fs layer".to_string(),
            progress: None,
        };
        assert_eq!(pull_line(&bare), "Pulling fs layer");
    }

    #[test]
    fn test_render_events() {
        let scan_id = ScanId::new();
        let deployed = ScanEvent::AgentDeployed {
            scan_id,
            key: AgentKey::new("agent/org/nmap"),
            service: "scan-abc-nmap-0".to_string(),
            replica: 0,
            deployed_at: Utc::now(),
        };
        assert_eq!(
            render_event(&deployed),
            "Deployed agent/org/nmap (replica 0) as scan-abc-nmap-0"
        );

        let failed = ScanEvent::TeardownStepFailed {
            scan_id,
            kind: ResourceKind::Broker,
            name: "scanweave-abc-broker".to_string(),
            error: "timeout".to_string(),
            failed_at: Utc::now(),
        };
        assert_eq!(
            render_event(&failed),
            "Failed to release broker scanweave-abc-broker: timeout"
        );

        let phase = ScanEvent::PhaseChanged {
            scan_id,
            from: ScanPhase::Deploying,
            to: ScanPhase::Running,
            changed_at: Utc::now(),
        };
        assert!(render_event(&phase).starts_with("Scan "));
    }
}
