// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Span factories that keep finished spans in-process: in memory for tests
// or appended to a JSON-lines file.

use super::{ActiveSpan, SpanFactory};
use crate::telemetry::TelemetryError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scanweave_core::domain::trace::TraceContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// A finished span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub name: String,
    pub context: TraceContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TraceContext>,
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SpanRecord {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

trait SpanSink: Send + Sync {
    fn record(&self, span: SpanRecord);
}

fn nonzero_u128() -> u128 {
    loop {
        let id = Uuid::new_v4().as_u128();
        if id != 0 {
            return id;
        }
    }
}

/// Child of `parent` in the same trace, or the root of a fresh one.
fn child_context(parent: Option<TraceContext>) -> TraceContext {
    let trace_id = parent.map(|p| p.trace_id).unwrap_or_else(nonzero_u128);
    let span_id = loop {
        let id = nonzero_u128() as u64;
        if id != 0 {
            break id;
        }
    };
    TraceContext::new(trace_id, span_id)
}

struct LocalSpan {
    record: SpanRecord,
    sink: Arc<dyn SpanSink>,
}

impl LocalSpan {
    fn start(name: &'static str, parent: Option<TraceContext>, sink: Arc<dyn SpanSink>) -> Self {
        let now = Utc::now();
        Self {
            record: SpanRecord {
                name: name.to_string(),
                context: child_context(parent),
                parent,
                attributes: BTreeMap::new(),
                error: None,
                started_at: now,
                ended_at: now,
            },
            sink,
        }
    }
}

impl ActiveSpan for LocalSpan {
    fn context(&self) -> TraceContext {
        self.record.context
    }

    fn set_attribute(&mut self, key: &'static str, value: String) {
        self.record.attributes.insert(key.to_string(), value);
    }

    fn record_error(&mut self, message: &str) {
        self.record.error = Some(message.to_string());
    }

    fn end(mut self: Box<Self>) {
        self.record.ended_at = Utc::now();
        self.sink.record(self.record);
    }
}

/// Keeps every finished span in memory.
#[derive(Clone, Default)]
pub struct RecordingSpanFactory {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl RecordingSpanFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished spans in end order.
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<SpanRecord> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

struct MemorySink(Arc<Mutex<Vec<SpanRecord>>>);

impl SpanSink for MemorySink {
    fn record(&self, span: SpanRecord) {
        self.0.lock().push(span);
    }
}

impl SpanFactory for RecordingSpanFactory {
    fn start_span(&self, name: &'static str, parent: Option<TraceContext>) -> Box<dyn ActiveSpan> {
        Box::new(LocalSpan::start(
            name,
            parent,
            Arc::new(MemorySink(self.spans.clone())),
        ))
    }
}

/// Appends one JSON object per finished span to a file.
pub struct FileSpanFactory {
    sink: Arc<FileSink>,
}

struct FileSink {
    writer: Mutex<BufWriter<File>>,
}

impl SpanSink for FileSink {
    fn record(&self, span: SpanRecord) {
        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, &span)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        if let Err(e) = written {
            tracing::warn!("Failed to write span {}: {}", span.name, e);
        }
    }
}

impl FileSpanFactory {
    /// Truncates `path` if it exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let file = File::create(path.as_ref()).map_err(|e| TelemetryError::Io {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            sink: Arc::new(FileSink {
                writer: Mutex::new(BufWriter::new(file)),
            }),
        })
    }
}

impl SpanFactory for FileSpanFactory {
    fn start_span(&self, name: &'static str, parent: Option<TraceContext>) -> Box<dyn ActiveSpan> {
        Box::new(LocalSpan::start(name, parent, self.sink.clone()))
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        self.sink
            .writer
            .lock()
            .flush()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_span_inherits_trace_id() {
        let factory = RecordingSpanFactory::new();
        let parent = TraceContext::new(42, 7);

        let span = factory.start_span("process_message", Some(parent));
        let context = span.context();
        span.end();

        assert_eq!(context.trace_id, 42);
        assert_ne!(context.span_id, 0);
        assert!(!context.remote);
        let recorded = factory.spans();
        assert_eq!(recorded[0].parent, Some(parent));
    }

    #[test]
    fn test_root_span_starts_new_trace() {
        let factory = RecordingSpanFactory::new();
        let a = factory.start_span("emit_message", None);
        let b = factory.start_span("emit_message", None);
        assert_ne!(a.context().trace_id, b.context().trace_id);
        assert_ne!(a.context().trace_id, 0);
    }

    #[test]
    fn test_file_factory_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.jsonl");
        let factory = FileSpanFactory::create(&path).unwrap();

        let mut span = factory.start_span("process_message", None);
        span.set_attribute("agent.name", "agent/org/nmap".to_string());
        span.end();
        let mut failed = factory.start_span("emit_message", None);
        failed.record_error("boom");
        failed.end();
        factory.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<SpanRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].attribute("agent.name"), Some("agent/org/nmap"));
        assert_eq!(lines[1].error.as_deref(), Some("boom"));
    }
}
