// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trace Context Encoding
//!
//! Trace linkage travels inside the message id. An emitted id is
//! `{correlation}-{trace_id}-{span_id}` with both ids rendered in decimal.
//! Since the correlation part is a uuid (five dash segments), a traced id
//! has seven segments and the trace ids sit at indexes 5 and 6.
//!
//! Parsing rules:
//! - fewer than 7 segments → empty context
//! - 7 or more segments with numeric segments 5 and 6 → remote context
//! - non-numeric segments 5/6 → empty context
//! - a zero trace or span id → empty context (all-zero ids are invalid in
//!   OpenTelemetry); the receiving span starts a new trace
//!
//! This module also owns the collector URL grammar used to pick a span
//! exporter at startup.

use crate::domain::message::MessageId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Minimum dash-segment count for an id that carries trace context.
pub const TRACED_ID_MIN_SEGMENTS: usize = 7;

const TRACE_ID_INDEX: usize = 5;
const SPAN_ID_INDEX: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    /// `true` when extracted from an incoming message rather than created
    /// locally.
    pub remote: bool,
}

impl TraceContext {
    pub fn new(trace_id: u128, span_id: u64) -> Self {
        Self {
            trace_id,
            span_id,
            remote: false,
        }
    }

    /// Extracts the parent context carried by `message_id`, if any. Ids
    /// that are zero are not valid span contexts and yield `None`.
    pub fn from_message_id(message_id: &str) -> Option<Self> {
        let segments: Vec<&str> = message_id.split('-').collect();
        if segments.len() < TRACED_ID_MIN_SEGMENTS {
            return None;
        }
        let trace_id = segments[TRACE_ID_INDEX].parse::<u128>().ok()?;
        let span_id = segments[SPAN_ID_INDEX].parse::<u64>().ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            remote: true,
        })
    }

    /// Appends this context to a correlation id.
    pub fn append_to(&self, correlation: &str) -> MessageId {
        MessageId::new(format!("{}-{}-{}", correlation, self.trace_id, self.span_id))
    }
}

/// The correlation part of an id: everything before the trace segments.
pub fn correlation_of(message_id: &str) -> &str {
    let mut seen = 0;
    for (idx, ch) in message_id.char_indices() {
        if ch == '-' {
            seen += 1;
            if seen == TRACE_ID_INDEX {
                return &message_id[..idx];
            }
        }
    }
    message_id
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectorUrlError {
    #[error("Unsupported trace collector scheme '{0}'. Supported: jaeger, gcp, file")]
    UnsupportedScheme(String),
    #[error("Malformed trace collector URL '{0}': {1}")]
    Malformed(String, String),
}

/// Parsed trace collector destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum CollectorUrl {
    /// `jaeger:host:port`
    Jaeger { host: String, port: u16 },
    /// `gcp:project_id:credential_path`
    Gcp {
        project_id: String,
        credentials: PathBuf,
    },
    /// `file:/path/to/spans.jsonl`
    File { path: PathBuf },
}

impl CollectorUrl {
    pub fn parse(url: &str) -> Result<Self, CollectorUrlError> {
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| CollectorUrlError::Malformed(url.to_string(), "missing scheme".into()))?;

        match scheme {
            "jaeger" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
                    CollectorUrlError::Malformed(url.to_string(), "expected jaeger:host:port".into())
                })?;
                if host.is_empty() {
                    return Err(CollectorUrlError::Malformed(
                        url.to_string(),
                        "empty host".into(),
                    ));
                }
                let port = port.parse::<u16>().map_err(|_| {
                    CollectorUrlError::Malformed(url.to_string(), format!("invalid port '{}'", port))
                })?;
                Ok(CollectorUrl::Jaeger {
                    host: host.to_string(),
                    port,
                })
            }
            "gcp" => {
                let (project_id, credentials) = rest.split_once(':').ok_or_else(|| {
                    CollectorUrlError::Malformed(
                        url.to_string(),
                        "expected gcp:project_id:credential_path".into(),
                    )
                })?;
                if project_id.is_empty() || credentials.is_empty() {
                    return Err(CollectorUrlError::Malformed(
                        url.to_string(),
                        "project id and credential path are required".into(),
                    ));
                }
                Ok(CollectorUrl::Gcp {
                    project_id: project_id.to_string(),
                    credentials: PathBuf::from(credentials),
                })
            }
            "file" => {
                if rest.is_empty() {
                    return Err(CollectorUrlError::Malformed(
                        url.to_string(),
                        "empty path".into(),
                    ));
                }
                Ok(CollectorUrl::File {
                    path: PathBuf::from(rest),
                })
            }
            other => Err(CollectorUrlError::UnsupportedScheme(other.to_string())),
        }
    }
}
