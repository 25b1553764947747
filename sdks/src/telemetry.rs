// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Span exporter selection from a trace collector URL.
//!
//! | URL | Exporter |
//! |-----|----------|
//! | `jaeger:host:port` | OTLP/HTTP to `http://host:port/v1/traces` |
//! | `gcp:project_id:credential_path` | OTLP/HTTP to Cloud Trace |
//! | `file:/path` | JSON lines, one span per line |
//!
//! An unsupported or malformed URL fails agent startup.

use crate::trace::{FileSpanFactory, OtelSpanFactory, SpanFactory};
use scanweave_core::domain::trace::{CollectorUrl, CollectorUrlError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const GCP_TRACES_ENDPOINT: &str = "https://telemetry.googleapis.com/v1/traces";
const GCP_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Collector(#[from] CollectorUrlError),
    #[error("Span exporter error: {0}")]
    Exporter(String),
    #[error("Failed to open span file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn jaeger_endpoint(host: &str, port: u16) -> String {
    format!("http://{}:{}/v1/traces", host, port)
}

/// Builds the span factory for `collector_url`. `service_name` identifies
/// the emitting agent in the backend.
pub fn span_factory_for(
    collector_url: &str,
    service_name: &str,
) -> Result<Arc<dyn SpanFactory>, TelemetryError> {
    match CollectorUrl::parse(collector_url)? {
        CollectorUrl::Jaeger { host, port } => {
            let endpoint = jaeger_endpoint(&host, port);
            info!("Exporting spans to {}", endpoint);
            Ok(Arc::new(OtelSpanFactory::otlp_http(
                &endpoint,
                HashMap::new(),
                service_name,
            )?))
        }
        CollectorUrl::Gcp {
            project_id,
            credentials,
        } => {
            std::env::set_var(GCP_CREDENTIALS_ENV, &credentials);
            info!("Exporting spans to Cloud Trace project {}", project_id);
            let headers = HashMap::from([("x-goog-user-project".to_string(), project_id)]);
            Ok(Arc::new(OtelSpanFactory::otlp_http(
                GCP_TRACES_ENDPOINT,
                headers,
                service_name,
            )?))
        }
        CollectorUrl::File { path } => {
            info!("Writing spans to {}", path.display());
            Ok(Arc::new(FileSpanFactory::create(path)?))
        }
    }
}
