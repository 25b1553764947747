// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// OpenTelemetry-backed span factory exporting over OTLP/HTTP.

use super::{ActiveSpan, SpanFactory};
use crate::telemetry::TelemetryError;
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, Status, TraceContextExt, TraceFlags, TraceId, TraceState,
    Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use scanweave_core::domain::trace::TraceContext;
use std::collections::HashMap;

const INSTRUMENTATION_SCOPE: &str = "scanweave-sdk";

pub struct OtelSpanFactory {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl OtelSpanFactory {
    /// Exports to an OTLP/HTTP traces endpoint such as
    /// `http://jaeger:4318/v1/traces`.
    pub fn otlp_http(
        endpoint: &str,
        headers: HashMap<String, String>,
        service_name: &str,
    ) -> Result<Self, TelemetryError> {
        let exporter = SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_headers(headers)
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .build();
        let tracer = provider.tracer(INSTRUMENTATION_SCOPE);
        Ok(Self { provider, tracer })
    }
}

fn remote_parent(parent: TraceContext) -> Context {
    let span_context = SpanContext::new(
        TraceId::from_bytes(parent.trace_id.to_be_bytes()),
        SpanId::from_bytes(parent.span_id.to_be_bytes()),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    Context::new().with_remote_span_context(span_context)
}

impl SpanFactory for OtelSpanFactory {
    fn start_span(&self, name: &'static str, parent: Option<TraceContext>) -> Box<dyn ActiveSpan> {
        let parent_cx = parent.map(remote_parent).unwrap_or_default();
        let span = self.tracer.start_with_context(name, &parent_cx);
        Box::new(OtelSpan { span })
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        self.provider
            .force_flush()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))
    }
}

struct OtelSpan {
    span: opentelemetry_sdk::trace::Span,
}

impl ActiveSpan for OtelSpan {
    fn context(&self) -> TraceContext {
        let span_context = self.span.span_context();
        TraceContext::new(
            u128::from_be_bytes(span_context.trace_id().to_bytes()),
            u64::from_be_bytes(span_context.span_id().to_bytes()),
        )
    }

    fn set_attribute(&mut self, key: &'static str, value: String) {
        self.span.set_attribute(KeyValue::new(key, value));
    }

    fn record_error(&mut self, message: &str) {
        self.span.set_status(Status::error(message.to_string()));
    }

    fn end(mut self: Box<Self>) {
        self.span.end();
    }
}
