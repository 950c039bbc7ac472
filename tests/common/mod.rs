//! Test utilities for Waypoint integration tests.
//!
//! Provides:
//! - A process-wide tracer provider exporting into memory
//! - Lookup helpers for finished spans and their attributes

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::Value;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use waypoint::observability::propagation::install_default_propagator;

/// Global in-memory telemetry shared by every test in one test binary.
pub struct TestTelemetry {
    /// Receives every span ended in the process.
    pub exporter: InMemorySpanExporter,
    /// Keeps the provider alive for the whole run.
    pub provider: SdkTracerProvider,
}

static TELEMETRY: OnceLock<TestTelemetry> = OnceLock::new();

/// Install the in-memory pipeline once.
///
/// Call this first in every test: tracers cached before the provider is
/// installed would stay no-op.
pub fn telemetry() -> &'static TestTelemetry {
    TELEMETRY.get_or_init(|| {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        global::set_tracer_provider(provider.clone());
        install_default_propagator();
        TestTelemetry { exporter, provider }
    })
}

/// All spans finished so far, across tests.
pub fn finished_spans() -> Vec<SpanData> {
    telemetry()
        .exporter
        .get_finished_spans()
        .expect("in-memory exporter is readable")
}

/// All finished spans called `name`. Tests use unique span names.
pub fn spans_named(name: &str) -> Vec<SpanData> {
    finished_spans()
        .into_iter()
        .filter(|span| span.name == name)
        .collect()
}

/// The single finished span called `name`.
pub fn span_named(name: &str) -> SpanData {
    let mut spans = spans_named(name);
    assert_eq!(spans.len(), 1, "expected exactly one span named {name}");
    spans.remove(0)
}

/// Value of attribute `key` on `span`.
pub fn attribute(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
