//! Cross-process context propagation and baggage.
//!
//! Outbound calls carry the current trace in headers produced by
//! [`propagate_context`]; inbound requests continue a trace through
//! [`extract_context`]. The header format follows the global propagator,
//! which the exporter pipeline picks per backend.

use std::collections::HashMap;
use std::future::Future;

use opentelemetry::baggage::BaggageExt;
use opentelemetry::global;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::trace::{FutureExt, WithContext};
use opentelemetry::{Context, ContextGuard, Key, KeyValue, Value};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};

use crate::config::ExporterKind;

/// Composite propagator for `exporter`.
///
/// W3C trace context and baggage are always present; vendor formats come
/// first so their headers win on extraction.
pub fn propagator_for(exporter: Option<ExporterKind>) -> TextMapCompositePropagator {
    let mut propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = Vec::with_capacity(3);
    match exporter {
        Some(ExporterKind::Xray) => {
            propagators.push(Box::new(opentelemetry_aws::trace::XrayPropagator::default()));
        }
        Some(ExporterKind::Jaeger) => {
            propagators.push(Box::new(opentelemetry_jaeger_propagator::Propagator::new()));
        }
        Some(ExporterKind::Otlp) | Some(ExporterKind::Console) | None => {}
    }
    propagators.push(Box::new(TraceContextPropagator::new()));
    propagators.push(Box::new(BaggagePropagator::new()));
    TextMapCompositePropagator::new(propagators)
}

/// Install the W3C trace-context + baggage propagator globally.
pub fn install_default_propagator() {
    global::set_text_map_propagator(propagator_for(None));
}

/// Copy `headers` and inject the current context into the copy.
///
/// The input is left untouched. Without an active span only baggage (if
/// any) is added.
pub fn propagate_context(headers: &HashMap<String, String>) -> HashMap<String, String> {
    let mut carrier = headers.clone();
    inject_context(&mut carrier);
    carrier
}

/// Inject the current context into an arbitrary carrier.
pub fn inject_context(injector: &mut dyn Injector) {
    let cx = Context::current();
    global::get_text_map_propagator(|propagator| propagator.inject_context(&cx, injector));
}

/// Extract a parent context from an inbound carrier.
///
/// Returns a context without an active span when the carrier holds no
/// usable trace headers.
pub fn extract_context(extractor: &dyn Extractor) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(extractor))
}

/// Baggage entries attached as current until dropped.
#[must_use = "baggage is detached as soon as the guard is dropped"]
pub struct BaggageGuard {
    _attached: ContextGuard,
}

impl std::fmt::Debug for BaggageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaggageGuard").finish_non_exhaustive()
    }
}

fn baggage_context<I, K, V>(entries: I) -> Context
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Key>,
    V: Into<Value>,
{
    let entries: Vec<KeyValue> = entries
        .into_iter()
        .map(|(key, value)| KeyValue::new(key, value))
        .collect();
    Context::current().with_baggage(entries)
}

/// Merge `entries` into the current baggage until the guard drops.
///
/// Spans started and headers propagated while the guard lives see the
/// entries. Same thread only; use [`with_baggage`] for futures.
pub fn create_baggage<I, K, V>(entries: I) -> BaggageGuard
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Key>,
    V: Into<Value>,
{
    BaggageGuard {
        _attached: baggage_context(entries).attach(),
    }
}

/// Run `future` with `entries` merged into its baggage.
pub fn with_baggage<I, K, V, F>(entries: I, future: F) -> WithContext<F>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Key>,
    V: Into<Value>,
    F: Future,
{
    future.with_context(baggage_context(entries))
}

/// Baggage value for `key` in the current context, `None` when unset.
pub fn get_baggage(key: &str) -> Option<String> {
    Context::current()
        .baggage()
        .get(key)
        .map(|value| value.as_str().into_owned())
}
