//! Context propagation across a simulated process boundary.
//!
//! Tests:
//! - Injected headers continue the same trace downstream
//! - Baggage travels with the headers and is readable on the other side

mod common;

use std::collections::HashMap;

use opentelemetry::trace::TraceContextExt;
use waypoint::observability::span::current_span_context;
use waypoint::{
    create_baggage, create_span, extract_context, get_baggage, propagate_context, traced,
};

/// Headers from `propagate_context` decode to the caller's trace id.
#[test]
fn test_downstream_span_joins_the_trace() {
    common::telemetry();

    let (sent_trace, headers) = {
        let guard = create_span("propagation.client");
        (guard.span_context().trace_id(), propagate_context(&HashMap::new()))
    };
    assert!(headers.get("traceparent").is_some_and(|v| !v.is_empty()));

    // Receiving side: continue the trace from the headers.
    let remote = extract_context(&headers);
    assert_eq!(remote.span().span_context().trace_id(), sent_trace);
    {
        let _attached = remote.attach();
        traced("propagation.server").run(|| ());
    }

    let client = common::span_named("propagation.client");
    let server = common::span_named("propagation.server");
    assert_eq!(server.span_context.trace_id(), client.span_context.trace_id());
    assert_eq!(server.parent_span_id, client.span_context.span_id());
}

/// Without an active span there is nothing to inject.
#[test]
fn test_no_active_span_injects_nothing() {
    common::telemetry();

    assert!(current_span_context().is_none());
    let headers = propagate_context(&HashMap::new());

    assert!(!headers.contains_key("traceparent"));
}

/// Baggage set by the caller is readable after extraction downstream.
#[test]
fn test_baggage_crosses_the_boundary() {
    common::telemetry();

    let headers = {
        let _span = create_span("propagation.baggage");
        let _baggage = create_baggage([("tenant", "acme"), ("plan", "gold")]);
        assert_eq!(get_baggage("tenant").as_deref(), Some("acme"));
        propagate_context(&HashMap::new())
    };
    assert_eq!(get_baggage("tenant"), None);

    let _attached = extract_context(&headers).attach();
    assert_eq!(get_baggage("tenant").as_deref(), Some("acme"));
    assert_eq!(get_baggage("plan").as_deref(), Some("gold"));
    assert_eq!(get_baggage("missing"), None);
}

/// Baggage entries are visible to spans started while they are attached.
#[test]
fn test_baggage_visible_inside_child_spans() {
    common::telemetry();

    let _baggage = create_baggage([("request.origin", "mobile")]);
    let seen = traced("propagation.baggage_child").run(|| get_baggage("request.origin"));

    assert_eq!(seen.as_deref(), Some("mobile"));
}
