//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Named tracers and span helpers ([`tracer`], [`span`])
//! - Trace context and baggage propagation ([`propagation`])
//! - Name-keyed counters and histograms ([`metrics`])
//! - Exporter pipeline and structured logging ([`exporter`], [`logging`])

pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod propagation;
pub mod span;
pub mod tracer;
