//! Waypoint: a backend-agnostic telemetry facade over OpenTelemetry.
//!
//! Application code creates spans, records errors, propagates context and
//! records metrics through this crate only; switching between console,
//! OTLP, X-Ray or Jaeger export is a matter of environment configuration.
//!
//! # Architecture
//!
//! - **Never fatal**: telemetry failures are contained and logged, never
//!   surfaced to the instrumented code
//! - **Context-local**: the active span follows the thread or async task
//! - **Cached**: tracers and instruments are created once per name
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Setup error types
//! - [`middleware`]: Tower layer creating a span per HTTP request
//! - [`observability`]: Tracers, spans, propagation, metrics, exporters
//! - [`server`]: Probe HTTP server
//!
//! # Example
//!
//! ```no_run
//! use waypoint::{install, traced, TelemetryConfig};
//!
//! #[derive(Debug)]
//! struct InsufficientFunds;
//!
//! impl std::fmt::Display for InsufficientFunds {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("insufficient funds")
//!     }
//! }
//!
//! #[traced(name = "checkout")]
//! fn charge(amount: u64) -> Result<u64, InsufficientFunds> {
//!     if amount > 50 { Err(InsufficientFunds) } else { Ok(amount) }
//! }
//!
//! let _guard = install(&TelemetryConfig::from_env());
//! assert!(charge(100).is_err());
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // observability::metrics::InstrumentRegistry is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::cast_possible_wrap,      // Content lengths fit in i64 attributes
    clippy::struct_excessive_bools   // Config structs may have flags
)]

// Lets the attribute macros expand to `::waypoint::...` inside this crate too.
extern crate self as waypoint;

pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod server;

pub use opentelemetry;
pub use opentelemetry::KeyValue;
pub use waypoint_macros::{timed_span, traced};

pub use config::{ExporterKind, LogFormat, TelemetryConfig};
pub use error::{ConfigError, TelemetryError};
pub use middleware::{TelemetryLayer, TelemetryService};
pub use observability::exporter::{install, TelemetryGuard};
pub use observability::logging::{init_logging, LoggingHandle};
pub use observability::metrics::{create_metrics_counter, create_metrics_histogram};
pub use observability::propagation::{
    create_baggage, extract_context, get_baggage, inject_context, propagate_context, with_baggage,
    BaggageGuard,
};
// Functions share their names with the attribute macros; they live in
// different namespaces.
pub use observability::span::{
    add_span_attributes, create_span, create_span_with_attributes, record_exception, timed_span,
    traced, traced_in, SpanGuard, Traced,
};
pub use observability::tracer::{get_tracer, Tracer};
