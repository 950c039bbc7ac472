//! Error types for pipeline and logging setup.
//!
//! The facade operations themselves never return these: telemetry failures
//! are contained and logged. Only the setup paths (`install`, `init_logging`)
//! produce a `TelemetryError`, and `install` degrades instead of failing.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `OTEL_EXPORTER` named a backend we do not know.
    #[error("unknown exporter type: {0}")]
    UnknownExporter(String),

    /// A setting held a value that could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors raised while wiring the telemetry pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Building a span exporter or tracer provider failed.
    #[error("trace pipeline error: {0}")]
    Trace(#[from] opentelemetry::trace::TraceError),

    /// Building a metrics exporter or meter provider failed.
    #[error("metrics pipeline error: {0}")]
    Metrics(#[from] opentelemetry::metrics::MetricsError),

    /// An `OTEL_EXPORTER_OTLP_HEADERS` entry is not a valid gRPC metadata pair.
    #[error("invalid exporter header {key:?}: {reason}")]
    InvalidHeader { key: String, reason: String },

    /// A global `tracing` subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for setup operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
