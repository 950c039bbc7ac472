//! Structured logging setup.
//!
//! Configures the global `tracing` subscriber with:
//! - Environment-based filter (via RUST_LOG)
//! - Text or JSON log lines
//! - A bridge exporting `tracing` spans through the OpenTelemetry pipeline
//!
//! Logging comes up before the pipeline so that pipeline diagnostics are
//! visible; the bridge is attached afterwards through [`LoggingHandle`].

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{Tracer as SdkTracer, TracerProvider as SdkTracerProvider};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use super::tracer::DEFAULT_TRACER_NAME;
use crate::config::LogFormat;
use crate::error::{Result, TelemetryError};

type TraceBridge = Option<OpenTelemetryLayer<Registry, SdkTracer>>;

/// Handle to the installed subscriber's OpenTelemetry bridge.
#[derive(Clone)]
pub struct LoggingHandle {
    bridge: reload::Handle<TraceBridge, Registry>,
}

impl std::fmt::Debug for LoggingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingHandle").finish_non_exhaustive()
    }
}

impl LoggingHandle {
    /// Export `tracing` spans through `provider` from now on.
    pub fn bridge_traces(&self, provider: &SdkTracerProvider) -> Result<()> {
        let layer = tracing_opentelemetry::layer().with_tracer(provider.tracer(DEFAULT_TRACER_NAME));
        self.bridge
            .reload(Some(layer))
            .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;
        tracing::debug!("Tracing bridge attached to tracer provider");
        Ok(())
    }
}

/// Initialize logging.
///
/// `level` is the filter used when `RUST_LOG` is unset or invalid. Call
/// [`LoggingHandle::bridge_traces`] once a tracer provider exists so that
/// `tracing` spans are exported alongside the facade's own spans and log
/// lines can be correlated with traces.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(level: &str, format: LogFormat) -> Result<LoggingHandle> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (bridge, handle) = reload::Layer::new(TraceBridge::None);

    let registry = tracing_subscriber::registry().with(bridge).with(filter);

    let installed = match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(level, ?format, "Logging initialized");
    Ok(LoggingHandle { bridge: handle })
}

/// Initialize logging for tests (only logs errors).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
