//! Waypoint: HTTP probe service instrumented with the telemetry facade.
//!
//! # Usage
//!
//! ```bash
//! waypoint --port 8000 --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `WAYPOINT_PORT`: Port to listen on
//! - `OTEL_EXPORTER`: Tracing backend (xray, otlp, jaeger, console)
//! - `OTEL_SERVICE_NAME`: Service name reported on every span
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context as _;
use tokio::sync::watch;
use waypoint::config::{Config, ExporterKind};
use waypoint::observability::exporter::install;
use waypoint::observability::logging::init_logging;
use waypoint::server::run_server;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config, exporter: Option<ExporterKind>) {
    let version = env!("CARGO_PKG_VERSION");
    let exporter = exporter.map(ExporterKind::as_str).unwrap_or("none");
    eprintln!(
        r#"
  __      __                      _       _
  \ \    / /_ _ _  _ _ __  ___ (_)_ _ | |_
   \ \/\/ / _` | || | '_ \/ _ \| | ' \|  _|
    \_/\_/\__,_|\_, | .__/\___/|_|_||_|\__|
                |__/|_|

  Waypoint v{} - Telemetry Probe Service

  Configuration:
    Address:    {}:{}
    Service:    {}
    Exporter:   {}
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.host,
        config.port,
        config.telemetry.service_name(),
        exporter,
        config.log_level
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize logging first so pipeline diagnostics are visible
    let logging = init_logging(&config.log_level, config.telemetry.log_format())?;
    for invalid in config.telemetry.invalid_settings() {
        tracing::warn!(error = %invalid, "Ignoring invalid telemetry setting");
    }

    // Install the telemetry pipeline (never fails; degrades to local spans)
    let telemetry = install(&config.telemetry);

    // Bridge tracing spans into the tracer provider
    if let Some(provider) = telemetry.tracer_provider() {
        if let Err(e) = logging.bridge_traces(provider) {
            tracing::warn!(error = %e, "Failed to bridge tracing spans to OpenTelemetry");
        }
    }

    // Print startup banner
    print_banner(&config, telemetry.exporter());

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Run the server
    let served = run_server(config, shutdown_rx).await;

    // Flush spans and metrics before exiting, even if serving failed
    telemetry.shutdown();
    served.map_err(|e| anyhow::anyhow!(e)).context("server failed")?;

    tracing::info!("Waypoint shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}
