//! Exporter pipeline: tracer provider, meter provider and propagator.
//!
//! [`install`] wires the global OpenTelemetry state from a
//! [`TelemetryConfig`]. It never fails: any exporter that cannot be built is
//! logged and skipped, leaving spans to be created locally.

use std::sync::Once;
use std::time::Duration;

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{self as sdktrace, TracerProvider as SdkTracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

use super::metrics::reset_instruments;
use super::propagation::propagator_for;
use super::tracer::tracer_registry;
use crate::config::{ExporterKind, TelemetryConfig};
use crate::error::{Result, TelemetryError};

/// Namespace reported as `service.namespace`.
pub const SERVICE_NAMESPACE: &str = "waypoint";

/// How often metrics are pushed to the OTLP collector.
const METRICS_EXPORT_PERIOD: Duration = Duration::from_secs(10);

static ERROR_HANDLER: Once = Once::new();

/// Owns the installed providers; flushes and shuts them down on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    exporter: Option<ExporterKind>,
}

impl TelemetryGuard {
    /// The installed tracer provider, for bridging `tracing` events.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    /// The exporter that was installed, `None` in local mode.
    pub fn exporter(&self) -> Option<ExporterKind> {
        self.exporter
    }

    /// Flush pending spans and metrics, then shut both providers down.
    pub fn shutdown(mut self) {
        self.shutdown_providers();
    }

    fn shutdown_providers(&mut self) {
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::debug!(error = %e, "Failed to shutdown meter provider");
            }
        }
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::debug!(error = %e, "Failed to shutdown tracer provider");
            }
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.shutdown_providers();
    }
}

/// Install the global telemetry pipeline described by `config`.
///
/// Sets the global tracer provider, meter provider and propagator, and
/// resets the tracer and instrument caches so later lookups bind to the
/// new providers. Keep the returned guard alive for the life of the process.
pub fn install(config: &TelemetryConfig) -> TelemetryGuard {
    install_error_handler();

    let exporter = match config.exporter_kind() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::warn!(error = %e, "Trace export disabled");
            None
        }
    };

    let resource = build_resource(config);
    let tracer_provider = build_tracer_provider(config, exporter, resource.clone());
    let meter_provider = build_meter_provider(config, exporter, resource);

    global::set_tracer_provider(tracer_provider.clone());
    global::set_meter_provider(meter_provider.clone());
    global::set_text_map_propagator(propagator_for(exporter));

    tracer_registry().reset();
    reset_instruments();

    tracing::info!(
        service = config.service_name(),
        exporter = exporter.map(ExporterKind::as_str).unwrap_or("none"),
        debug = config.debug_enabled(),
        "Telemetry pipeline installed"
    );

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        meter_provider: Some(meter_provider),
        exporter,
    }
}

/// Route OpenTelemetry internal errors (mostly failed exports) to `debug`.
fn install_error_handler() {
    ERROR_HANDLER.call_once(|| {
        let installed = global::set_error_handler(|err| {
            tracing::debug!(error = %err, "Telemetry export error");
        });
        if let Err(e) = installed {
            tracing::debug!(error = %e, "Failed to install telemetry error handler");
        }
    });
}

/// Resource attributes describing this service.
///
/// `OTEL_RESOURCE_ATTRIBUTES` entries override the built-in ones.
pub fn build_resource(config: &TelemetryConfig) -> Resource {
    let builtin = Resource::new([
        KeyValue::new("service.name", config.service_name().to_string()),
        KeyValue::new("service.namespace", SERVICE_NAMESPACE),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("deployment.environment", config.environment.clone()),
        KeyValue::new("deployment.id", config.deployment_id.clone()),
    ]);
    Resource::default()
        .merge(&builtin)
        .merge(&Resource::new(config.resource_attribute_pairs()))
}

/// Tracer provider for `exporter`, plus stdout when debug output is enabled.
pub fn build_tracer_provider(
    config: &TelemetryConfig,
    exporter: Option<ExporterKind>,
    resource: Resource,
) -> SdkTracerProvider {
    let has_runtime = tokio::runtime::Handle::try_current().is_ok();
    let mut builder = SdkTracerProvider::builder()
        .with_config(sdktrace::Config::default().with_resource(resource));

    let endpoint = match exporter {
        Some(ExporterKind::Otlp) | Some(ExporterKind::Xray) => Some(config.otlp_endpoint.as_str()),
        Some(ExporterKind::Jaeger) => Some(config.jaeger_endpoint.as_str()),
        Some(ExporterKind::Console) | None => None,
    };

    if let Some(endpoint) = endpoint {
        if has_runtime {
            match otlp_span_exporter(endpoint, &config.otlp_header_pairs()) {
                Ok(span_exporter) => {
                    builder = builder.with_batch_exporter(span_exporter, runtime::Tokio);
                    tracing::info!(endpoint, "OTLP span exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, endpoint, "Failed to create OTLP span exporter, spans stay local");
                }
            }
        } else {
            tracing::warn!(endpoint, "No tokio runtime, OTLP span export disabled");
        }
    }

    let console = exporter == Some(ExporterKind::Console) || config.debug_enabled();
    if console {
        let stdout = opentelemetry_stdout::SpanExporter::default();
        builder = if has_runtime {
            builder.with_batch_exporter(stdout, runtime::Tokio)
        } else {
            builder.with_simple_exporter(stdout)
        };
    }

    builder.build()
}

/// Meter provider: OTLP push for network exporters, otherwise a manual
/// reader (metrics are recorded but not exported).
pub fn build_meter_provider(
    config: &TelemetryConfig,
    exporter: Option<ExporterKind>,
    resource: Resource,
) -> SdkMeterProvider {
    let endpoint = match exporter {
        Some(ExporterKind::Otlp) | Some(ExporterKind::Xray) => Some(config.otlp_endpoint.as_str()),
        Some(ExporterKind::Jaeger) | Some(ExporterKind::Console) | None => None,
    };

    if let Some(endpoint) = endpoint {
        if tokio::runtime::Handle::try_current().is_ok() {
            match otlp_meter_provider(endpoint, &config.otlp_header_pairs(), resource.clone()) {
                Ok(provider) => {
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                    return provider;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP metrics exporter, using no-op metrics");
                }
            }
        }
    }

    let reader = ManualReader::builder().build();
    SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build()
}

fn otlp_span_exporter(
    endpoint: &str,
    headers: &[(String, String)],
) -> Result<opentelemetry_otlp::SpanExporter> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc)
        .with_metadata(metadata_from_pairs(headers)?)
        .build_span_exporter()?;
    Ok(exporter)
}

fn otlp_meter_provider(
    endpoint: &str,
    headers: &[(String, String)],
    resource: Resource,
) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc)
        .with_metadata(metadata_from_pairs(headers)?);

    let provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(exporter)
        .with_period(METRICS_EXPORT_PERIOD)
        .with_resource(resource)
        .build()?;
    Ok(provider)
}

/// gRPC metadata from `key=value` header pairs.
pub fn metadata_from_pairs(pairs: &[(String, String)]) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes()).map_err(|e| {
            TelemetryError::InvalidHeader {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;
        let value = MetadataValue::<Ascii>::try_from(value.as_str()).map_err(|e| {
            TelemetryError::InvalidHeader {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;
        metadata.insert(name, value);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span as _, Tracer as _, TracerProvider as _};
    use opentelemetry::Key;

    fn resource_value(resource: &Resource, key: &'static str) -> Option<String> {
        resource
            .get(Key::from_static_str(key))
            .map(|value| value.as_str().into_owned())
    }

    #[test]
    fn test_resource_carries_service_identity() {
        let config = TelemetryConfig {
            service_name: Some("checkout".into()),
            environment: "staging".into(),
            deployment_id: "d-17".into(),
            ..TelemetryConfig::default()
        };

        let resource = build_resource(&config);

        assert_eq!(resource_value(&resource, "service.name").as_deref(), Some("checkout"));
        assert_eq!(resource_value(&resource, "service.namespace").as_deref(), Some("waypoint"));
        assert_eq!(resource_value(&resource, "deployment.environment").as_deref(), Some("staging"));
        assert_eq!(resource_value(&resource, "deployment.id").as_deref(), Some("d-17"));
        assert!(resource_value(&resource, "service.version").is_some());
    }

    #[test]
    fn test_resource_attributes_override_builtins() {
        let config = TelemetryConfig {
            resource_attributes: "team=payments, deployment.environment=prod".into(),
            ..TelemetryConfig::default()
        };

        let resource = build_resource(&config);

        assert_eq!(resource_value(&resource, "team").as_deref(), Some("payments"));
        assert_eq!(resource_value(&resource, "deployment.environment").as_deref(), Some("prod"));
    }

    #[test]
    fn test_metadata_from_valid_pairs() {
        let pairs = vec![
            ("x-api-key".to_string(), "secret".to_string()),
            ("x-tenant".to_string(), "acme".to_string()),
        ];

        let metadata = metadata_from_pairs(&pairs).unwrap();

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get("x-api-key").unwrap().to_str().unwrap(), "secret");
    }

    #[test]
    fn test_metadata_rejects_invalid_key() {
        let pairs = vec![("bad key".to_string(), "v".to_string())];

        let err = metadata_from_pairs(&pairs).unwrap_err();

        assert!(matches!(err, TelemetryError::InvalidHeader { ref key, .. } if key == "bad key"));
    }

    #[test]
    fn test_local_provider_generates_valid_ids_without_runtime() {
        let config = TelemetryConfig::default();
        let provider = build_tracer_provider(&config, None, build_resource(&config));

        let mut span = provider.tracer("local").start("local-span");
        assert!(span.span_context().is_valid());
        span.end();
        provider.shutdown().unwrap();
    }

    #[test]
    fn test_network_exporter_without_runtime_degrades() {
        let config = TelemetryConfig {
            exporter: Some("otlp".into()),
            ..TelemetryConfig::default()
        };
        let provider = build_tracer_provider(&config, Some(ExporterKind::Otlp), Resource::empty());

        let mut span = provider.tracer("degraded").start("no-export");
        assert!(span.span_context().is_valid());
        span.end();
    }
}
