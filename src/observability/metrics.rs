//! Metric instruments, cached by name.
//!
//! Instruments are created on first use from the global meter and reused
//! afterwards, so every call site asking for `orders.created` adds to the
//! same series.
//!
//! Built-in metrics:
//! - http.server.requests: Counter of handled HTTP requests
//! - http.server.duration: Histogram of HTTP request latency in milliseconds

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

/// Meter name used for all facade instruments.
pub const METER_NAME: &str = "waypoint";

/// Unit used for counters when the caller passes none.
pub const DEFAULT_COUNTER_UNIT: &str = "1";

/// Unit used for histograms when the caller passes none.
pub const DEFAULT_HISTOGRAM_UNIT: &str = "ms";

/// Counter of handled HTTP requests.
pub const HTTP_SERVER_REQUESTS: &str = "http.server.requests";

/// Histogram of HTTP request latency.
pub const HTTP_SERVER_DURATION: &str = "http.server.duration";

/// Name-keyed cache of counters and histograms over one meter.
pub struct InstrumentRegistry {
    meter: RwLock<Meter>,
    counters: RwLock<HashMap<String, Counter<u64>>>,
    histograms: RwLock<HashMap<String, Histogram<f64>>>,
}

impl InstrumentRegistry {
    /// Registry creating instruments from `meter`.
    pub fn new(meter: Meter) -> Self {
        Self {
            meter: RwLock::new(meter),
            counters: RwLock::default(),
            histograms: RwLock::default(),
        }
    }

    /// Get or create the counter called `name`.
    ///
    /// Description and unit only apply on creation.
    pub fn counter(&self, name: &str, description: &str, unit: &str) -> Counter<u64> {
        if let Some(counter) = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return counter.clone();
        }

        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters
            .entry(name.to_string())
            .or_insert_with(|| {
                self.meter()
                    .u64_counter(name.to_string())
                    .with_description(description.to_string())
                    .with_unit(unit.to_string())
                    .init()
            })
            .clone()
    }

    /// Get or create the histogram called `name`.
    pub fn histogram(&self, name: &str, description: &str, unit: &str) -> Histogram<f64> {
        if let Some(histogram) = self
            .histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return histogram.clone();
        }

        let mut histograms = self
            .histograms
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        histograms
            .entry(name.to_string())
            .or_insert_with(|| {
                self.meter()
                    .f64_histogram(name.to_string())
                    .with_description(description.to_string())
                    .with_unit(unit.to_string())
                    .init()
            })
            .clone()
    }

    /// Number of cached instruments of both kinds.
    pub fn len(&self) -> usize {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner).len();
        let histograms = self
            .histograms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        counters + histograms
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Switch to `meter` and forget every cached instrument.
    pub(crate) fn reset(&self, meter: Meter) {
        *self.meter.write().unwrap_or_else(PoisonError::into_inner) = meter;
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.histograms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn meter(&self) -> Meter {
        self.meter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentRegistry")
            .field("instruments", &self.len())
            .finish()
    }
}

/// Global instrument registry.
static INSTRUMENTS: OnceLock<InstrumentRegistry> = OnceLock::new();

/// The process-wide instrument registry over the global meter.
pub fn instrument_registry() -> &'static InstrumentRegistry {
    INSTRUMENTS.get_or_init(|| InstrumentRegistry::new(global::meter(METER_NAME)))
}

/// Rebind the global registry to the current global meter provider.
pub(crate) fn reset_instruments() {
    instrument_registry().reset(global::meter(METER_NAME));
}

/// Get or create a process-wide counter.
///
/// `unit` defaults to [`DEFAULT_COUNTER_UNIT`].
pub fn create_metrics_counter(name: &str, description: &str, unit: Option<&str>) -> Counter<u64> {
    instrument_registry().counter(name, description, unit.unwrap_or(DEFAULT_COUNTER_UNIT))
}

/// Get or create a process-wide histogram.
///
/// `unit` defaults to [`DEFAULT_HISTOGRAM_UNIT`].
pub fn create_metrics_histogram(
    name: &str,
    description: &str,
    unit: Option<&str>,
) -> Histogram<f64> {
    instrument_registry().histogram(name, description, unit.unwrap_or(DEFAULT_HISTOGRAM_UNIT))
}

/// Record one handled HTTP request.
pub fn record_http_request(method: &str, status: u16, duration_ms: f64) {
    let attrs = [
        KeyValue::new("http.method", method.to_string()),
        KeyValue::new("http.status_code", i64::from(status)),
    ];
    create_metrics_counter(HTTP_SERVER_REQUESTS, "Total number of HTTP requests", None)
        .add(1, &attrs);
    create_metrics_histogram(HTTP_SERVER_DURATION, "HTTP request duration", None)
        .record(duration_ms, &attrs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::data::{self, ResourceMetrics};
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::runtime;
    use opentelemetry_sdk::testing::metrics::InMemoryMetricsExporter;

    fn harness() -> (InMemoryMetricsExporter, SdkMeterProvider, InstrumentRegistry) {
        let exporter = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(exporter.clone(), runtime::Tokio).build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        let registry = InstrumentRegistry::new(provider.meter("metrics-tests"));
        (exporter, provider, registry)
    }

    fn counter_total(metrics: &[ResourceMetrics], name: &str) -> u64 {
        metrics
            .iter()
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter())
            .filter(|m| m.name == name)
            .filter_map(|m| m.data.as_any().downcast_ref::<data::Sum<u64>>())
            .flat_map(|sum| sum.data_points.iter())
            .map(|point| point.value)
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_registry_caches_by_name() {
        let registry = InstrumentRegistry::new(global::meter("cache-test"));
        let _ = registry.counter("jobs", "Jobs", DEFAULT_COUNTER_UNIT);
        let _ = registry.counter("jobs", "ignored", "ignored");
        let _ = registry.histogram("latency", "Latency", DEFAULT_HISTOGRAM_UNIT);
        assert_eq!(registry.len(), 2);

        registry.reset(global::meter("cache-test"));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_repeated_lookups_share_one_series() {
        let (exporter, provider, registry) = harness();

        for _ in 0..5 {
            registry
                .counter("orders.created", "Orders created", DEFAULT_COUNTER_UNIT)
                .add(1, &[]);
        }
        provider.force_flush().unwrap();

        let metrics = exporter.get_finished_metrics().unwrap();
        assert_eq!(counter_total(&metrics, "orders.created"), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_histogram_records_values() {
        let (exporter, provider, registry) = harness();

        let histogram = registry.histogram("work.duration", "Work", DEFAULT_HISTOGRAM_UNIT);
        histogram.record(1.5, &[]);
        histogram.record(2.5, &[]);
        provider.force_flush().unwrap();

        let metrics = exporter.get_finished_metrics().unwrap();
        let metric = metrics
            .iter()
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter())
            .find(|m| m.name == "work.duration")
            .expect("histogram exported");
        assert_eq!(metric.unit, "ms");
        let histogram = metric
            .data
            .as_any()
            .downcast_ref::<data::Histogram<f64>>()
            .expect("f64 histogram");
        assert_eq!(histogram.data_points[0].count, 2);
        assert_eq!(histogram.data_points[0].sum, 4.0);
    }

    #[test]
    fn test_record_http_request_without_pipeline() {
        // Should not panic with the no-op meter provider.
        record_http_request("GET", 200, 1.0);
        record_http_request("POST", 503, 12.5);
    }
}
