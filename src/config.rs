//! Configuration parsing for Waypoint.
//!
//! Supports:
//! - CLI arguments via clap
//! - Standard `OTEL_*` environment variables
//! - Safe defaults: with nothing configured, spans are created locally and
//!   nothing is exported

use clap::{Args, Parser};
use opentelemetry::KeyValue;

use crate::error::ConfigError;

/// Default OTLP collector endpoint (gRPC).
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Default Jaeger collector endpoint. Jaeger ingests OTLP/gRPC directly.
pub const DEFAULT_JAEGER_ENDPOINT: &str = "http://localhost:4317";

/// Service name used when neither `OTEL_SERVICE_NAME` nor `APP_NAME` is set.
pub const DEFAULT_SERVICE_NAME: &str = "waypoint";

/// Tracing backend selected by `OTEL_EXPORTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    /// OTLP export with AWS X-Ray trace header propagation.
    Xray,
    /// Plain OTLP export.
    Otlp,
    /// Jaeger collector (OTLP ingest) with Jaeger header propagation.
    Jaeger,
    /// Spans printed to stdout.
    Console,
}

impl ExporterKind {
    /// Parse an exporter name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "xray" => Ok(Self::Xray),
            "otlp" => Ok(Self::Otlp),
            "jaeger" => Ok(Self::Jaeger),
            "console" => Ok(Self::Console),
            _ => Err(ConfigError::UnknownExporter(name.to_string())),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xray => "xray",
            Self::Otlp => "otlp",
            Self::Jaeger => "jaeger",
            Self::Console => "console",
        }
    }
}

/// Log line format for the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                name: "LOG_FORMAT",
                value: name.to_string(),
            }),
        }
    }
}

/// Parse a boolean switch such as `OTEL_DEBUG`.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case; blank
/// means off.
pub fn parse_switch(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}

/// Telemetry settings, read from the standard `OTEL_*` environment.
///
/// Usable on its own through [`TelemetryConfig::from_env`] or flattened into a
/// binary's clap `Parser`. Every field is taken as raw text so a malformed
/// value never fails argument parsing; the typed accessors fall back to
/// defaults and [`TelemetryConfig::invalid_settings`] reports what was ignored.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Tracing backend (xray, otlp, jaeger, console). Unset means local only
    #[arg(long = "otel-exporter", env = "OTEL_EXPORTER")]
    pub exporter: Option<String>,

    /// Also print spans to stdout (true/false)
    #[arg(long = "otel-debug", env = "OTEL_DEBUG")]
    pub debug: Option<String>,

    /// OTLP collector endpoint
    #[arg(long = "otlp-endpoint", env = "OTEL_EXPORTER_OTLP_ENDPOINT", default_value = DEFAULT_OTLP_ENDPOINT)]
    pub otlp_endpoint: String,

    /// Extra OTLP headers as comma-separated key=value pairs
    #[arg(long = "otlp-headers", env = "OTEL_EXPORTER_OTLP_HEADERS", default_value = "")]
    pub otlp_headers: String,

    /// Jaeger collector endpoint
    #[arg(long = "jaeger-endpoint", env = "OTEL_EXPORTER_JAEGER_ENDPOINT", default_value = DEFAULT_JAEGER_ENDPOINT)]
    pub jaeger_endpoint: String,

    /// Service name reported on every span
    #[arg(long = "service-name", env = "OTEL_SERVICE_NAME")]
    pub service_name: Option<String>,

    /// Application name, used when no service name is set
    #[arg(long = "app-name", env = "APP_NAME", hide = true)]
    pub app_name: Option<String>,

    /// Extra resource attributes as comma-separated key=value pairs
    #[arg(long = "resource-attributes", env = "OTEL_RESOURCE_ATTRIBUTES", default_value = "")]
    pub resource_attributes: String,

    /// Deployment environment (dev, staging, prod, ...)
    #[arg(long, env = "ENVIRONMENT", default_value = "dev")]
    pub environment: String,

    /// Deployment identifier
    #[arg(long = "deployment-id", env = "DEPLOYMENT_ID", default_value = "unknown")]
    pub deployment_id: String,

    /// Log line format (text, json)
    #[arg(long = "log-format", env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Parses only the environment into a [`TelemetryConfig`].
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
struct EnvOnly {
    #[command(flatten)]
    telemetry: TelemetryConfig,
}

impl TelemetryConfig {
    /// Read the configuration from the environment.
    ///
    /// Never fails: a malformed value falls back to the defaults, so telemetry
    /// misconfiguration cannot stop a service from starting.
    pub fn from_env() -> Self {
        match EnvOnly::try_parse_from([env!("CARGO_PKG_NAME")]) {
            Ok(parsed) => parsed.telemetry,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid telemetry configuration, using defaults");
                Self::default()
            }
        }
    }

    /// The configured exporter, if any.
    pub fn exporter_kind(&self) -> Result<Option<ExporterKind>, ConfigError> {
        match self.exporter.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => ExporterKind::from_name(name).map(Some),
        }
    }

    /// Whether spans are also printed to stdout. Invalid values mean off.
    pub fn debug_enabled(&self) -> bool {
        self.debug
            .as_deref()
            .and_then(|raw| parse_switch("OTEL_DEBUG", raw).ok())
            .unwrap_or(false)
    }

    /// Log line format. Invalid values mean [`LogFormat::Text`].
    pub fn log_format(&self) -> LogFormat {
        self.log_format
            .as_deref()
            .and_then(|raw| LogFormat::from_name(raw).ok())
            .unwrap_or_default()
    }

    /// Settings whose values were ignored in favor of their defaults.
    ///
    /// An unknown exporter is not listed here; [`crate::install`] reports it.
    pub fn invalid_settings(&self) -> Vec<ConfigError> {
        let mut invalid = Vec::new();
        if let Some(Err(e)) = self.debug.as_deref().map(|raw| parse_switch("OTEL_DEBUG", raw)) {
            invalid.push(e);
        }
        if let Some(Err(e)) = self.log_format.as_deref().map(LogFormat::from_name) {
            invalid.push(e);
        }
        invalid
    }

    /// Service name: `OTEL_SERVICE_NAME`, then `APP_NAME`, then the default.
    pub fn service_name(&self) -> &str {
        self.service_name
            .as_deref()
            .or(self.app_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_SERVICE_NAME)
    }

    /// Parsed OTLP headers.
    pub fn otlp_header_pairs(&self) -> Vec<(String, String)> {
        parse_key_value_list(&self.otlp_headers)
    }

    /// Parsed extra resource attributes.
    pub fn resource_attribute_pairs(&self) -> Vec<KeyValue> {
        parse_key_value_list(&self.resource_attributes)
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            exporter: None,
            debug: None,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.into(),
            otlp_headers: String::new(),
            jaeger_endpoint: DEFAULT_JAEGER_ENDPOINT.into(),
            service_name: None,
            app_name: None,
            resource_attributes: String::new(),
            environment: "dev".into(),
            deployment_id: "unknown".into(),
            log_format: None,
        }
    }
}

/// Parse `key=value` pairs separated by commas.
///
/// Entries are split on the first `=` and trimmed; entries without `=` or
/// with an empty key are skipped.
pub fn parse_key_value_list(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Waypoint: probe service instrumented with the telemetry facade.
#[derive(Parser, Debug, Clone)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "WAYPOINT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "WAYPOINT_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    ///
    /// Exits on an invalid host or port; telemetry settings never fail here.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            log_level: "debug".into(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            log_level: "info".into(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.telemetry.exporter_kind(), Ok(None));
        assert!(!config.telemetry.debug_enabled());
        assert_eq!(config.telemetry.log_format(), LogFormat::Text);
        assert!(config.telemetry.invalid_settings().is_empty());
    }

    #[test]
    fn test_test_config_binds_random_port() {
        let config = Config::test_config();
        assert_eq!(config.port, 0);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_exporter_names() {
        assert_eq!(ExporterKind::from_name("xray"), Ok(ExporterKind::Xray));
        assert_eq!(ExporterKind::from_name(" OTLP "), Ok(ExporterKind::Otlp));
        assert_eq!(ExporterKind::from_name("Jaeger"), Ok(ExporterKind::Jaeger));
        assert_eq!(ExporterKind::from_name("console"), Ok(ExporterKind::Console));
        assert_eq!(
            ExporterKind::from_name("custom"),
            Err(ConfigError::UnknownExporter("custom".into()))
        );
        assert_eq!(ExporterKind::Jaeger.as_str(), "jaeger");
    }

    #[test]
    fn test_blank_exporter_is_unset() {
        let config = TelemetryConfig {
            exporter: Some("  ".into()),
            ..TelemetryConfig::default()
        };
        assert_eq!(config.exporter_kind(), Ok(None));
    }

    #[test]
    fn test_parse_key_value_list() {
        let pairs = parse_key_value_list("team=payments, tier = gold,broken,=nokey,url=a=b");
        assert_eq!(
            pairs,
            vec![
                ("team".to_string(), "payments".to_string()),
                ("tier".to_string(), "gold".to_string()),
                ("url".to_string(), "a=b".to_string()),
            ]
        );
        assert!(parse_key_value_list("").is_empty());
    }

    #[test]
    fn test_service_name_fallbacks() {
        let mut config = TelemetryConfig::default();
        assert_eq!(config.service_name(), DEFAULT_SERVICE_NAME);

        config.app_name = Some("bootstrap-app".into());
        assert_eq!(config.service_name(), "bootstrap-app");

        config.service_name = Some("checkout".into());
        assert_eq!(config.service_name(), "checkout");
    }

    #[test]
    fn test_parse_cli_flags() {
        let config = Config::try_parse_from([
            "waypoint",
            "--port",
            "9000",
            "--otel-exporter",
            "otlp",
            "--otel-debug",
            "true",
            "--otlp-headers",
            "x-api-key=secret",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.telemetry.exporter_kind(), Ok(Some(ExporterKind::Otlp)));
        assert!(config.telemetry.debug_enabled());
        assert_eq!(
            config.telemetry.otlp_header_pairs(),
            vec![("x-api-key".to_string(), "secret".to_string())]
        );
        assert_eq!(config.telemetry.log_format(), LogFormat::Json);
    }

    #[test]
    fn test_malformed_telemetry_flags_still_parse() {
        let config = Config::try_parse_from([
            "waypoint",
            "--otel-debug",
            "enabled",
            "--log-format",
            "yaml",
        ])
        .unwrap();

        assert!(!config.telemetry.debug_enabled());
        assert_eq!(config.telemetry.log_format(), LogFormat::Text);
        assert_eq!(
            config.telemetry.invalid_settings(),
            vec![
                ConfigError::InvalidValue {
                    name: "OTEL_DEBUG",
                    value: "enabled".into()
                },
                ConfigError::InvalidValue {
                    name: "LOG_FORMAT",
                    value: "yaml".into()
                },
            ]
        );
    }

    #[test]
    fn test_invalid_port_is_still_fatal() {
        assert!(Config::try_parse_from(["waypoint", "--port", "http"]).is_err());
    }

    #[test]
    fn test_switch_and_format_ignore_case() {
        assert_eq!(parse_switch("OTEL_DEBUG", "TRUE"), Ok(true));
        assert_eq!(parse_switch("OTEL_DEBUG", " On "), Ok(true));
        assert_eq!(parse_switch("OTEL_DEBUG", "0"), Ok(false));
        assert_eq!(parse_switch("OTEL_DEBUG", ""), Ok(false));
        assert_eq!(LogFormat::from_name("JSON"), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_name("Text"), Ok(LogFormat::Text));
    }

    #[test]
    fn test_resource_attribute_pairs() {
        let config = TelemetryConfig {
            resource_attributes: "team=payments,region=eu-west-1".into(),
            ..TelemetryConfig::default()
        };
        let attrs = config.resource_attribute_pairs();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0], KeyValue::new("team", "payments"));
        assert_eq!(attrs[1], KeyValue::new("region", "eu-west-1"));
    }
}
