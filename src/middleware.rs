//! Tower middleware creating one server span per HTTP request.
//!
//! The span continues any trace carried by the inbound headers, is current
//! while the inner service runs, and is closed exactly once: when the
//! response (or error) is produced, or when the response future is dropped.

use std::fmt;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::ConnectInfo;
use futures::future::BoxFuture;
use http::{header, HeaderMap, Request, Response};
use http_body::Body;
use opentelemetry::trace::{FutureExt, SpanKind, Status};
use opentelemetry::KeyValue;
use opentelemetry_http::HeaderExtractor;
use tower::{Layer, Service};
use uuid::Uuid;

use crate::observability::metrics::record_http_request;
use crate::observability::propagation::extract_context;
use crate::observability::span::OpenSpan;
use crate::observability::tracer::{get_tracer, Tracer};

/// Tracer name used for request spans.
pub const MIDDLEWARE_TRACER: &str = "waypoint::middleware";

/// Layer adding request spans and request metrics.
#[derive(Clone, Debug, Default)]
pub struct TelemetryLayer {
    tracer: Option<Tracer>,
}

impl TelemetryLayer {
    /// Layer using the global tracer provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start request spans from `tracer` instead of the global provider.
    pub fn with_tracer(tracer: Tracer) -> Self {
        Self {
            tracer: Some(tracer),
        }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            tracer: self.tracer.clone(),
        }
    }
}

/// Service produced by [`TelemetryLayer`].
#[derive(Clone, Debug)]
pub struct TelemetryService<S> {
    inner: S,
    tracer: Option<Tracer>,
}

impl<S, B, ResBody> Service<Request<B>> for TelemetryService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
    ResBody: Body + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let tracer = self
            .tracer
            .clone()
            .unwrap_or_else(|| get_tracer(MIDDLEWARE_TRACER));
        let parent = extract_context(&HeaderExtractor(req.headers()));
        let method = req.method().as_str().to_owned();
        let name = format!("{} {}", method, req.uri().path());
        let span = OpenSpan::start_with_parent(
            &tracer,
            name.into(),
            SpanKind::Server,
            request_attributes(&req),
            &parent,
            false,
        );
        let started = Instant::now();

        let cx = span.context().clone();
        let future = {
            let _attached = cx.clone().attach();
            inner.call(req)
        };

        Box::pin(async move {
            let result = future.with_context(cx).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            span.set_attribute(KeyValue::new("http.request_duration_ms", duration_ms));

            match &result {
                Ok(response) => {
                    let status = response.status();
                    span.set_attribute(KeyValue::new(
                        "http.status_code",
                        i64::from(status.as_u16()),
                    ));
                    span.set_attribute(KeyValue::new(
                        "http.response_content_length",
                        response_content_length(response) as i64,
                    ));
                    if status.is_server_error() {
                        span.set_status(Status::error(format!("HTTP {}", status.as_u16())));
                    } else {
                        span.set_ok();
                    }
                    record_http_request(&method, status.as_u16(), duration_ms);
                }
                Err(err) => {
                    span.set_attribute(KeyValue::new("error", true));
                    span.set_attribute(KeyValue::new(
                        "error.type",
                        std::any::type_name::<S::Error>(),
                    ));
                    span.set_attribute(KeyValue::new("error.message", err.to_string()));
                    span.record_error(err, Vec::new());
                    record_http_request(&method, 500, duration_ms);
                }
            }
            result
        })
    }
}

fn request_attributes<B>(req: &Request<B>) -> Vec<KeyValue> {
    let headers = req.headers();
    let mut attributes = vec![
        KeyValue::new("http.method", req.method().as_str().to_owned()),
        KeyValue::new("http.url", request_url(req)),
        KeyValue::new("http.request_id", Uuid::now_v7().to_string()),
    ];
    if let Some(host) = header_str(headers, header::HOST).or_else(|| req.uri().host()) {
        attributes.push(KeyValue::new("http.host", host.to_owned()));
    }
    if let Some(user_agent) = header_str(headers, header::USER_AGENT) {
        attributes.push(KeyValue::new("http.user_agent", user_agent.to_owned()));
    }
    if let Some(client_ip) = client_ip(req) {
        attributes.push(KeyValue::new("http.client_ip", client_ip));
    }
    attributes
}

/// Absolute URL of the request.
///
/// Server-side URIs usually carry only the path, so the scheme comes from
/// `X-Forwarded-Proto` (default `http`) and the authority from `Host`.
/// Without a host only the path and query are known.
fn request_url<B>(req: &Request<B>) -> String {
    let uri = req.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let Some(host) = header_str(req.headers(), header::HOST) else {
        return path.to_owned();
    };
    let scheme = header_str(req.headers(), "x-forwarded-proto")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|scheme| !scheme.is_empty())
        .unwrap_or("http");
    format!("{scheme}://{host}{path}")
}

/// First `X-Forwarded-For` hop, else the peer address of the connection.
fn client_ip<B>(req: &Request<B>) -> Option<String> {
    let forwarded = header_str(req.headers(), "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_owned());
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn response_content_length<B: Body>(response: &Response<B>) -> u64 {
    header_str(response.headers(), header::CONTENT_LENGTH)
        .and_then(|value| value.parse().ok())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0)
}

fn header_str<K: header::AsHeaderName>(headers: &HeaderMap, key: K) -> Option<&str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}
