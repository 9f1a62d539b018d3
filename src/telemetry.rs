//! Shared telemetry bootstrap for Shortstack binaries.
//!
//! One call per binary wires structured logging (JSON), the OTLP trace
//! exporter (only when `TRACING_COLLECTOR_ADDR` is configured), the W3C
//! trace-context propagator used for bus-message headers, and an OTel meter
//! provider backed by a Prometheus registry so counters surface at
//! `GET /metrics`.

use crate::{Error, Result};

use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, TracerProvider};
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;
use tonic::Code;
use tracing::{info, info_span, Instrument, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";

/// Handle that keeps telemetry SDK providers alive for process lifetime.
pub struct Telemetry {
    service_name: String,
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
    registry: prometheus::Registry,
}

impl Telemetry {
    /// Initialize shared tracing + OTel SDK providers for a binary.
    ///
    /// `collector_addr` is the OTLP gRPC endpoint; when `None`, spans stay
    /// local and only logging + metrics are active.
    pub fn init(
        service_name: &str,
        collector_addr: Option<&str>,
        log_level: &str,
    ) -> Result<Self> {
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .json()
            .try_init()
            .map_err(|e| {
                Error::Config(format!("failed to initialize telemetry subscriber: {e}"))
            })?;

        let resource = Resource::default().merge(&Resource::new(vec![KeyValue::new(
            ATTR_SERVICE_NAME,
            service_name.to_string(),
        )]));

        let tracer_provider = match collector_addr {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(format!("http://{endpoint}"))
                    .build_span_exporter()
                    .map_err(|e| {
                        Error::Config(format!("failed to build OTLP exporter: {e}"))
                    })?;
                TracerProvider::builder()
                    .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                    .with_config(trace::Config::default().with_resource(resource.clone()))
                    .build()
            }
            None => TracerProvider::builder()
                .with_config(trace::Config::default().with_resource(resource.clone()))
                .build(),
        };
        let _ = global::set_tracer_provider(tracer_provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());

        let registry = prometheus::Registry::new();
        let prometheus_reader = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| Error::Config(format!("failed to build Prometheus exporter: {e}")))?;
        let meter_provider = SdkMeterProvider::builder()
            .with_reader(prometheus_reader)
            .with_resource(resource)
            .build();
        global::set_meter_provider(meter_provider.clone());

        info!(
            service_name,
            collector_addr = collector_addr.unwrap_or("none"),
            "Telemetry bootstrap initialized"
        );

        Ok(Self {
            service_name: service_name.to_string(),
            tracer_provider,
            meter_provider,
            registry,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Prometheus registry backing the meter provider; render it at
    /// `GET /metrics`.
    pub fn registry(&self) -> prometheus::Registry {
        self.registry.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
        let _ = self.tracer_provider.shutdown();
    }
}

fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

/// Flat string map carried as bus-message headers (W3C traceparent /
/// tracestate). Produced before publish, consumed on receive; consumers must
/// tolerate its absence.
pub type HeaderMap = HashMap<String, String>;

struct MapCarrier<'a>(&'a mut HeaderMap);

impl Injector for MapCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

struct MapReader<'a>(&'a HeaderMap);

impl Extractor for MapReader<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Serialize the current trace context into a header map.
pub fn inject_trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let cx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut MapCarrier(&mut headers))
    });
    headers
}

/// Reconstruct a trace context from bus-message headers. An empty or absent
/// map yields a fresh root context.
pub fn extract_trace_headers(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&MapReader(headers)))
}

struct HttpInstruments {
    request_count: opentelemetry::metrics::Counter<u64>,
    request_duration_seconds: opentelemetry::metrics::Histogram<f64>,
    request_errors: opentelemetry::metrics::Counter<u64>,
}

fn http_instruments() -> &'static HttpInstruments {
    static INSTRUMENTS: OnceLock<HttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shortstack.http");
        HttpInstruments {
            request_count: meter
                .u64_counter("http.server.request.count")
                .with_description("Total number of HTTP requests handled")
                .init(),
            request_duration_seconds: meter
                .f64_histogram("http.server.request.duration")
                .with_description("HTTP request duration")
                .with_unit("s")
                .init(),
            request_errors: meter
                .u64_counter("http.server.request.errors")
                .with_description("HTTP requests with 4xx/5xx status codes")
                .init(),
        }
    })
}

struct GrpcInstruments {
    request_count: opentelemetry::metrics::Counter<u64>,
    request_duration_seconds: opentelemetry::metrics::Histogram<f64>,
    request_errors: opentelemetry::metrics::Counter<u64>,
}

fn grpc_instruments() -> &'static GrpcInstruments {
    static INSTRUMENTS: OnceLock<GrpcInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shortstack.grpc");
        GrpcInstruments {
            request_count: meter
                .u64_counter("rpc.server.request.count")
                .with_description("Total number of gRPC requests handled")
                .init(),
            request_duration_seconds: meter
                .f64_histogram("rpc.server.duration")
                .with_description("gRPC request duration")
                .with_unit("s")
                .init(),
            request_errors: meter
                .u64_counter("rpc.server.request.errors")
                .with_description("gRPC requests with non-OK status")
                .init(),
        }
    })
}

/// HTTP middleware that records request count, duration, and status-class
/// errors, and wraps the request in a server span.
pub async fn http_observability_middleware(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let span = info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %method,
        http.route = %route
    );
    let response = next.run(req).instrument(span).await;
    let status = response.status().as_u16();
    let elapsed = start.elapsed().as_secs_f64();
    let attrs = vec![
        KeyValue::new("http.request.method", method),
        KeyValue::new("http.route", route),
        KeyValue::new("http.response.status_code", status as i64),
    ];
    let instruments = http_instruments();

    instruments.request_count.add(1, &attrs);
    instruments.request_duration_seconds.record(elapsed, &attrs);
    if status >= 400 {
        instruments.request_errors.add(1, &attrs);
    }

    response
}

/// Router exposing the meter provider's Prometheus registry at
/// `GET /metrics`, plus liveness.
pub fn metrics_router(registry: prometheus::Registry) -> axum::Router {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/metrics",
            get(move || async move {
                let encoder = prometheus::TextEncoder::new();
                match encoder.encode_to_string(&registry.gather()) {
                    Ok(body) => (StatusCode::OK, body).into_response(),
                    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
                }
            }),
        )
}

/// Record gRPC request metrics using OTel semantic fields.
pub fn record_grpc_request(method: &str, code: Code, duration_seconds: f64) {
    let attrs = vec![
        KeyValue::new("rpc.system", "grpc"),
        KeyValue::new("rpc.service", "shortener.v1.UrlShortener"),
        KeyValue::new("rpc.method", method.to_string()),
        KeyValue::new("rpc.grpc.status_code", code as i64),
    ];
    let instruments = grpc_instruments();
    instruments.request_count.add(1, &attrs);
    instruments
        .request_duration_seconds
        .record(duration_seconds, &attrs);
    if code != Code::Ok {
        instruments.request_errors.add(1, &attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_accepts_known_levels() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
    }

    #[test]
    fn parse_log_level_rejects_unknown() {
        let err = parse_log_level("loud").unwrap_err();
        assert!(err.to_string().contains("invalid log level"));
    }

    #[test]
    fn header_roundtrip_without_active_span_is_empty_but_valid() {
        // No propagator installed in unit tests: injection yields an empty
        // map and extraction of an empty map must not panic.
        let headers = inject_trace_headers();
        let _cx = extract_trace_headers(&headers);
    }
}
