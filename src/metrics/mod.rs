//! Prometheus metrics for the MySQL proxy

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::OnceLock;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    pub registry: Registry,

    // Connection metrics
    /// Total client connections accepted
    pub connections_total: IntCounter,
    /// Current active client connections
    pub connections_active: IntGauge,
    /// Total client connections closed
    pub connections_closed: IntCounter,
    /// Handshakes rejected with ER_PASSWORD_NO_MATCH
    pub auth_failures_total: IntCounter,

    // Command metrics
    pub commands_total: IntCounterVec,
    pub command_duration_seconds: HistogramVec,
    /// Command errors by ProxyError kind
    pub command_errors_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "proxy_connections_total",
            "Total number of client connections accepted",
        )
        .unwrap();

        let connections_active = IntGauge::new(
            "proxy_connections_active",
            "Current number of active client connections",
        )
        .unwrap();

        let connections_closed = IntCounter::new(
            "proxy_connections_closed_total",
            "Total number of client connections closed",
        )
        .unwrap();

        let auth_failures_total = IntCounter::new(
            "proxy_auth_failures_total",
            "Total number of rejected handshakes",
        )
        .unwrap();

        let commands_total = IntCounterVec::new(
            Opts::new("proxy_commands_total", "Total number of client commands processed"),
            &["command"], // query, stmt_prepare, stmt_execute, ...
        )
        .unwrap();

        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new("proxy_command_duration_seconds", "Command latency in seconds").buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["command"],
        )
        .unwrap();

        let command_errors_total = IntCounterVec::new(
            Opts::new("proxy_command_errors_total", "Total number of command errors"),
            &["kind"], // syntax, bad_arguments, backend, ...
        )
        .unwrap();

        registry.register(Box::new(connections_total.clone())).unwrap();
        registry.register(Box::new(connections_active.clone())).unwrap();
        registry.register(Box::new(connections_closed.clone())).unwrap();
        registry.register(Box::new(auth_failures_total.clone())).unwrap();
        registry.register(Box::new(commands_total.clone())).unwrap();
        registry.register(Box::new(command_duration_seconds.clone())).unwrap();
        registry.register(Box::new(command_errors_total.clone())).unwrap();

        Self {
            registry,
            connections_total,
            connections_active,
            connections_closed,
            auth_failures_total,
            commands_total,
            command_duration_seconds,
            command_errors_total,
        }
    }

    /// Record a handled command
    pub fn record_command(&self, command: &str, duration_secs: f64) {
        self.commands_total.with_label_values(&[command]).inc();
        self.command_duration_seconds
            .with_label_values(&[command])
            .observe(duration_secs);
    }

    pub fn record_command_error(&self, kind: &str) {
        self.command_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn record_connection_accepted(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    pub fn record_connection_closed(&self) {
        self.connections_active.dec();
        self.connections_closed.inc();
    }

    /// Metrics in Prometheus text format
    pub fn gather_text(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Answer a scrape by path: `/metrics` or `/health`
fn route(path: &str) -> Response<Full<Bytes>> {
    let (status, body) = match path {
        "/metrics" => (StatusCode::OK, metrics().gather_text()),
        "/health" => (StatusCode::OK, "OK".to_string()),
        _ => (StatusCode::NOT_FOUND, "Not Found".to_string()),
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if path == "/metrics" {
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        );
    }
    response
}

/// Serve Prometheus scrapes until the listener fails
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, Infallible>(route(req.uri().path()))
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}
