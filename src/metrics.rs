//! Prometheus metrics for the knowledge builder.
//!
//! Exposes:
//! - `knowledge_builder_command_duration_seconds` (histogram)
//! - `knowledge_builder_command_total` (counter with status)
//! - `knowledge_builder_command_inflight` (gauge)
//! - `knowledge_builder_oracle_calls_total` (counter by kind, provider, status)
//! - `knowledge_builder_oracle_duration_seconds` (histogram by kind)
//! - `knowledge_builder_chunks_total` (counter by outcome)
//! - `knowledge_builder_documents_total` (counter by status)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 50ms up to ~3 minutes.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "knowledge_builder_command_duration_seconds",
        "CLI command duration in seconds",
        &["command"],
        buckets
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_builder_command_total",
        "Total command executions by status",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

static COMMAND_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "knowledge_builder_command_inflight",
        "Number of in-flight commands",
        &["command"]
    )
    .expect("failed to register inflight gauge")
});

static ORACLE_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_builder_oracle_calls_total",
        "Oracle calls by kind, provider and status",
        &["kind", "provider", "status"]
    )
    .expect("failed to register oracle call counter")
});

static ORACLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // 100ms up to ~7 minutes.
    let buckets =
        prometheus::exponential_buckets(0.1, 2.0, 13).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "knowledge_builder_oracle_duration_seconds",
        "Oracle call latency in seconds",
        &["kind"],
        buckets
    )
    .expect("failed to register oracle duration histogram")
});

static CHUNKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_builder_chunks_total",
        "Processed chunks by outcome",
        &["outcome"]
    )
    .expect("failed to register chunk counter")
});

static DOCUMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_builder_documents_total",
        "Documents by ingestion status",
        &["status"]
    )
    .expect("failed to register document counter")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
    Lazy::force(&COMMAND_INFLIGHT);
    Lazy::force(&ORACLE_CALLS);
    Lazy::force(&ORACLE_DURATION);
    Lazy::force(&CHUNKS_TOTAL);
    Lazy::force(&DOCUMENTS_TOTAL);
}

/// Increment inflight gauge for a command.
pub fn record_command_start(command: &'static str) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).inc();
}

/// Record command completion with duration and status.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).dec();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, if success { "ok" } else { "error" }])
        .inc();
}

/// Record one oracle round trip.
pub fn record_oracle_call(kind: &'static str, provider: &'static str, success: bool, seconds: f64) {
    init_collectors();
    ORACLE_CALLS
        .with_label_values(&[kind, provider, if success { "ok" } else { "error" }])
        .inc();
    ORACLE_DURATION.with_label_values(&[kind]).observe(seconds);
}

/// Record a chunk outcome (`merged`, `empty`, `failed`).
pub fn record_chunk(outcome: &'static str) {
    init_collectors();
    CHUNKS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a document status (`ingested`, `skipped`, `partial_failure`).
pub fn record_document(status: &'static str) {
    init_collectors();
    DOCUMENTS_TOTAL.with_label_values(&[status]).inc();
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::from("encode error"))
            .unwrap());
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, encoder.format_type())
        .body(Full::from(buffer))
        .unwrap())
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap()),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
