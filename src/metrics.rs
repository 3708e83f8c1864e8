//! Prometheus metrics for the deal relay.
//!
//! Exposes:
//! - `deal_relay_request_duration_seconds` (histogram by route)
//! - `deal_relay_requests_total` (counter by route and status code)
//! - `deal_relay_sends_total` (counter by message kind and status)
//! - `deal_relay_qr_codes_total` (counter)
//! - process metrics via `process` collector

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use tracing::warn;

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 10ms up to ~80 seconds.
    let buckets =
        prometheus::exponential_buckets(0.01, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "deal_relay_request_duration_seconds",
        "HTTP request duration in seconds",
        &["route"],
        buckets
    )
    .expect("failed to register request duration histogram")
});

static REQUEST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "deal_relay_requests_total",
        "Total HTTP requests by route and status code",
        &["route", "status"]
    )
    .expect("failed to register request counter")
});

static SEND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "deal_relay_sends_total",
        "Messages sent to groups by kind and status",
        &["kind", "status"]
    )
    .expect("failed to register send counter")
});

static QR_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "deal_relay_qr_codes_total",
        "Pairing QR codes received from the provider"
    )
    .expect("failed to register QR counter")
});

/// Ensure collectors are registered.
pub fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&REQUEST_DURATION);
    Lazy::force(&REQUEST_TOTAL);
    Lazy::force(&SEND_TOTAL);
    Lazy::force(&QR_TOTAL);
}

/// Record a finished HTTP request.
pub fn record_request(route: &str, status: u16, duration: Duration) {
    init_collectors();
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration.as_secs_f64());
    REQUEST_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
}

/// Record one group send.
pub fn record_send(kind: &'static str, success: bool) {
    init_collectors();
    SEND_TOTAL
        .with_label_values(&[kind, if success { "ok" } else { "error" }])
        .inc();
}

pub fn record_qr_code() {
    init_collectors();
    QR_TOTAL.inc();
}

/// Encode the default registry in the Prometheus text format.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    init_collectors();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
