//! Prometheus metrics for the messaging core.
//!
//! All metrics follow the naming convention `mj_<area>_<metric>_<unit>`.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // MESSAGE METRICS
    // =========================================================================

    /// Envelopes written to a socket
    pub static ref MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("mj_messages_sent_total", "Envelopes sent"),
        &["msg_type"]
    ).expect("metric creation failed");

    /// Envelopes read from a socket and successfully decoded
    pub static ref MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("mj_messages_received_total", "Envelopes received and decoded"),
        &["msg_type"]
    ).expect("metric creation failed");

    /// Inbound frames rejected by the codec or validator
    pub static ref FORMAT_ERRORS: CounterVec = CounterVec::new(
        Opts::new("mj_messages_rejected_total", "Inbound messages rejected"),
        &["code"]
    ).expect("metric creation failed");

    // =========================================================================
    // SUBSCRIPTION METRICS
    // =========================================================================

    /// Subscription requests by outcome
    pub static ref SUBSCRIPTIONS: CounterVec = CounterVec::new(
        Opts::new("mj_subscriptions_total", "Subscription requests handled by XPUB"),
        &["outcome"]  // outcome: accepted/rejected/malformed/unsubscribed
    ).expect("metric creation failed");

    /// Clients currently tracked by the kernel bridge
    pub static ref CLIENTS_CONNECTED: Gauge = Gauge::new(
        "mj_clients_connected",
        "Clients registered with the kernel"
    ).expect("metric creation failed");

    // =========================================================================
    // LIVENESS METRICS
    // =========================================================================

    /// Silence windows that exceeded the heartbeat timeout
    pub static ref HEARTBEAT_TIMEOUTS: Counter = Counter::new(
        "mj_heartbeat_timeouts_total",
        "Heartbeat timeouts detected"
    ).expect("metric creation failed");

    /// PING messages answered
    pub static ref PINGS: Counter = Counter::new(
        "mj_pings_answered_total",
        "PING requests answered with PONG"
    ).expect("metric creation failed");

    /// PING round-trip time
    pub static ref PING_RTT: Histogram = Histogram::with_opts(
        HistogramOpts::new("mj_ping_rtt_seconds", "PING/PONG round-trip time")
            .buckets(exponential_buckets(0.0001, 2.0, 14).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call repeatedly; metrics that are already registered are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_SENT.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(FORMAT_ERRORS.clone()),
        Box::new(SUBSCRIPTIONS.clone()),
        Box::new(CLIENTS_CONNECTED.clone()),
        Box::new(HEARTBEAT_TIMEOUTS.clone()),
        Box::new(PINGS.clone()),
        Box::new(PING_RTT.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
