use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

/// Metric name prefix for all notifier metrics
const PREFIX: &str = "repairdesk_notifier";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Broker Metrics
    pub static ref PUSH_EVENTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_push_events_total"),
        "Push frames received on the subscribed topic"
    ).expect("Failed to create push_events_total metric");

    pub static ref PUSH_EVENTS_COALESCED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_push_events_coalesced_total"),
        "Push frames folded into an already pending refetch"
    ).expect("Failed to create push_events_coalesced_total metric");

    pub static ref RECONNECT_ATTEMPTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_reconnect_attempts_total"),
        "Broker connection attempts after a failure or drop"
    ).expect("Failed to create reconnect_attempts_total metric");

    pub static ref BROKER_CONNECTED: IntGauge = IntGauge::new(
        format!("{PREFIX}_broker_connected"),
        "1 while the broker subscription is connected"
    ).expect("Failed to create broker_connected metric");

    // Store Metrics
    pub static ref REFETCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_refetches_total"), "Notification list refetches"),
        &["outcome"]
    ).expect("Failed to create refetches_total metric");

    pub static ref REST_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_rest_failures_total"), "Failed REST operations"),
        &["operation"]
    ).expect("Failed to create rest_failures_total metric");
}

/// Register all metrics with the crate registry. Safe to call more than once.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PUSH_EVENTS_TOTAL.clone()),
        Box::new(PUSH_EVENTS_COALESCED_TOTAL.clone()),
        Box::new(RECONNECT_ATTEMPTS_TOTAL.clone()),
        Box::new(BROKER_CONNECTED.clone()),
        Box::new(REFETCHES_TOTAL.clone()),
        Box::new(REST_FAILURES_TOTAL.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => warn!("Failed to register metric: {}", e),
        }
    }
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_refetch(outcome: &str) {
    REFETCHES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_rest_failure(operation: &str) {
    REST_FAILURES_TOTAL.with_label_values(&[operation]).inc();
}
