use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static CACHE_LOOKUPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static UPSTREAM_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static DROPPED_RECORDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "pitwall_gateway_http_requests_total",
                    "Gateway HTTP request count.",
                ),
                &["route", "status"],
            )
            .expect("create pitwall_gateway_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "pitwall_gateway_http_request_duration_seconds",
                    "Gateway HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "outcome"],
            )
            .expect("create pitwall_gateway_http_request_duration_seconds"),
        )
    })
}

fn cache_lookups_total() -> &'static IntCounterVec {
    CACHE_LOOKUPS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "pitwall_gateway_cache_lookups_total",
                    "Request cache lookups by resource and outcome.",
                ),
                &["resource", "outcome"],
            )
            .expect("create pitwall_gateway_cache_lookups_total"),
        )
    })
}

fn upstream_calls_total() -> &'static IntCounterVec {
    UPSTREAM_CALLS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "pitwall_gateway_upstream_calls_total",
                    "Upstream feed call attempts by path and outcome.",
                ),
                &["path", "outcome"],
            )
            .expect("create pitwall_gateway_upstream_calls_total"),
        )
    })
}

fn dropped_records_total() -> &'static IntCounterVec {
    DROPPED_RECORDS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "pitwall_gateway_dropped_records_total",
                    "Upstream records dropped as malformed.",
                ),
                &["resource", "reason"],
            )
            .expect("create pitwall_gateway_dropped_records_total"),
        )
    })
}

pub fn observe_http_request(route: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_cache_lookup(resource: &str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    cache_lookups_total()
        .with_label_values(&[resource, outcome])
        .inc();
}

pub fn observe_upstream_call(path: &str, outcome: &str) {
    upstream_calls_total()
        .with_label_values(&[path, outcome])
        .inc();
}

pub fn inc_dropped_record(resource: &str, reason: &str) {
    dropped_records_total()
        .with_label_values(&[resource, reason])
        .inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = cache_lookups_total();
    let _ = upstream_calls_total();
    let _ = dropped_records_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
