//! Prometheus metrics for the ingestion service.
//!
//! Grounded on the teacher's `metrics/mod.rs` naming convention
//! (`<service>_<subject>_<unit>`, `lazy_static` registry, a `TextEncoder`
//! exporter behind a `/metrics` handler) re-pointed at this service's own
//! counters: requests by endpoint and status, persistence latency, config
//! reload outcomes, rate limit rejections, and the live rate-limiter bucket
//! count (spec §4.3/§4.4 "ambient" counters named in SPEC_FULL.md). The
//! teacher also depends on the separate `metrics` facade crate plus
//! `metrics-exporter-prometheus`; this crate standardizes on `prometheus`
//! alone rather than running two parallel metrics systems.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_gauge, register_histogram_vec,
    CounterVec, Encoder, Gauge, HistogramVec, Registry, TextEncoder,
};
use std::time::Duration;

use crate::server::AppState;

lazy_static! {
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "insights_ingest_requests_total",
            "Total requests handled, by endpoint and outcome status"
        ),
        &["endpoint", "status"]
    )
    .unwrap();

    pub static ref PERSIST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "insights_ingest_persist_duration_seconds",
            "Time to complete the directory-create + atomic-write persistence step",
            vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        ),
        &["app"]
    )
    .unwrap();

    pub static ref CONFIG_RELOADS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "insights_ingest_config_reloads_total",
            "Config reload attempts, by outcome"
        ),
        &["outcome"]  // success, failure
    )
    .unwrap();

    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "insights_ingest_rate_limit_rejections_total",
            "Requests rejected by the per-client token bucket"
        ),
        &["endpoint"]
    )
    .unwrap();

    pub static ref RATE_LIMITER_ACTIVE_BUCKETS: Gauge = register_gauge!(
        "insights_ingest_rate_limiter_active_buckets",
        "Number of live per-client token buckets in the registry"
    )
    .unwrap();

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry.register(Box::new(REQUESTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(PERSIST_DURATION_SECONDS.clone())).unwrap();
        registry.register(Box::new(CONFIG_RELOADS_TOTAL.clone())).unwrap();
        registry.register(Box::new(RATE_LIMIT_REJECTIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(RATE_LIMITER_ACTIVE_BUCKETS.clone())).unwrap();
        registry
    };
}

/// Records one completed request against `endpoint` (`upload`, `legacy`,
/// `version`) labeled with its final HTTP status.
pub fn record_request(endpoint: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

pub fn record_persist_duration(app: &str, duration: Duration) {
    PERSIST_DURATION_SECONDS
        .with_label_values(&[app])
        .observe(duration.as_secs_f64());
}

pub fn record_config_reload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    CONFIG_RELOADS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_rate_limit_rejected(endpoint: &str) {
    RATE_LIMIT_REJECTIONS_TOTAL.with_label_values(&[endpoint]).inc();
}

pub fn set_active_buckets(count: usize) {
    RATE_LIMITER_ACTIVE_BUCKETS.set(count as f64);
}

/// `GET /metrics` — Prometheus text-format scrape target. Not part of
/// spec.md's named wire interface, but ambient observability the teacher
/// exposes the same way for every service it runs.
pub async fn metrics_handler(State(_state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain")],
                Vec::new(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_visible_in_the_registry() {
        record_request("upload", 201);
        record_config_reload(true);
        record_rate_limit_rejected("upload");
        set_active_buckets(3);

        let families = REGISTRY.gather();
        assert!(!families.is_empty());
    }
}
