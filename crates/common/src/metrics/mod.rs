//! Metrics and observability utilities
//!
//! Prometheus-style counters and histograms for the ingestion pipeline and
//! vote path, plus the per-process exporter and tracing setup.

use crate::config::ObservabilityConfig;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

/// Metrics prefix for all Cinema metrics
pub const METRICS_PREFIX: &str = "cinema";

/// Buckets for batch materialization latency (in seconds)
pub const MATERIALIZE_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s - default transaction timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Extraction metrics
    describe_counter!(
        format!("{}_extract_items_total", METRICS_PREFIX),
        Unit::Count,
        "Source items requested, labelled by outcome"
    );

    describe_counter!(
        format!("{}_extract_batches_total", METRICS_PREFIX),
        Unit::Count,
        "Batches emitted by the extractor"
    );

    // Transport metrics
    describe_counter!(
        format!("{}_publish_total", METRICS_PREFIX),
        Unit::Count,
        "Batch publish attempts, labelled by status"
    );

    describe_counter!(
        format!("{}_subscribe_messages_total", METRICS_PREFIX),
        Unit::Count,
        "Channel messages received, labelled by decode status"
    );

    // Materialization metrics
    describe_counter!(
        format!("{}_materialize_batches_total", METRICS_PREFIX),
        Unit::Count,
        "Batches materialized, labelled by status"
    );

    describe_counter!(
        format!("{}_materialize_movies_total", METRICS_PREFIX),
        Unit::Count,
        "Movies created or updated by the materializer"
    );

    describe_histogram!(
        format!("{}_materialize_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Batch transaction latency in seconds"
    );

    // Vote metrics
    describe_counter!(
        format!("{}_votes_total", METRICS_PREFIX),
        Unit::Count,
        "Vote aggregate transitions, labelled by kind and status"
    );

    tracing::info!("Metrics registered");
}

/// Install the Prometheus exporter when a port is configured
pub fn install_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_materialize_duration_seconds", METRICS_PREFIX)),
            MATERIALIZE_BUCKETS,
        )?
        .install()?;

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Helper to record one source item outcome
pub fn record_extract_item(success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_extract_items_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Helper to record an emitted batch
pub fn record_extract_batch(size: usize) {
    counter!(
        format!("{}_extract_batches_total", METRICS_PREFIX),
        "empty" => (size == 0).to_string()
    )
    .increment(1);
}

/// Helper to record a publish attempt
pub fn record_publish(success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_publish_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Helper to record a received channel message
pub fn record_subscribe_message(decoded: bool) {
    let status = if decoded { "decoded" } else { "discarded" };

    counter!(
        format!("{}_subscribe_messages_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Helper to record a batch transaction
pub fn record_materialize(duration_secs: f64, movies: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_materialize_batches_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    if success {
        counter!(format!("{}_materialize_movies_total", METRICS_PREFIX))
            .increment(movies as u64);
    }

    histogram!(
        format!("{}_materialize_duration_seconds", METRICS_PREFIX),
        "status" => status
    )
    .record(duration_secs);
}

/// Helper to record a vote aggregate transition
pub fn record_vote(kind: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_votes_total", METRICS_PREFIX),
        "kind" => kind,
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in MATERIALIZE_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        assert!(MATERIALIZE_BUCKETS.contains(&5.0));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        register_metrics();
        record_extract_item(true);
        record_extract_batch(0);
        record_publish(false);
        record_subscribe_message(true);
        record_materialize(0.01, 3, true);
        record_vote("add", true);
    }

    #[test]
    fn test_exporter_disabled_on_port_zero() {
        let config = ObservabilityConfig::default();
        assert!(install_exporter(&config).is_ok());
    }
}
