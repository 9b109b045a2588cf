//! Prometheus metrics for the watcher.
//!
//! All metrics are aggregated in the [`Metrics`] struct for easy tracking and management.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Aggregated metrics for the watcher.
///
/// Metrics are registered with the global metrics registry on creation.
#[derive(Debug, Clone)]
pub struct Metrics {
    _private: (),
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance and register all metric descriptions.
    pub fn new() -> Self {
        Self::register_descriptions();
        Self { _private: () }
    }

    fn register_descriptions() {
        // Tick metrics
        describe_counter!("watcher_ticks_total", "Total number of scheduler ticks");
        describe_counter!(
            "watcher_ticks_skipped_total",
            "Ticks skipped because the circuit breaker was open"
        );
        describe_histogram!(
            "watcher_tick_duration_seconds",
            "Duration of each scheduler tick in seconds"
        );
        describe_gauge!(
            "watcher_consecutive_failures",
            "Consecutive failed balance fetches seen by the circuit breaker"
        );

        // Fetch metrics
        describe_counter!(
            "watcher_fetch_success_total",
            "Successful balance fetches by target"
        );
        describe_counter!(
            "watcher_fetch_failure_total",
            "Failed balance fetches by target"
        );
        describe_gauge!(
            "watcher_balance",
            "Last fetched balance by target, in whole tokens"
        );

        // Notification metrics
        describe_counter!(
            "watcher_alerts_sent_total",
            "Low-balance alerts delivered by target"
        );
        describe_counter!(
            "watcher_alerts_failed_total",
            "Low-balance alerts that could not be delivered by target"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Tick metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Record a completed tick.
    pub fn record_tick(&self, duration: Duration) {
        counter!("watcher_ticks_total").increment(1);
        histogram!("watcher_tick_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a tick skipped by the circuit breaker.
    pub fn record_tick_skipped(&self) {
        counter!("watcher_ticks_total").increment(1);
        counter!("watcher_ticks_skipped_total").increment(1);
    }

    pub fn set_consecutive_failures(&self, count: u32) {
        gauge!("watcher_consecutive_failures").set(f64::from(count));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Fetch metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Record a successful fetch and the observed balance.
    pub fn record_fetch_success(&self, target: &str, formatted_balance: &str) {
        counter!("watcher_fetch_success_total", "target" => target.to_string()).increment(1);
        // The gauge is informational; exact values live in the store.
        if let Ok(value) = formatted_balance.parse::<f64>() {
            gauge!("watcher_balance", "target" => target.to_string()).set(value);
        }
    }

    pub fn record_fetch_failure(&self, target: &str) {
        counter!("watcher_fetch_failure_total", "target" => target.to_string()).increment(1);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Notification metrics
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn record_alert_sent(&self, target: &str) {
        counter!("watcher_alerts_sent_total", "target" => target.to_string()).increment(1);
    }

    pub fn record_alert_failed(&self, target: &str) {
        counter!("watcher_alerts_failed_total", "target" => target.to_string()).increment(1);
    }
}

/// Install the Prometheus metrics exporter and start the HTTP server.
///
/// Returns an error if the server fails to bind to the specified port.
pub fn install_prometheus_exporter(port: u16) -> eyre::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| eyre::eyre!("Failed to install Prometheus exporter: {}", e))?;

    Ok(())
}
