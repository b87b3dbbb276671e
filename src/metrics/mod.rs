//! Prometheus metrics module
//!
//! Recording goes through the global `metrics` facade; only rendering needs
//! the exporter handle.

use crate::controller::StateSnapshot;
use crate::error::ManagerError;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Shard manager metrics collector
#[derive(Clone)]
pub struct ManagerMetrics {
    handle: Arc<PrometheusHandle>,
}

impl ManagerMetrics {
    /// Install the global Prometheus recorder and return a handle to it
    pub fn install() -> Result<Self, ManagerError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ManagerError::Metrics(e.to_string()))?;

        Self::register_metrics();

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// A collector whose recorder is not installed globally.
    ///
    /// Recording calls become no-ops unless another recorder is installed;
    /// used by tests and embedders that run their own exporter.
    pub fn unregistered() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: Arc::new(recorder.handle()),
        }
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "shard_manager_requests_total",
            Unit::Count,
            "REQUEST_CONNECT messages received"
        );
        describe_counter!(
            "shard_manager_duplicate_requests_total",
            Unit::Count,
            "REQUEST_CONNECT messages for shards already queued or connecting"
        );
        describe_counter!(
            "shard_manager_dispatches_total",
            Unit::Count,
            "Shards told they may identify"
        );
        describe_counter!(
            "shard_manager_completions_total",
            Unit::Count,
            "CONNECT_COMPLETE messages for connecting shards"
        );
        describe_counter!(
            "shard_manager_dead_shards_total",
            Unit::Count,
            "Shards purged after a failed write"
        );
        describe_counter!(
            "shard_manager_ignored_messages_total",
            Unit::Count,
            "Inbound lines dropped without action"
        );
        describe_counter!(
            "shard_manager_errors_total",
            Unit::Count,
            "Shard manager errors"
        );

        describe_histogram!(
            "shard_manager_queue_wait_seconds",
            Unit::Seconds,
            "Time a shard spent in the wait queue"
        );
        describe_histogram!(
            "shard_manager_connect_duration_seconds",
            Unit::Seconds,
            "Time between CONNECT_READY and CONNECT_COMPLETE"
        );

        describe_gauge!(
            "shard_manager_queue_depth",
            Unit::Count,
            "Shards waiting to identify"
        );
        describe_gauge!(
            "shard_manager_connecting",
            Unit::Count,
            "Shards currently identifying"
        );
        describe_gauge!(
            "shard_manager_identify_window_in_use",
            Unit::Count,
            "Identifies inside the rate limit window"
        );
        describe_gauge!(
            "shard_manager_max_concurrency",
            Unit::Count,
            "Configured max_concurrency"
        );
    }

    /// Record a REQUEST_CONNECT
    pub fn record_request(&self, priority: bool) {
        counter!(
            "shard_manager_requests_total",
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    /// Record a suppressed duplicate request (`queued` or `connecting`)
    pub fn record_duplicate(&self, state: &'static str) {
        counter!(
            "shard_manager_duplicate_requests_total",
            "state" => state
        )
        .increment(1);
    }

    /// Record a shard admitted to identify
    pub fn record_dispatch(&self, priority: bool, waited: Duration) {
        counter!(
            "shard_manager_dispatches_total",
            "priority" => priority.to_string()
        )
        .increment(1);

        histogram!("shard_manager_queue_wait_seconds").record(waited.as_secs_f64());
    }

    /// Record a completed identify
    pub fn record_completion(&self, connect_time: Duration) {
        counter!("shard_manager_completions_total").increment(1);
        histogram!("shard_manager_connect_duration_seconds").record(connect_time.as_secs_f64());
    }

    /// Record a shard purged after its socket failed
    pub fn record_dead_shard(&self) {
        counter!("shard_manager_dead_shards_total").increment(1);
    }

    /// Record a dropped inbound line
    pub fn record_ignored(&self, reason: &'static str) {
        counter!(
            "shard_manager_ignored_messages_total",
            "reason" => reason
        )
        .increment(1);
    }

    /// Record an error by its `error_type_label`
    pub fn record_error(&self, error_type: &'static str) {
        counter!(
            "shard_manager_errors_total",
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Publish admission state gauges
    pub fn set_state(&self, snapshot: &StateSnapshot) {
        gauge!("shard_manager_queue_depth").set(snapshot.queued as f64);
        gauge!("shard_manager_connecting").set(snapshot.connecting as f64);
        gauge!("shard_manager_identify_window_in_use").set(snapshot.identify_window_in_use as f64);
        gauge!("shard_manager_max_concurrency").set(snapshot.max_concurrency as f64);
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_metrics_accept_recordings() {
        let metrics = ManagerMetrics::unregistered();
        metrics.record_request(true);
        metrics.record_duplicate("connecting");
        metrics.record_dispatch(false, Duration::from_millis(250));
        metrics.record_completion(Duration::from_secs(1));
        metrics.record_error("send");
        metrics.set_state(&StateSnapshot {
            max_concurrency: 1,
            queued: 0,
            connecting: 0,
            identify_window_in_use: 0,
            tracked_sockets: 0,
            rate_limited: false,
        });

        // Nothing was recorded into this exporter's registry
        assert!(!metrics.render().contains("shard_manager_requests_total"));
    }
}
