//! Observability: structured logging and Prometheus metrics.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Global Prometheus recorder handle, rendered by `GET /metrics`.
static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the observability stack.
///
/// `RUST_LOG` takes precedence over the configured log level when set.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS.set(handle);

    metrics::register_metrics();
    Ok(())
}

/// Render all metrics in Prometheus text format.
pub fn render_metrics() -> String {
    PROMETHEUS.get().map(|h| h.render()).unwrap_or_default()
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{counter, describe_counter};

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(
            "afterglow_tasks_started_total",
            "Total number of task units started"
        );
        describe_counter!(
            "afterglow_tasks_completed_total",
            "Total number of task units completed"
        );
        describe_counter!(
            "afterglow_detached_failures_total",
            "Detached tasks or extensions that failed after the response was sent"
        );
        describe_counter!(
            "afterglow_events_buffered_total",
            "Events recorded into the entity event buffer"
        );
        describe_counter!(
            "afterglow_batches_dispatched_total",
            "Batches successfully dispatched to the outbound queue"
        );
        describe_counter!(
            "afterglow_events_dispatched_total",
            "Events delivered inside successfully dispatched batches"
        );
        describe_counter!(
            "afterglow_dispatch_failures_total",
            "Batch dispatches that failed (events retained for re-delivery)"
        );
        describe_counter!(
            "afterglow_errors_total",
            "Total errors constructed, by code and category"
        );
    }

    /// Record a task start.
    pub fn record_task_started(task: &str) {
        counter!("afterglow_tasks_started_total", "task" => task.to_string()).increment(1);
    }

    /// Record a task completion.
    pub fn record_task_completed(task: &str) {
        counter!("afterglow_tasks_completed_total", "task" => task.to_string()).increment(1);
    }

    /// Record a detached task or extension failure.
    ///
    /// This counter is the only caller-independent evidence that background
    /// work failed; the HTTP response never carries it.
    pub fn record_detached_failure(task: &str) {
        counter!("afterglow_detached_failures_total", "task" => task.to_string()).increment(1);
    }

    /// Record an event buffered for an entity.
    pub fn record_event_buffered() {
        counter!("afterglow_events_buffered_total").increment(1);
    }

    /// Record a successful batch dispatch.
    pub fn record_batch_dispatched(batch_len: usize) {
        counter!("afterglow_batches_dispatched_total").increment(1);
        counter!("afterglow_events_dispatched_total").increment(batch_len as u64);
    }

    /// Record a failed batch dispatch.
    pub fn record_dispatch_failure() {
        counter!("afterglow_dispatch_failures_total").increment(1);
    }
}
