use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the worker's metrics.
pub fn describe() {
    metrics::describe_counter!(
        "thumbnail_jobs_received_total",
        "Deliveries taken off the processing queue"
    );
    metrics::describe_counter!(
        "thumbnail_jobs_completed_total",
        "Tasks that produced a thumbnail"
    );
    metrics::describe_counter!(
        "thumbnail_jobs_failed_total",
        "Tasks whose thumbnail generation failed"
    );
    metrics::describe_counter!(
        "thumbnail_jobs_malformed_total",
        "Deliveries dropped because the payload could not be decoded"
    );
    metrics::describe_counter!(
        "thumbnail_store_errors_total",
        "Job record status writes that failed"
    );
    metrics::describe_counter!(
        "thumbnail_publish_errors_total",
        "Completion events that could not be published"
    );
    metrics::describe_histogram!(
        "thumbnail_processing_seconds",
        "Time from picking up a task to its terminal status"
    );
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}
