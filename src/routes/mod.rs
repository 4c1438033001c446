use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;

/// Health and metrics endpoints served alongside the consumer loop.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .with_state(state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve<S>(listener: TcpListener, app: Router, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
