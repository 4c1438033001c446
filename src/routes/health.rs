use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_check<E>(result: Result<(), E>, start: std::time::Instant) -> Self {
        match result {
            Ok(()) => ComponentHealth {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: worker liveness with store and broker connectivity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = std::time::Instant::now();
    let db_result = state.store.health_check().await;
    if let Err(e) = &db_result {
        tracing::warn!(error = %e, "Database health check failed");
    }
    let db_check = ComponentHealth::from_check(db_result, db_start);

    let queue_start = std::time::Instant::now();
    let queue_result = state.queue.health_check().await;
    if let Err(e) = &queue_result {
        tracing::warn!(error = %e, "Queue health check failed");
    }
    let queue_check = ComponentHealth::from_check(queue_result, queue_start);

    let all_healthy = db_check.is_ok() && queue_check.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            queue: queue_check,
        },
    };

    (status_code, Json(response))
}
