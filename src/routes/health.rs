use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "deliveryBackend": state.queue.backend(),
            })),
        ),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

/// Readiness of every integration the pipeline depends on. Any failing check
/// answers 503 with the collected errors.
pub async fn startup_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut errors = Vec::new();

    let env = match state.config.validate() {
        Ok(()) => true,
        Err(err) => {
            errors.push(err.to_string());
            false
        }
    };
    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            errors.push(format!("database unavailable: {}", err));
            false
        }
    };
    let provider = match state.provider.probe().await {
        Ok(()) => true,
        Err(err) => {
            errors.push(format!("{} probe failed: {}", state.provider.name(), err));
            false
        }
    };

    let checks = json!({ "env": env, "database": database, "provider": provider });
    if errors.is_empty() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "provider": state.provider.name(),
                "checks": checks,
            })),
        )
    } else {
        tracing::warn!(?errors, "startup check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "failed",
                "provider": state.provider.name(),
                "checks": checks,
                "errors": errors,
            })),
        )
    }
}
