//! Health Route
//!
//! Liveness endpoint backed by an optional health callback. With no
//! callback configured the process being able to answer is the signal.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use super::state::AppState;

/// GET /health
///
/// 204 when healthy (or when no callback is configured), 500 when the
/// callback reports a failure.
pub async fn health(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.health_handler() {
        None => StatusCode::NO_CONTENT,
        Some(handler) => match handler() {
            Ok(()) => StatusCode::NO_CONTENT,
            Err(reason) => {
                tracing::error!(reason = %reason, "health check failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}
