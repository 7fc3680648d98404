//! HTTP Server Surface
//!
//! The outer shell around the push core, built with Axum.
//!
//! # Endpoints
//!
//! - `GET /events` - WebSocket upgrade for push delivery (when push is
//!   enabled)
//! - `GET /health` - liveness, backed by an optional health callback
//!
//! Resource dispatch (CRUD processors, validation) lives outside this
//! crate; the server exposes the registry and security hook points it
//! needs.

pub mod error;
pub mod processor;
pub mod routes;
pub mod security;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use processor::{Identity, Processor, ProcessorRegistry, RegistryError};
pub use security::{Authenticator, Authorizer, RequestContext, SecurityError};
pub use state::{AppState, HealthHandler};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::push::events_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new().route("/health", get(routes::health));

    if state.hub().is_some() {
        router = router.route("/events", get(events_handler));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server and run until a shutdown signal arrives
pub async fn serve(state: Arc<AppState>, addr: &str) -> Result<(), ApiError> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "beacon listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("beacon shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
