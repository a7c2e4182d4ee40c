//! Health check HTTP endpoint for deployment platform monitoring.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Router};

use crate::database::Database;

/// Build the health router.
pub fn router(db: Database) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(health_handler))
        .with_state(db)
}

/// Start the health check HTTP server.
pub async fn start_health_server(port: u16, db: Database) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port = port, "Starting health check server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(port, error = %e, "Failed to bind health check port");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(db)).await {
        tracing::error!(error = %e, "Health check server failed");
    }
}

/// 200 when the database answers, 503 otherwise.
async fn health_handler(State(db): State<Database>) -> (StatusCode, &'static str) {
    match db.health_check().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

/// Spawn the health check server as a background task.
pub fn spawn_health_server(port: u16, db: Database) {
    tokio::spawn(async move {
        start_health_server(port, db).await;
    });
}
