// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::version::VERSION_NUMBER;
use crate::worker::{StatsSnapshot, WorkerStats};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /` liveness and `GET /stats` worker counters
pub fn health_router(stats: Arc<WorkerStats>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(stats)
}

/// Serve the health router until `shutdown` is cancelled
pub async fn serve_health(
    addr: SocketAddr,
    stats: Arc<WorkerStats>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", listener.local_addr()?);

    axum::serve(listener, health_router(stats))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION_NUMBER.to_string(),
    })
}

async fn stats_handler(State(stats): State<Arc<WorkerStats>>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}
