//! Liveness, health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::RegistryStats;
use crate::relay::DispatcherStatsSnapshot;
use crate::server::AppState;

pub const ROOT_MESSAGE: &str = "Magia Relay Server is running.";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: RegistryStats,
    pub performance_cached: bool,
    pub relay: DispatcherStatsSnapshot,
}

/// GET / - static liveness string
pub async fn root() -> &'static str {
    ROOT_MESSAGE
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connections: state.registry.count(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.registry.stats(),
        performance_cached: state.cache.is_cached().await,
        relay: state.dispatcher.stats(),
    })
}
