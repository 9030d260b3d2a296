//! Health, config and status handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use archivedl_core::{Config, OrchestratorStatus};

use crate::state::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Effective configuration. Credentials are per-request, so nothing here
/// is secret.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config().clone())
}

/// Worker and queue overview
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().overview())
}
