//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - Health check
//! - Per-camera stats: concurrency state, gate states, recent
//!   adjustments

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::concurrency::ConcurrencyStats;
use crate::engine::EngineSnapshot;
use crate::error::{Error, Result};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(all_stats))
        .route("/api/stats/:camera_id", get(camera_stats))
        .with_state(state)
}

/// Stats payload for one camera
#[derive(Debug, Serialize)]
pub struct CameraStats {
    pub camera_id: String,
    pub concurrency: ConcurrencyStats,
    #[serde(flatten)]
    pub engine: EngineSnapshot,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cameras": state.config_store.config().cameras.len(),
    }))
}

async fn build_stats(state: &AppState, camera_id: &str) -> Result<CameraStats> {
    let controller = state
        .controllers
        .get(camera_id)
        .ok_or_else(|| Error::NotFound(format!("unknown camera '{}'", camera_id)))?;
    let engine = state
        .engines
        .get(camera_id)
        .ok_or_else(|| Error::NotFound(format!("unknown camera '{}'", camera_id)))?;
    Ok(CameraStats {
        camera_id: camera_id.to_string(),
        concurrency: controller.stats(),
        engine: engine.snapshot().await,
    })
}

/// All cameras' stats
async fn all_stats(State(state): State<AppState>) -> Result<Json<Vec<CameraStats>>> {
    let mut stats = Vec::with_capacity(state.engines.len());
    for camera in &state.config_store.config().cameras {
        if let Ok(entry) = build_stats(&state, &camera.camera_id).await {
            stats.push(entry);
        }
    }
    Ok(Json(stats))
}

/// One camera's stats
async fn camera_stats(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Json<CameraStats>> {
    Ok(Json(build_stats(&state, &camera_id).await?))
}
