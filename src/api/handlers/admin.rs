use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::JSend;
use crate::service::ServiceStats;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub middlewares: Vec<&'static str>,
    #[serde(flatten)]
    pub stats: ServiceStats,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn pipeline_stats(State(state): State<Arc<AppState>>) -> Json<JSend<StatsResponse>> {
    JSend::success(StatsResponse {
        middlewares: state.service.chain().names(),
        stats: state.service.stats(),
    })
}
