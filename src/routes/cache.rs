//! Network cache endpoints

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};

use crate::network::MemoryPressureLevel;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusResponse {
    pub entries: usize,
    pub in_flight: usize,
}

#[derive(Deserialize)]
pub struct MemoryPressureRequest {
    pub level: MemoryPressureLevel,
}

#[derive(Serialize)]
pub struct MemoryPressureResponse {
    pub evicted: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(cache_status).delete(clear_cache))
        .route("/pressure", post(memory_pressure))
}

async fn cache_status(State(state): State<AppState>) -> Json<CacheStatusResponse> {
    let network = state.orchestrator().network();
    Json(CacheStatusResponse {
        entries: network.get_cache_size().await,
        in_flight: network.in_flight_count(),
    })
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.orchestrator().network().clear_network_cache().await;
    StatusCode::NO_CONTENT
}

/// Forward a host memory pressure signal to the document cache
async fn memory_pressure(
    State(state): State<AppState>,
    Json(request): Json<MemoryPressureRequest>,
) -> Json<MemoryPressureResponse> {
    let evicted = state.orchestrator().handle_memory_pressure(request.level).await;
    Json(MemoryPressureResponse { evicted })
}
