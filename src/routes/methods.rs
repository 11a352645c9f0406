//! Method statistics endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::methods::MethodStatistics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct MethodStatsResponse {
    pub statistics: Vec<MethodStatistics>,
    pub total: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(get_statistics).delete(clear_statistics))
}

/// Learned statistics, ordered by bucket then chain position
async fn get_statistics(State(state): State<AppState>) -> Json<MethodStatsResponse> {
    let mut statistics: Vec<MethodStatistics> = state
        .orchestrator()
        .methods()
        .get_method_statistics()
        .into_values()
        .collect();
    statistics.sort_by(|a, b| {
        a.bucket
            .as_str()
            .cmp(b.bucket.as_str())
            .then_with(|| a.method.position().cmp(&b.method.position()))
    });

    let total = statistics.len();
    Json(MethodStatsResponse { statistics, total })
}

async fn clear_statistics(State(state): State<AppState>) -> StatusCode {
    state.orchestrator().methods().clear_method_history();
    StatusCode::NO_CONTENT
}
