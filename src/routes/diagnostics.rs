//! Diagnostics export endpoints

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(export_diagnostics))
        .route("/:id/report", get(diagnostics_report))
}

/// JSON record of an active or recently completed rendering
async fn export_diagnostics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let json = state
        .orchestrator()
        .diagnostics()
        .export_diagnostics(&id)
        .ok_or_else(|| AppError::NotFound(format!("No diagnostics for '{}'", id)))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], json))
}

/// Plain-text report for support tickets
async fn diagnostics_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let diagnostics = state.orchestrator().diagnostics();
    let record = diagnostics
        .snapshot(&id)
        .ok_or_else(|| AppError::NotFound(format!("No diagnostics for '{}'", id)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        diagnostics.generate_report(&record),
    ))
}
