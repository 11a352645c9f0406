//! Rendering API endpoints
//!
//! - `POST /` renders a document by URL and returns the `RenderResult`
//! - `GET /:id/progress` polls the latest progress of an in-flight rendering
//! - `POST /:id/cancel` cancels it
//! - `POST /:id/retry` re-issues a stuck attempt
//!
//! Callers that want to poll progress while `POST /` is pending pass their
//! own `options.renderingId`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::render::{ForceRetry, ProgressState, RenderOptions, RenderResult, RenderSource};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub rendering_id: String,
    pub status: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(render_document))
        .route("/:id/progress", get(get_progress))
        .route("/:id/cancel", post(cancel_rendering))
        .route("/:id/retry", post(force_retry))
}

/// Render a document; failures are reported in the body with `success: false`
async fn render_document(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<RenderResult>> {
    let url = request.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::BadRequest(format!(
            "Expected an http(s) URL, got '{}'",
            request.url
        )));
    }
    if let Some(id) = &request.options.rendering_id {
        if id.trim().is_empty() {
            return Err(AppError::BadRequest("renderingId must not be empty".to_string()));
        }
    }

    let result = state
        .orchestrator()
        .render_pdf(RenderSource::url(url), request.options)
        .await;

    Ok(Json(result))
}

async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressState>> {
    state
        .orchestrator()
        .progress(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Rendering '{}' not found", id)))
}

async fn cancel_rendering(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    if !state.orchestrator().cancel_rendering(&id) {
        return Err(AppError::NotFound(format!("Rendering '{}' not found", id)));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            rendering_id: id,
            status: "cancelling",
        }),
    ))
}

async fn force_retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    match state.orchestrator().force_retry(&id) {
        ForceRetry::Retrying => Ok((
            StatusCode::ACCEPTED,
            Json(ControlResponse {
                rendering_id: id,
                status: "retrying",
            }),
        )),
        ForceRetry::NotStuck => Err(AppError::Conflict(format!(
            "Rendering '{}' is not stuck",
            id
        ))),
        ForceRetry::NotFound => Err(AppError::NotFound(format!("Rendering '{}' not found", id))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{get, post_json, send, state, PDF};
    use crate::methods::RenderMethod;
    use crate::network::mock::MockReply;
    use crate::render::mock::{MockBackend, MockOutcome};
    use crate::routes::app;

    #[tokio::test]
    async fn test_render_success() {
        let state = state(
            MockReply::ok(PDF),
            vec![MockBackend::new(RenderMethod::PrimaryCanvas, MockOutcome::Pages(2))],
        );

        let (status, body) = send(
            app(state),
            post_json(
                "/api/v1/render",
                json!({ "url": "https://example.test/a.pdf", "options": { "renderingId": "r-1" } }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["renderingId"], "r-1");
        assert_eq!(body["method"], "primary-canvas-render");
        assert_eq!(body["pages"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["pages"][0]["data"], "cHg=");
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_render_failure_is_reported_in_body() {
        let state = state(
            MockReply::status(404),
            vec![MockBackend::new(RenderMethod::PrimaryCanvas, MockOutcome::Pages(1))],
        );

        let (status, body) = send(
            app(state),
            post_json("/api/v1/render", json!({ "url": "https://example.test/missing.pdf" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "http-error");
        assert_eq!(body["error"]["statusCode"], 404);
        assert_eq!(body["error"]["recoverable"], false);
    }

    #[tokio::test]
    async fn test_render_rejects_non_http_url() {
        let state = state(MockReply::ok(PDF), Vec::new());

        let (status, body) = send(
            app(state),
            post_json("/api/v1/render", json!({ "url": "file:///etc/passwd" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_rendering_id() {
        let state = state(MockReply::ok(PDF), Vec::new());

        let (status, _) = send(app(state.clone()), get("/api/v1/render/nope/progress")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app(state.clone()), post_json("/api/v1/render/nope/cancel", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app(state), post_json("/api/v1/render/nope/retry", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_and_cancel_in_flight() {
        let state = state(
            MockReply::ok(PDF),
            vec![MockBackend::new(RenderMethod::PrimaryCanvas, MockOutcome::Hang)],
        );

        let pending = tokio::spawn(send(
            app(state.clone()),
            post_json(
                "/api/v1/render",
                json!({ "url": "https://example.test/a.pdf", "options": { "renderingId": "r-live" } }),
            ),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (status, progress) = send(app(state.clone()), get("/api/v1/render/r-live/progress")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress["stage"], "RENDERING");
        assert_eq!(progress["isStuck"], false);

        let (status, body) = send(app(state.clone()), post_json("/api/v1/render/r-live/retry", json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, body) = send(app(state.clone()), post_json("/api/v1/render/r-live/cancel", json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "cancelling");

        let (status, result) = pending.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["success"], false);
        assert_eq!(result["error"]["type"], "cancelled-error");
    }
}
