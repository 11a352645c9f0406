//! Route modules for the render engine server

pub mod cache;
pub mod diagnostics;
pub mod health;
pub mod methods;
pub mod render;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router with tracing and CORS layers
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/render", render::router())
        .nest("/api/v1/diagnostics", diagnostics::router())
        .nest("/api/v1/methods", methods::router())
        .nest("/api/v1/cache", cache::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
