pub mod admin;
pub mod error;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Every route the service exposes, behind the shared CORS and trace layers.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/admin/upgrade-db",
            post(admin::upgrade_db).fallback(admin::method_not_allowed),
        )
        .layer(middleware::cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health() -> &'static str {
    "ok"
}
