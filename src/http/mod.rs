//! Stateless HTTP surface: request/response DTOs plus the router wiring.
//! Translates domain errors into status codes at the boundary; everything
//! past `Json(body)` is `crate::application`.

pub mod handlers;
pub mod schemas;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::API_V1_STR;
use handlers::AppState;

/// Build the full router: unauthenticated probes plus the API-key-gated
/// session endpoints under `/api/v1`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let session_routes = Router::new()
        .route("/session/", post(handlers::start_session))
        .route("/session/{id}/", post(handlers::run_on_session))
        .route("/session/{id}/", delete(handlers::close_session))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), handlers::require_api_key));

    Router::new()
        .nest(API_V1_STR, session_routes)
        .route("/-/health/", get(handlers::health))
        .route("/-/version/", get(handlers::version))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
