//! Router construction for the gateway API.

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::auth::{require_admin, require_session};
use crate::server::handlers;
use crate::server::AppState;

/// Build the full axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Admin only
    let admin = Router::new()
        .route("/api/audit", get(handlers::audit))
        .layer(axum_mw::from_fn(require_admin));

    // Routes that require a session
    let protected = Router::new()
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/voters/id/:number", get(handlers::voter_by_id))
        .route("/api/voters/name/:text", get(handlers::voters_by_name))
        .route("/api/status", get(handlers::status))
        .merge(admin)
        .layer(axum_mw::from_fn_with_state(state.clone(), require_session));

    // Public routes (no auth)
    let public = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/auth/login", post(handlers::login));

    public
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
