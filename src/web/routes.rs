//! Web API router construction.

use std::time::Duration;

use axum::Router;
use axum::http::Method;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::{auth, status, sync};

/// Upper bound for a request; an on-demand sync may include a slow extraction.
const REQUEST_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/", get(sync::register))
        .route("/home", get(sync::home))
        .route("/delete", get(sync::delete))
        .route("/auth/callback", get(auth::callback))
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .with_state(app_state)
        .layer((
            TraceLayer::new_for_http(),
            cors,
            TimeoutLayer::new(REQUEST_DEADLINE),
        ))
}
