//! HTTP router module
//!
//! Builds the control-plane REST surface (§6) plus the data-plane reverse
//! proxy, both served from the same `axum` router with independent
//! bearer-auth layers.

mod auth;
mod handlers;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Configuration;
use crate::supervisor::Supervisor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub config: Arc<Configuration>,
}

/// Build the HTTP router with all routes.
pub fn build_router(state: AppState) -> Router {
    let data_plane = Router::new()
        .route("/instances/:name/proxy/*rest", axum::routing::any(handlers::proxy_instance))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_inference_auth));

    let management = Router::new()
        .route("/instances", get(handlers::list_instances))
        .route(
            "/instances/:name",
            post(handlers::create_instance)
                .get(handlers::get_instance)
                .put(handlers::update_instance)
                .delete(handlers::delete_instance),
        )
        .route("/instances/:name/start", post(handlers::start_instance))
        .route("/instances/:name/stop", post(handlers::stop_instance))
        .route("/instances/:name/restart", post(handlers::restart_instance))
        .route("/instances/:name/logs", get(handlers::get_logs))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_management_auth));

    Router::new()
        .merge(management)
        .merge(data_plane)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &Configuration) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    let mut layer = CorsLayer::new().allow_origin(allow_origin).allow_methods(tower_http::cors::Any);

    if config.server.allowed_headers.is_empty() {
        layer = layer.allow_headers(tower_http::cors::Any);
    } else {
        let headers: Vec<axum::http::HeaderName> = config
            .server
            .allowed_headers
            .iter()
            .filter_map(|h| axum::http::HeaderName::from_bytes(h.as_bytes()).ok())
            .collect();
        layer = layer.allow_headers(headers);
    }

    layer
}
