//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use lodestone_control::ControlPlane;

use crate::handlers::{health, internal, servers};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `POST /startServer` - Start a server and wait until it is live
/// - `POST /whitelistPlayer` - Whitelist a player on a live server
/// - `GET /v1/servers/:server_id` - Get a server's record
///
/// ## Internal
/// - `POST /internal/sweep` - Run one idle sweep
/// - `POST /internal/config-records` - Apply a provisioning event
pub fn create_router<C>(state: GatewayState<C>) -> Router
where
    C: ControlPlane + 'static,
{
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(max_body_bytes));

    Router::new()
        .route("/health", get(health::health::<C>))
        // Server lifecycle
        .route("/startServer", post(servers::start_server::<C>))
        .route("/whitelistPlayer", post(servers::whitelist_player::<C>))
        .route("/v1/servers/:server_id", get(servers::get_server::<C>))
        // Internal
        .route("/internal/sweep", post(internal::sweep::<C>))
        .route(
            "/internal/config-records",
            post(internal::config_records::<C>),
        )
        .layer(middleware)
        .with_state(Arc::new(state))
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
