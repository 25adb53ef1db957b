pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod invite;
pub mod lifecycle;
pub mod lobby;
pub mod notify;
pub mod rate_limit;
pub mod room_store;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);

    // The timeout wraps REST routes only; socket upgrades and health
    // probes stay outside it.
    let api_routes = Router::new()
        .route("/rooms", post(api::create_room))
        .route("/rooms/{code}", get(api::room_info))
        .route("/rooms/{code}/invites", post(api::issue_invite))
        .route("/invites/exchange", post(api::exchange_invite))
        .layer(TimeoutLayer::new(Duration::from_secs(10)));

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(health::healthz))
        .nest("/api/v1", api_routes)
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}
