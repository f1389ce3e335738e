mod channels;
mod rtc;

use crate::state::AppState;
use crate::ws;
use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Channel call state
        .route(
            "/api/channels/{channel_id}/participants",
            get(channels::list_participants),
        )
        .route(
            "/api/channels/{channel_id}/media-sessions",
            get(channels::list_media_sessions),
        )
        .route("/api/rtc/ice-servers", get(rtc::get_ice_servers))
        // Per-channel signaling socket
        .route("/ws/rtc/{channel_id}", get(ws::handler::rtc_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
