//! Huddle relay library
//!
//! Exposes the signaling relay for embedding and integration tests.

pub mod api;
pub mod error;
pub mod state;
pub mod ws;

/// Build the relay router
pub fn create_app(config: state::Config) -> axum::Router {
    let app_state = state::AppState::new(config);
    api::create_router(app_state)
}
