use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let ice_servers = state
        .config
        .stun_servers
        .iter()
        .map(|url| IceServer {
            urls: vec![url.clone()],
        })
        .collect();

    Json(IceServersResponse { ice_servers })
}
