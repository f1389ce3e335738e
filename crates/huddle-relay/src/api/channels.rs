use crate::error::Result;
use crate::state::AppState;
use crate::ws::rooms::MediaSessionInfo;
use axum::{
    Json,
    extract::{Path, State},
};
use huddle_protocol::PeerInfo;
use uuid::Uuid;

pub async fn list_media_sessions(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<Json<Vec<MediaSessionInfo>>> {
    Ok(Json(state.rooms.media_sessions(channel_id).await))
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<Json<Vec<PeerInfo>>> {
    let mut participants = state.rooms.participants(channel_id).await;
    participants.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(Json(participants))
}
