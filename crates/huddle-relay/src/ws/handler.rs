use crate::error::{RelayError, Result};
use crate::state::AppState;
use crate::ws::rooms::Outbound;
use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{PeerInfo, SignalMessage};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub user_id: Uuid,
    #[serde(default)]
    pub username: String,
}

pub async fn rtc_handler(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<Uuid>,
    Query(params): Query<JoinParams>,
    State(state): State<AppState>,
) -> Result<Response> {
    // The nil id is the relay's own `from`
    if params.user_id.is_nil() {
        return Err(RelayError::BadRequest("user_id must not be nil".to_string()));
    }

    let peer = PeerInfo {
        user_id: params.user_id,
        username: if params.username.is_empty() {
            params.user_id.to_string()
        } else {
            params.username
        },
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, channel_id, peer)))
}

async fn handle_socket(socket: WebSocket, state: AppState, channel_id: Uuid, peer: PeerInfo) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();
    let user_id = peer.user_id;

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: Utf8Bytes::from_static("replaced by a new connection"),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    state.rooms.join(channel_id, peer, connection_id, tx).await;

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                Ok(message) => state.rooms.relay(channel_id, user_id, message).await,
                Err(e) => {
                    tracing::warn!("Invalid signal from user {}: {}", user_id, e);
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!("WebSocket error for user {}: {}", user_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    state.rooms.leave(channel_id, user_id, connection_id).await;
    send_task.abort();

    tracing::info!("Connection {} for user {} closed", connection_id, user_id);
}
