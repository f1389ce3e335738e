use chrono::{DateTime, Utc};
use huddle_protocol::{MediaType, PeerInfo, Signal, SignalKind, SignalMessage};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Frame queued for a member's socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Close the socket; the member was replaced by a newer connection
    Close,
}

#[derive(Debug)]
struct Member {
    connection_id: Uuid,
    username: String,
    sender: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug, Clone)]
struct MediaSession {
    id: Uuid,
    username: String,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MediaSessionUser {
    pub id: Uuid,
    pub username: String,
}

/// Active media announced in a channel
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MediaSessionInfo {
    pub id: Uuid,
    pub media_type: MediaType,
    pub user: MediaSessionUser,
    pub updated_at: DateTime<Utc>,
}

type MediaKey = (Uuid, Uuid, MediaType);

/// Call rooms keyed by channel id.
///
/// A room holds at most one connection per user. Everything the relay forwards
/// carries the sender's `from` and the room's `channel_id`, whatever the client
/// put there.
pub struct RoomManager {
    /// channel id -> user id -> member
    rooms: RwLock<HashMap<Uuid, HashMap<Uuid, Member>>>,
    media_sessions: RwLock<HashMap<MediaKey, MediaSession>>,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            media_sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a room.
    ///
    /// The joiner receives `existing-peers`, everyone else `peer-joined`. A previous
    /// connection of the same user is told to close and is removed silently.
    pub async fn join(
        &self,
        channel_id: Uuid,
        peer: PeerInfo,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Vec<PeerInfo> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(channel_id).or_default();

        if let Some(old) = room.remove(&peer.user_id) {
            tracing::info!(
                "User {} rejoined channel {}, replacing connection {}",
                peer.user_id,
                channel_id,
                old.connection_id
            );
            let _ = old.sender.send(Outbound::Close);
        }

        let mut existing: Vec<PeerInfo> = room
            .iter()
            .map(|(user_id, member)| PeerInfo {
                user_id: *user_id,
                username: member.username.clone(),
            })
            .collect();
        existing.sort_by(|a, b| a.username.cmp(&b.username).then(a.user_id.cmp(&b.user_id)));

        send_signal(
            &sender,
            channel_id,
            Uuid::nil(),
            Some(peer.user_id),
            Signal::ExistingPeers(existing.clone()),
        );

        for member in room.values() {
            send_signal(
                &member.sender,
                channel_id,
                peer.user_id,
                None,
                Signal::PeerJoined(peer.clone()),
            );
        }

        room.insert(
            peer.user_id,
            Member {
                connection_id,
                username: peer.username.clone(),
                sender,
            },
        );

        tracing::info!(
            "User {} ({}) joined channel {} with {} other participant(s)",
            peer.user_id,
            peer.username,
            channel_id,
            existing.len()
        );

        existing
    }

    /// Remove a connection from its room.
    ///
    /// Ignored when the user has since reconnected on another socket.
    pub async fn leave(&self, channel_id: Uuid, user_id: Uuid, connection_id: Uuid) {
        {
            // Lock order: rooms, then media sessions
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(&channel_id) else {
                return;
            };

            match room.get(&user_id) {
                Some(member) if member.connection_id == connection_id => {}
                _ => {
                    tracing::debug!(
                        "Stale connection {} for user {} left channel {}",
                        connection_id,
                        user_id,
                        channel_id
                    );
                    return;
                }
            }

            room.remove(&user_id);

            let now = Utc::now();
            let mut sessions = self.media_sessions.write().await;
            for ((channel, user, _), session) in sessions.iter_mut() {
                if *channel == channel_id && *user == user_id && session.is_active {
                    session.is_active = false;
                    session.updated_at = now;
                }
            }
            drop(sessions);

            for member in room.values() {
                send_signal(
                    &member.sender,
                    channel_id,
                    user_id,
                    None,
                    Signal::PeerLeft { user_id },
                );
            }

            if room.is_empty() {
                rooms.remove(&channel_id);
            }
        }

        tracing::info!("User {} left channel {}", user_id, channel_id);
    }

    /// Route a message received from `from`.
    ///
    /// Addressed messages go to their recipient only, un-addressed ones to the
    /// rest of the room. `media-state` is recorded and never forwarded.
    pub async fn relay(&self, channel_id: Uuid, from: Uuid, mut message: SignalMessage) {
        message.channel_id = channel_id;
        message.from = from;

        match message.kind {
            SignalKind::MediaState => {
                self.record_media_state(channel_id, from, &message).await;
                return;
            }
            // Room membership is the relay's business
            SignalKind::ExistingPeers | SignalKind::PeerJoined | SignalKind::PeerLeft => {
                tracing::warn!(
                    "Dropping {:?} sent by user {} in channel {}",
                    message.kind,
                    from,
                    channel_id
                );
                return;
            }
            _ => {}
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize signal: {}", e);
                return;
            }
        };

        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(&channel_id) else {
            return;
        };

        match message.to {
            Some(to) => match room.get(&to) {
                Some(member) => {
                    let _ = member.sender.send(Outbound::Text(text));
                }
                None => {
                    tracing::debug!(
                        "Dropping {:?} from {} to {}: not in channel {}",
                        message.kind,
                        from,
                        to,
                        channel_id
                    );
                }
            },
            None => {
                for (user_id, member) in room.iter() {
                    if *user_id != from {
                        let _ = member.sender.send(Outbound::Text(text.clone()));
                    }
                }
            }
        }
    }

    async fn record_media_state(&self, channel_id: Uuid, user_id: Uuid, message: &SignalMessage) {
        let (media_type, is_active) = match message.signal() {
            Ok(Signal::MediaState {
                media_type,
                is_active,
            }) => (media_type, is_active),
            Ok(_) => return,
            Err(e) => {
                tracing::warn!("Malformed media-state from user {}: {}", user_id, e);
                return;
            }
        };

        let username = {
            let rooms = self.rooms.read().await;
            match rooms.get(&channel_id).and_then(|room| room.get(&user_id)) {
                Some(member) => member.username.clone(),
                None => return,
            }
        };

        tracing::debug!(
            "User {} {} {} in channel {}",
            user_id,
            if is_active { "started" } else { "stopped" },
            media_type,
            channel_id
        );

        let now = Utc::now();
        let mut sessions = self.media_sessions.write().await;
        let session = sessions
            .entry((channel_id, user_id, media_type))
            .or_insert_with(|| MediaSession {
                id: Uuid::new_v4(),
                username: username.clone(),
                is_active,
                updated_at: now,
            });
        session.username = username;
        session.is_active = is_active;
        session.updated_at = now;
    }

    /// Active media sessions in a channel, oldest first
    pub async fn media_sessions(&self, channel_id: Uuid) -> Vec<MediaSessionInfo> {
        let sessions = self.media_sessions.read().await;
        let mut active: Vec<MediaSessionInfo> = sessions
            .iter()
            .filter(|((channel, _, _), session)| *channel == channel_id && session.is_active)
            .map(|((_, user_id, media_type), session)| MediaSessionInfo {
                id: session.id,
                media_type: *media_type,
                user: MediaSessionUser {
                    id: *user_id,
                    username: session.username.clone(),
                },
                updated_at: session.updated_at,
            })
            .collect();
        active.sort_by_key(|s| s.updated_at);
        active
    }

    pub async fn participants(&self, channel_id: Uuid) -> Vec<PeerInfo> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&channel_id)
            .map(|room| {
                room.iter()
                    .map(|(user_id, member)| PeerInfo {
                        user_id: *user_id,
                        username: member.username.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn send_signal(
    sender: &mpsc::UnboundedSender<Outbound>,
    channel_id: Uuid,
    from: Uuid,
    to: Option<Uuid>,
    signal: Signal,
) {
    match SignalMessage::new(channel_id, from, to, signal).and_then(|m| m.to_json()) {
        Ok(text) => {
            let _ = sender.send(Outbound::Text(text));
        }
        Err(e) => tracing::error!("Failed to encode signal: {}", e),
    }
}
