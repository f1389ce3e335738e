use std::collections::HashMap;
use std::sync::Arc;

use huddle_media::{LocalTrack, MediaKind};
use huddle_protocol::IceCandidate;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::connection::{ConnectionObserver, PeerConnection, PeerConnectionFactory, RemoteStream, RemoteTrack};
use crate::error::NegotiationError;
use crate::negotiation::{NegotiationState, QueuedOffer};
use crate::session::SessionEvent;

/// One remote participant's session
pub struct Peer {
    pub id: Uuid,
    pub display_name: String,
    pub connection: Arc<dyn PeerConnection>,
    /// Distinguishes this connection's callbacks from a replaced one's
    pub generation: u64,
    /// The polite side yields when both sides offer at once
    pub polite: bool,
    pub negotiation: NegotiationState,
    pub queued_offer: Option<QueuedOffer>,
    /// Sender kinds our last sent offer carried
    pub offered_senders: Option<Vec<MediaKind>>,
    /// Remote candidates received before the remote description
    pub pending_candidates: Vec<IceCandidate>,
    pub remote_stream: Option<RemoteStream>,
}

impl Peer {
    pub fn queue_offer(&mut self, offer: QueuedOffer) {
        self.queued_offer = Some(match (self.queued_offer, offer) {
            (Some(QueuedOffer::IceRestart), _) | (_, QueuedOffer::IceRestart) => QueuedOffer::IceRestart,
            _ => QueuedOffer::Renegotiate,
        });
    }

    /// Record a remote track; returns the updated stream if it changed
    pub fn attach_remote_track(&mut self, track: RemoteTrack) -> Option<RemoteStream> {
        match &mut self.remote_stream {
            Some(stream) => {
                if !stream.add_track(track) {
                    return None;
                }
            }
            None => self.remote_stream = Some(RemoteStream::new(track)),
        }
        self.remote_stream.clone()
    }
}

/// Owns the peer sessions of a call, keyed by peer id
pub struct PeerSessionManager {
    local_id: Uuid,
    peers: HashMap<Uuid, Peer>,
    factory: Arc<dyn PeerConnectionFactory>,
    loopback: mpsc::UnboundedSender<SessionEvent>,
    next_generation: u64,
}

impl PeerSessionManager {
    pub fn new(
        local_id: Uuid,
        factory: Arc<dyn PeerConnectionFactory>,
        loopback: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            local_id,
            peers: HashMap::new(),
            factory,
            loopback,
            next_generation: 1,
        }
    }

    /// Create a peer and attach `local_tracks` to its connection.
    ///
    /// Returns `Ok(false)` without touching anything if the peer already
    /// exists.
    pub async fn create_peer(
        &mut self,
        peer_id: Uuid,
        display_name: &str,
        local_tracks: &[LocalTrack],
    ) -> Result<bool, NegotiationError> {
        if self.peers.contains_key(&peer_id) {
            tracing::debug!("Peer {} already exists", peer_id);
            return Ok(false);
        }

        let (connection, generation) = self.open_connection(peer_id, local_tracks).await?;

        tracing::info!(
            "Created peer {} ({}) with {} local tracks",
            display_name,
            peer_id,
            local_tracks.len()
        );

        self.peers.insert(
            peer_id,
            Peer {
                id: peer_id,
                display_name: display_name.to_string(),
                connection,
                generation,
                polite: self.local_id < peer_id,
                negotiation: NegotiationState::Idle,
                queued_offer: None,
                offered_senders: None,
                pending_candidates: Vec::new(),
                remote_stream: None,
            },
        );
        Ok(true)
    }

    /// Swap a peer's connection for a new one carrying `local_tracks`.
    ///
    /// Negotiation starts over and callbacks from the old connection turn
    /// stale. The peer itself stays, so no leave or join is reported.
    pub async fn replace_connection(
        &mut self,
        peer_id: Uuid,
        local_tracks: &[LocalTrack],
    ) -> Result<(), NegotiationError> {
        if !self.peers.contains_key(&peer_id) {
            return Err(NegotiationError::UnknownPeer(peer_id));
        }
        let (connection, generation) = self.open_connection(peer_id, local_tracks).await?;
        let peer = self
            .peers
            .get_mut(&peer_id)
            .ok_or(NegotiationError::UnknownPeer(peer_id))?;

        let old = std::mem::replace(&mut peer.connection, connection);
        peer.generation = generation;
        peer.negotiation = NegotiationState::Idle;
        peer.queued_offer = None;
        peer.offered_senders = None;
        peer.pending_candidates.clear();
        peer.remote_stream = None;

        if let Err(e) = old.close().await {
            tracing::debug!("Error closing replaced connection to {}: {}", peer_id, e);
        }
        tracing::info!("Replaced connection to {} (generation {})", peer_id, generation);
        Ok(())
    }

    async fn open_connection(
        &mut self,
        peer_id: Uuid,
        local_tracks: &[LocalTrack],
    ) -> Result<(Arc<dyn PeerConnection>, u64), NegotiationError> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let observer = ConnectionObserver::new(peer_id, generation, self.loopback.clone());
        let connection = self.factory.create(observer).await?;

        for track in local_tracks {
            if let Err(e) = connection.add_track(track).await {
                tracing::warn!("Failed to attach {} track for {}: {}", track.kind(), peer_id, e);
            }
        }
        Ok((connection, generation))
    }

    /// Close and forget a peer
    pub async fn remove_peer(&mut self, peer_id: Uuid) -> Option<Peer> {
        let peer = self.peers.remove(&peer_id)?;
        if let Err(e) = peer.connection.close().await {
            tracing::debug!("Error closing connection to {}: {}", peer_id, e);
        }
        tracing::info!("Removed peer {} ({})", peer.display_name, peer_id);
        Some(peer)
    }

    /// Close and forget every peer
    pub async fn remove_all(&mut self) -> Vec<Peer> {
        let ids: Vec<Uuid> = self.peers.keys().copied().collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(peer) = self.remove_peer(id).await {
                removed.push(peer);
            }
        }
        removed
    }

    pub fn get_peer(&self, peer_id: Uuid) -> Option<&Peer> {
        self.peers.get(&peer_id)
    }

    pub fn get_peer_mut(&mut self, peer_id: Uuid) -> Option<&mut Peer> {
        self.peers.get_mut(&peer_id)
    }

    pub fn all_peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn contains(&self, peer_id: Uuid) -> bool {
        self.peers.contains_key(&peer_id)
    }

    /// Whether `generation` is the live connection of `peer_id`
    pub fn is_current(&self, peer_id: Uuid, generation: u64) -> bool {
        self.peers
            .get(&peer_id)
            .is_some_and(|p| p.generation == generation)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
