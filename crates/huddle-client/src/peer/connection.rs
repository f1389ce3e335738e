use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use huddle_media::{LocalTrack, MediaKind};
use huddle_protocol::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::track::track_remote::TrackRemote;

use crate::error::NegotiationError;
use crate::session::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A track received from a remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    stream_id: String,
    kind: MediaKind,
    rtp: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            rtp: None,
        }
    }

    pub fn from_rtp(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = MediaKind::from_codec_type(track.kind())?;
        Some(Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind,
            rtp: Some(track),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// The underlying RTP track, for whoever renders or plays it
    pub fn rtp(&self) -> Option<&Arc<TrackRemote>> {
        self.rtp.as_ref()
    }
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.stream_id == other.stream_id && self.kind == other.kind
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Everything a peer sends us, grouped as one stream holding at most one
/// track per kind
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(first: RemoteTrack) -> Self {
        Self {
            id: first.stream_id.clone(),
            tracks: vec![first],
        }
    }

    /// Add `track`, replacing an older track of the same kind.
    /// Returns false if the track was already present.
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.contains(&track) {
            return false;
        }
        self.tracks.retain(|t| t.kind != track.kind);
        self.tracks.push(track);
        true
    }

    pub fn track(&self, kind: MediaKind) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }
}

/// Connection-level callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    NegotiationNeeded,
    LocalCandidate(IceCandidate),
    IceStateChanged(IceConnectionState),
    ConnectionStateChanged(PeerConnectionState),
    Track(RemoteTrack),
}

/// Feeds a connection's callbacks into the session's event queue, tagged
/// with the peer and the connection generation they belong to
#[derive(Debug, Clone)]
pub struct ConnectionObserver {
    peer_id: Uuid,
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ConnectionObserver {
    pub fn new(peer_id: Uuid, generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            peer_id,
            generation,
            tx,
        }
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.tx.send(SessionEvent::Connection {
            peer_id: self.peer_id,
            generation: self.generation,
            event,
        });
    }
}

/// One peer-to-peer media connection.
///
/// Implementations report their callbacks through the [`ConnectionObserver`]
/// they were created with. Adding a sender must eventually report
/// [`ConnectionEvent::NegotiationNeeded`]; replacing a sender's track must not.
/// There is no rollback: an applied local offer is either answered,
/// superseded by another local offer, or discarded with the connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    fn signaling_state(&self) -> SignalingState;

    /// Whether a sender of `kind` has been added to this connection
    async fn has_sender(&self, kind: MediaKind) -> bool;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), NegotiationError>;

    /// Swap the track of the existing `kind` sender; `None` leaves it silent
    async fn replace_track(&self, kind: MediaKind, track: Option<&LocalTrack>) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, observer: ConnectionObserver) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}
