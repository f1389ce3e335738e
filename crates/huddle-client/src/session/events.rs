use std::fmt;

use huddle_media::LocalStream;
use uuid::Uuid;

use crate::peer::{ConnectionEvent, RemoteStream};
use crate::signaling::{TransportEvent, TransportState};

/// Everything a [`CallSession`](super::CallSession) reacts to, funnelled
/// through one queue so that handlers never interleave
#[derive(Debug)]
pub enum SessionEvent {
    Transport(TransportEvent),
    /// A peer connection callback, tagged with the connection it came from
    Connection {
        peer_id: Uuid,
        generation: u64,
        event: ConnectionEvent,
    },
    Command(Command),
    /// A shared screen ended without us stopping it
    ScreenShareEnded { track_id: String },
}

/// User actions on a running call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnableAudio,
    DisableAudio,
    ToggleAudio,
    EnableVideo,
    DisableVideo,
    ToggleVideo,
    EnableScreenShare,
    DisableScreenShare,
    ToggleScreenShare,
    Leave,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    PeerJoined { peer_id: Uuid, display_name: String },
    PeerLeft { peer_id: Uuid },
    RemoteStream { peer_id: Uuid, stream: RemoteStream },
    Notice(Notice),
    /// The call is over; no further events follow
    Ended,
}

/// Transient user-visible failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    MicrophoneUnavailable(String),
    CameraUnavailable(String),
    ScreenShareUnavailable(String),
    NotConnected,
    PeerUnreachable { peer_id: Uuid },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::MicrophoneUnavailable(reason) => write!(f, "Could not access microphone: {}", reason),
            Notice::CameraUnavailable(reason) => write!(f, "Could not access camera: {}", reason),
            Notice::ScreenShareUnavailable(reason) => write!(f, "Could not share screen: {}", reason),
            Notice::NotConnected => f.write_str("Not connected to the call server"),
            Notice::PeerUnreachable { peer_id } => write!(f, "Lost connection to {}", peer_id),
        }
    }
}

/// Identity of the local participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer_id: Uuid,
    pub display_name: String,
    pub has_stream: bool,
}

/// Read-only view of a call for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub channel_id: Option<Uuid>,
    pub transport_state: TransportState,
    pub is_connected: bool,
    pub peers: Vec<PeerSummary>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub local_stream: LocalStream,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            channel_id: None,
            transport_state: TransportState::Disconnected,
            is_connected: false,
            peers: Vec::new(),
            audio_enabled: false,
            video_enabled: false,
            screen_sharing: false,
            local_stream: LocalStream::default(),
        }
    }
}
