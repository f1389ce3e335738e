use huddle_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected to the signaling server")]
    NotConnected,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(Uuid),

    #[error("WebRTC error: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("Invalid negotiation state: {0}")]
    InvalidState(String),

    #[error("Peer connection closed")]
    Closed,

    #[error("Signaling failed: {0}")]
    Signaling(#[from] TransportError),
}

impl NegotiationError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, NegotiationError::Signaling(TransportError::NotConnected))
    }
}
