//! Peer connections and the sessions that own them

pub mod connection;
pub mod manager;
pub mod rtc;

pub use connection::{
    ConnectionEvent, ConnectionObserver, IceConnectionState, PeerConnection, PeerConnectionFactory,
    PeerConnectionState, RemoteStream, RemoteTrack, SignalingState,
};
pub use manager::{Peer, PeerSessionManager};
pub use rtc::{RtcPeerConnection, RtcPeerConnectionFactory};
