//! Signaling side channel: one WebSocket per call, relayed by the server

pub mod reconnect;
pub mod transport;

pub use reconnect::{ReconnectPolicy, Reconnector};
pub use transport::{SignalSink, SignalingTransport, TransportEvent, TransportState};
