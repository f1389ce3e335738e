//! Huddle client library
//!
//! This crate provides the mesh call core for huddle: the signaling
//! transport, peer sessions and their negotiation, connection health, and
//! the local media controller, tied together by a per-call session.

pub mod config;
pub mod error;
pub mod health;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::ClientConfig;
pub use error::{NegotiationError, TransportError};
pub use session::{Call, CallEvent, CallSession, Command, Identity, Notice, SessionSnapshot};
