//! Signaling protocol shared by the huddle client and relay.
//!
//! Every message on the per-channel signaling socket is a JSON object of the
//! shape `{ type, channel_id, from, to?, payload }`. The relay stamps `from`
//! and `channel_id` on everything it forwards.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
