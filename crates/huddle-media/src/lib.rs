//! Local media for huddle calls
//!
//! This crate provides:
//! - `LocalTrack`: a sample-fed WebRTC track with a stop/ended lifecycle
//! - `MediaDevices`: the seam through which microphone, camera and display
//!   tracks are acquired
//! - Native capture (feature `native-capture`): microphone capture with Opus
//!   encoding, camera and display-source probing

pub mod devices;
pub mod track;

#[cfg(feature = "native-capture")]
pub mod audio;
#[cfg(feature = "native-capture")]
pub mod native;

pub use devices::*;
pub use track::*;

#[cfg(feature = "native-capture")]
pub use native::SystemDevices;
