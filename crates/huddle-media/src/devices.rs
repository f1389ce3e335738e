use async_trait::async_trait;
use thiserror::Error;

use crate::track::{LocalTrack, TrackSource};

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Permission denied for {0}")]
    PermissionDenied(TrackSource),

    #[error("No {0} device found")]
    NoDevice(TrackSource),

    #[error("{0} unavailable: {1}")]
    Unavailable(TrackSource, String),

    #[error("WebRTC error: {0}")]
    Rtc(#[from] webrtc::Error),
}

/// A display capture: the shared screen plus, when requested and available,
/// the system audio that goes with it
#[derive(Debug, Clone)]
pub struct DisplayCapture {
    pub video: LocalTrack,
    pub audio: Option<LocalTrack>,
}

impl DisplayCapture {
    pub fn stop(&self) {
        self.video.stop();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }
}

/// Acquisition of local capture tracks.
///
/// Every call produces a fresh, live track; the caller owns it and is
/// responsible for stopping it.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open_microphone(&self) -> Result<LocalTrack, MediaError>;

    async fn open_camera(&self) -> Result<LocalTrack, MediaError>;

    async fn open_display(&self, with_audio: bool) -> Result<DisplayCapture, MediaError>;
}

/// Devices for headless use: tracks carry whatever encoded samples the
/// embedding application writes into them.
#[derive(Debug, Clone, Default)]
pub struct HeadlessDevices;

#[async_trait]
impl MediaDevices for HeadlessDevices {
    async fn open_microphone(&self) -> Result<LocalTrack, MediaError> {
        Ok(LocalTrack::new(TrackSource::Microphone))
    }

    async fn open_camera(&self) -> Result<LocalTrack, MediaError> {
        Ok(LocalTrack::new(TrackSource::Camera))
    }

    async fn open_display(&self, with_audio: bool) -> Result<DisplayCapture, MediaError> {
        Ok(DisplayCapture {
            video: LocalTrack::new(TrackSource::Screen),
            audio: with_audio.then(|| LocalTrack::new(TrackSource::SystemAudio)),
        })
    }
}
