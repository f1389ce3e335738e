//! Local capture state and its propagation to peer connections
//!
//! The controller owns every local track. The outgoing video sender carries
//! the screen while sharing and the camera otherwise; the camera keeps
//! running during a share so it can be restored when the share stops.

use std::sync::Arc;

use huddle_media::{DisplayCapture, LocalStream, LocalTrack, MediaDevices, MediaError, MediaKind};

use crate::peer::PeerSessionManager;

/// The tracks currently feeding the outgoing senders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalTracks {
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalMediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub local_tracks: LocalTracks,
}

pub struct MediaTrackController {
    devices: Arc<dyn MediaDevices>,
    share_audio: bool,
    audio: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<DisplayCapture>,
}

impl MediaTrackController {
    pub fn new(devices: Arc<dyn MediaDevices>, share_audio: bool) -> Self {
        Self {
            devices,
            share_audio,
            audio: None,
            camera: None,
            screen: None,
        }
    }

    pub async fn enable_audio(&mut self, peers: &PeerSessionManager) -> Result<(), MediaError> {
        let track = self.devices.open_microphone().await?;
        if let Some(old) = self.audio.replace(track.clone()) {
            old.stop();
        }
        tracing::info!("Microphone enabled ({})", track.id());
        push_track(peers, MediaKind::Audio, Some(&track)).await;
        Ok(())
    }

    pub async fn disable_audio(&mut self, peers: &PeerSessionManager) {
        if let Some(track) = self.audio.take() {
            track.stop();
            tracing::info!("Microphone disabled");
            push_track(peers, MediaKind::Audio, None).await;
        }
    }

    pub async fn enable_video(&mut self, peers: &PeerSessionManager) -> Result<(), MediaError> {
        let track = self.devices.open_camera().await?;
        if let Some(old) = self.camera.replace(track.clone()) {
            old.stop();
        }
        tracing::info!("Camera enabled ({})", track.id());
        // A running screen share keeps the video sender
        if self.screen.is_none() {
            push_track(peers, MediaKind::Video, Some(&track)).await;
        }
        Ok(())
    }

    pub async fn disable_video(&mut self, peers: &PeerSessionManager) {
        if let Some(track) = self.camera.take() {
            track.stop();
            tracing::info!("Camera disabled");
            if self.screen.is_none() {
                push_track(peers, MediaKind::Video, None).await;
            }
        }
    }

    /// Start sharing the screen, replacing any share in progress.
    /// Returns the shared video track so its out-of-band end can be watched.
    pub async fn enable_screen_share(&mut self, peers: &PeerSessionManager) -> Result<LocalTrack, MediaError> {
        let capture = self.devices.open_display(self.share_audio).await?;
        let video = capture.video.clone();
        if let Some(old) = self.screen.replace(capture) {
            old.stop();
        }
        tracing::info!("Screen share started ({})", video.id());
        push_track(peers, MediaKind::Video, Some(&video)).await;
        Ok(video)
    }

    /// Stop sharing; the camera goes back on the video sender if it is
    /// running, otherwise the sender is left empty. Returns false if no share
    /// was active.
    pub async fn disable_screen_share(&mut self, peers: &PeerSessionManager) -> bool {
        let Some(capture) = self.screen.take() else {
            return false;
        };
        capture.stop();
        if self.camera.is_some() {
            tracing::info!("Screen share stopped, restoring camera");
        } else {
            tracing::info!("Screen share stopped");
        }
        push_track(peers, MediaKind::Video, self.camera.as_ref()).await;
        true
    }

    /// Id of the shared screen track, if sharing
    pub fn screen_track_id(&self) -> Option<&str> {
        self.screen.as_ref().map(|s| s.video.id())
    }

    fn video_track(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().map(|s| &s.video).or(self.camera.as_ref())
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }

    pub fn video_enabled(&self) -> bool {
        self.camera.is_some()
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn state(&self) -> LocalMediaState {
        LocalMediaState {
            audio_enabled: self.audio_enabled(),
            video_enabled: self.video_enabled(),
            screen_sharing: self.screen_sharing(),
            local_tracks: LocalTracks {
                audio: self.audio.clone(),
                video: self.video_track().cloned(),
            },
        }
    }

    /// The canonical local stream for local rendering
    pub fn local_stream(&self) -> LocalStream {
        LocalStream::new(self.audio.clone(), self.video_track().cloned())
    }

    /// Tracks a newly created peer connection should start sending
    pub fn active_tracks(&self) -> Vec<LocalTrack> {
        self.audio
            .iter()
            .chain(self.video_track())
            .cloned()
            .collect()
    }

    pub fn stop_all(&mut self) {
        if let Some(track) = self.audio.take() {
            track.stop();
        }
        if let Some(track) = self.camera.take() {
            track.stop();
        }
        if let Some(capture) = self.screen.take() {
            capture.stop();
        }
    }
}

/// Point every peer's `kind` sender at `track`: replace the track of an
/// existing sender, or add a sender the first time the kind is produced.
/// Failures only affect the peer they happen on.
async fn push_track(peers: &PeerSessionManager, kind: MediaKind, track: Option<&LocalTrack>) {
    for peer in peers.all_peers() {
        let connection = &peer.connection;
        let result = if connection.has_sender(kind).await {
            connection.replace_track(kind, track).await
        } else if let Some(track) = track {
            connection.add_track(track).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            tracing::warn!("Failed to update {} sender for {}: {}", kind, peer.id, e);
        }
    }
}
