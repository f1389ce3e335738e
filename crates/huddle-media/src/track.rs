use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::devices::MediaError;

/// Stream id shared by every local track, like a browser's single local `MediaStream`
pub const LOCAL_STREAM_ID: &str = "huddle-local";

/// Kind of track sender on a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn codec_type(&self) -> RTPCodecType {
        match self {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }

    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Device a local track is produced by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
    SystemAudio,
}

impl TrackSource {
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackSource::Microphone | TrackSource::SystemAudio => MediaKind::Audio,
            TrackSource::Camera | TrackSource::Screen => MediaKind::Video,
        }
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        match self.kind() {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::Microphone => f.write_str("microphone"),
            TrackSource::Camera => f.write_str("camera"),
            TrackSource::Screen => f.write_str("screen"),
            TrackSource::SystemAudio => f.write_str("system audio"),
        }
    }
}

/// A local media track.
///
/// Cloning is cheap and every clone refers to the same underlying track.
/// Stopping is idempotent; once stopped the track never produces media again
/// and everyone waiting on [`LocalTrack::ended`] is woken.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    source: TrackSource,
    rtp: Arc<TrackLocalStaticSample>,
    ended: watch::Sender<bool>,
    /// Keeps the capture pipeline alive; dropped on stop
    capture: Mutex<Option<Box<dyn Send>>>,
}

impl LocalTrack {
    pub fn new(source: TrackSource) -> Self {
        let id = format!("{}-{}", source.kind(), Uuid::new_v4());
        let rtp = Arc::new(TrackLocalStaticSample::new(
            source.codec(),
            id.clone(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        let (ended, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                id,
                source,
                rtp,
                ended,
                capture: Mutex::new(None),
            }),
        }
    }

    /// Attach a capture pipeline whose lifetime is bound to this track
    pub fn attach_capture(&self, guard: impl Send + 'static) {
        if let Ok(mut capture) = self.inner.capture.lock() {
            *capture = Some(Box::new(guard));
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    /// The WebRTC track to hand to a peer connection sender
    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.rtp.clone()
    }

    pub fn is_live(&self) -> bool {
        !*self.inner.ended.borrow()
    }

    /// Stop the track and release its capture pipeline
    pub fn stop(&self) {
        let was_live = self.inner.ended.send_if_modified(|ended| {
            let changed = !*ended;
            *ended = true;
            changed
        });
        if was_live {
            if let Ok(mut capture) = self.inner.capture.lock() {
                capture.take();
            }
            tracing::debug!("Stopped {} track {}", self.inner.source, self.inner.id);
        }
    }

    /// Resolves once the track has been stopped, by us or by the capture backend
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Push one encoded media sample; samples written after stop are dropped
    pub async fn write_sample(&self, data: Vec<u8>, duration: Duration) -> Result<(), MediaError> {
        if !self.is_live() {
            return Ok(());
        }
        let sample = Sample {
            data: data.into(),
            duration,
            ..Default::default()
        };
        self.inner.rtp.write_sample(&sample).await?;
        Ok(())
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for LocalTrack {}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Canonical local stream for local rendering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalStream {
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(audio: Option<LocalTrack>, video: Option<LocalTrack>) -> Self {
        Self {
            tracks: audio.into_iter().chain(video).collect(),
        }
    }

    pub fn id(&self) -> &str {
        LOCAL_STREAM_ID
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
