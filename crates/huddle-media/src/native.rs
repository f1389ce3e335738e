//! Capture from the devices of this machine
//!
//! Source elements per platform:
//! - Camera: v4l2src (Linux), avfvideosrc (macOS), mfvideosrc (Windows)
//! - Screen: ximagesrc (Linux), avfvideosrc capture-screen=true (macOS),
//!   d3d11screencapturesrc (Windows)
//! - System audio: pulsesrc monitor (Linux), wasapisrc loopback (Windows)

use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::MicrophoneCapture;
use crate::devices::{DisplayCapture, MediaDevices, MediaError};
use crate::track::{LocalTrack, TrackSource};

const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(33);
const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

#[cfg(target_os = "linux")]
const CAMERA_SOURCES: &[&str] = &["v4l2src"];
#[cfg(target_os = "macos")]
const CAMERA_SOURCES: &[&str] = &["avfvideosrc"];
#[cfg(target_os = "windows")]
const CAMERA_SOURCES: &[&str] = &["mfvideosrc", "ksvideosrc"];
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const CAMERA_SOURCES: &[&str] = &[];

#[cfg(target_os = "linux")]
const SCREEN_SOURCES: &[(&str, &str)] = &[("ximagesrc", "ximagesrc show-pointer=true use-damage=false")];
#[cfg(target_os = "macos")]
const SCREEN_SOURCES: &[(&str, &str)] = &[(
    "avfvideosrc",
    "avfvideosrc capture-screen=true capture-screen-cursor=true",
)];
#[cfg(target_os = "windows")]
const SCREEN_SOURCES: &[(&str, &str)] = &[("d3d11screencapturesrc", "d3d11screencapturesrc show-cursor=true")];
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const SCREEN_SOURCES: &[(&str, &str)] = &[];

#[cfg(target_os = "linux")]
const SYSTEM_AUDIO_SOURCES: &[(&str, &str)] = &[("pulsesrc", "pulsesrc device=@DEFAULT_MONITOR@")];
#[cfg(target_os = "windows")]
const SYSTEM_AUDIO_SOURCES: &[(&str, &str)] = &[("wasapisrc", "wasapisrc loopback=true low-latency=true")];
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
const SYSTEM_AUDIO_SOURCES: &[(&str, &str)] = &[];

/// Devices backed by cpal (microphone), nokhwa (camera discovery) and
/// GStreamer (camera, screen and system audio pipelines)
#[derive(Debug, Clone, Default)]
pub struct SystemDevices;

impl SystemDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for SystemDevices {
    async fn open_microphone(&self) -> Result<LocalTrack, MediaError> {
        let track = LocalTrack::new(TrackSource::Microphone);
        let runtime = tokio::runtime::Handle::current();
        let capture_track = track.clone();
        let capture =
            tokio::task::spawn_blocking(move || MicrophoneCapture::start(capture_track, runtime))
                .await
                .map_err(|e| MediaError::Unavailable(TrackSource::Microphone, e.to_string()))??;
        track.attach_capture(capture);
        Ok(track)
    }

    async fn open_camera(&self) -> Result<LocalTrack, MediaError> {
        let cameras = tokio::task::spawn_blocking(|| nokhwa::query(nokhwa::utils::ApiBackend::Auto))
            .await
            .map_err(|e| MediaError::Unavailable(TrackSource::Camera, e.to_string()))?
            .map_err(|e| camera_error(e.to_string()))?;

        let Some(camera) = cameras.first() else {
            return Err(MediaError::NoDevice(TrackSource::Camera));
        };
        tracing::info!("Opening camera: {}", camera.human_name());

        let element = find_element(CAMERA_SOURCES.iter().map(|name| (*name, *name)))
            .ok_or_else(|| {
                MediaError::Unavailable(TrackSource::Camera, "no camera source element".into())
            })?;

        let track = LocalTrack::new(TrackSource::Camera);
        start_pipeline(video_pipeline(element), track.clone(), VIDEO_FRAME_DURATION).await?;
        Ok(track)
    }

    async fn open_display(&self, with_audio: bool) -> Result<DisplayCapture, MediaError> {
        let element = find_element(SCREEN_SOURCES.iter().copied()).ok_or_else(|| {
            MediaError::Unavailable(TrackSource::Screen, "no screen capture source element".into())
        })?;

        let video = LocalTrack::new(TrackSource::Screen);
        start_pipeline(video_pipeline(element), video.clone(), VIDEO_FRAME_DURATION).await?;

        let audio = if with_audio {
            open_system_audio().await
        } else {
            None
        };

        Ok(DisplayCapture { video, audio })
    }
}

/// System audio is best effort; a missing loopback source only loses the audio
async fn open_system_audio() -> Option<LocalTrack> {
    let Some(element) = find_element(SYSTEM_AUDIO_SOURCES.iter().copied()) else {
        tracing::info!("No system audio source on this platform, sharing screen without audio");
        return None;
    };

    let track = LocalTrack::new(TrackSource::SystemAudio);
    let description = format!(
        "{} ! audioconvert ! audioresample ! audio/x-raw,rate=48000,channels=2 ! \
         opusenc frame-size=20 ! appsink name=sink sync=false max-buffers=8 drop=true",
        element
    );
    match start_pipeline(description, track.clone(), AUDIO_FRAME_DURATION).await {
        Ok(()) => Some(track),
        Err(e) => {
            tracing::warn!("System audio capture failed: {}", e);
            None
        }
    }
}

fn camera_error(message: String) -> MediaError {
    if message.to_lowercase().contains("permission") {
        MediaError::PermissionDenied(TrackSource::Camera)
    } else {
        MediaError::Unavailable(TrackSource::Camera, message)
    }
}

/// First source whose GStreamer element is installed, as a pipeline fragment
fn find_element<'a>(candidates: impl Iterator<Item = (&'a str, &'a str)>) -> Option<&'a str> {
    if let Err(e) = gst::init() {
        tracing::error!("Failed to initialise GStreamer: {}", e);
        return None;
    }
    for (factory, fragment) in candidates {
        if gst::ElementFactory::find(factory).is_some() {
            tracing::debug!("Using capture source {}", factory);
            return Some(fragment);
        }
    }
    None
}

fn video_pipeline(source: &str) -> String {
    // Realtime VP8 with a keyframe every two seconds
    format!(
        "{} ! videoconvert ! videoscale ! videorate ! \
         video/x-raw,format=I420,framerate=30/1 ! \
         vp8enc deadline=1 cpu-used=8 keyframe-max-dist=60 end-usage=cbr target-bitrate=1500000 ! \
         appsink name=sink sync=false max-buffers=2 drop=true",
        source
    )
}

async fn start_pipeline(
    description: String,
    track: LocalTrack,
    frame_duration: Duration,
) -> Result<(), MediaError> {
    let runtime = tokio::runtime::Handle::current();
    let source = track.source();
    let capture_track = track.clone();
    let capture = tokio::task::spawn_blocking(move || {
        PipelineCapture::start(&description, capture_track, runtime, frame_duration)
    })
    .await
    .map_err(|e| MediaError::Unavailable(source, e.to_string()))??;
    track.attach_capture(capture);
    Ok(())
}

/// A running `source ! encoder ! appsink` pipeline feeding a local track.
///
/// End of stream or a pipeline error (the user closing the capture from the
/// OS, a device being unplugged) stops the track.
struct PipelineCapture {
    pipeline: gst::Pipeline,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PipelineCapture {
    fn start(
        description: &str,
        track: LocalTrack,
        runtime: tokio::runtime::Handle,
        frame_duration: Duration,
    ) -> Result<Self, MediaError> {
        let source = track.source();
        let unavailable = |e: String| MediaError::Unavailable(source, e);

        tracing::info!("Starting {} pipeline: {}", source, description);

        let pipeline = gst::parse::launch(description)
            .map_err(|e| unavailable(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| unavailable("not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| unavailable("pipeline has no sink".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| unavailable("sink is not an appsink".into()))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(pipeline_error(source, &pipeline).unwrap_or_else(|| unavailable(e.to_string())));
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let bus = pipeline.bus();
        let thread = std::thread::Builder::new()
            .name(format!("huddle-{}", source).replace(' ', "-"))
            .spawn(move || {
                pull_loop(appsink, bus, track, runtime, thread_running, frame_duration)
            })
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self {
            pipeline,
            running,
            thread: Some(thread),
        })
    }
}

impl Drop for PipelineCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.pipeline.set_state(gst::State::Null);
        if let Some(thread) = self.thread.take() {
            // The pull loop itself stops the track when the pipeline ends
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn pipeline_error(source: TrackSource, pipeline: &gst::Pipeline) -> Option<MediaError> {
    let bus = pipeline.bus()?;
    while let Some(msg) = bus.pop() {
        if let gst::MessageView::Error(err) = msg.view() {
            let message = err.error().to_string();
            if message.to_lowercase().contains("permission")
                || message.to_lowercase().contains("not authorized")
            {
                return Some(MediaError::PermissionDenied(source));
            }
            return Some(MediaError::Unavailable(source, message));
        }
    }
    None
}

fn pull_loop(
    appsink: gst_app::AppSink,
    bus: Option<gst::Bus>,
    track: LocalTrack,
    runtime: tokio::runtime::Handle,
    running: Arc<AtomicBool>,
    frame_duration: Duration,
) {
    while running.load(Ordering::SeqCst) && track.is_live() {
        if let Some(bus) = &bus {
            while let Some(msg) = bus.pop() {
                match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::info!("{} capture ended", track.source());
                        track.stop();
                        return;
                    }
                    gst::MessageView::Error(err) => {
                        tracing::warn!("{} capture failed: {}", track.source(), err.error());
                        track.stop();
                        return;
                    }
                    _ => {}
                }
            }
        }

        let Some(sample) = appsink.try_pull_sample(gst::ClockTime::from_mseconds(100)) else {
            if appsink.is_eos() {
                tracing::info!("{} capture ended", track.source());
                track.stop();
                return;
            }
            continue;
        };
        let Some(buffer) = sample.buffer() else {
            continue;
        };
        let duration = buffer
            .duration()
            .map(|d| Duration::from_nanos(d.nseconds()))
            .unwrap_or(frame_duration);
        let data = match buffer.map_readable() {
            Ok(map) => map.as_slice().to_vec(),
            Err(e) => {
                tracing::warn!("Failed to map {} buffer: {}", track.source(), e);
                continue;
            }
        };
        if let Err(e) = runtime.block_on(track.write_sample(data, duration)) {
            tracing::warn!("Failed to write {} sample: {}", track.source(), e);
        }
    }
    tracing::debug!("{} capture thread exiting", track.source());
}
