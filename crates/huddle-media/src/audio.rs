//! Microphone capture and Opus encoding
//!
//! cpal streams are not `Send` on every platform, so the stream lives on a
//! dedicated thread that downmixes to mono, cuts 20 ms frames, encodes them
//! with Opus and writes the packets into the local track.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use opus::Encoder as OpusEncoder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::devices::MediaError;
use crate::track::{LocalTrack, TrackSource};

/// Audio sample rate used for capture and encoding (48kHz)
pub const SAMPLE_RATE: u32 = 48000;

/// Frame size in samples (20ms at 48kHz = 960 samples)
pub const FRAME_SIZE: usize = 960;

const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Opus voice encoder (mono)
pub struct AudioEncoder {
    encoder: OpusEncoder,
}

impl AudioEncoder {
    pub fn new() -> Result<Self, opus::Error> {
        let encoder = OpusEncoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)?;
        Ok(Self { encoder })
    }

    /// Encode one frame of float PCM to an Opus packet
    pub fn encode_float(&mut self, pcm: &[f32]) -> Result<Vec<u8>, opus::Error> {
        let mut output = vec![0u8; 4000]; // Max opus packet size
        let len = self.encoder.encode_float(pcm, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    /// Set the bitrate (in bits per second)
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<(), opus::Error> {
        self.encoder.set_bitrate(opus::Bitrate::Bits(bitrate as i32))
    }
}

/// Running microphone capture; dropping it stops the stream and the thread
pub struct MicrophoneCapture {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    /// Start capturing from the default input device into `track`.
    ///
    /// Blocks until the device stream is running or has failed to open, so
    /// call it from a blocking context.
    pub fn start(track: LocalTrack, runtime: tokio::runtime::Handle) -> Result<Self, MediaError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), MediaError>>();

        let thread_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("huddle-microphone".into())
            .spawn(move || capture_loop(track, runtime, thread_running, ready_tx))
            .map_err(|e| MediaError::Unavailable(TrackSource::Microphone, e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(MediaError::Unavailable(
                TrackSource::Microphone,
                "capture thread exited during startup".into(),
            )),
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn open_input_stream(samples: mpsc::SyncSender<Vec<f32>>) -> Result<cpal::Stream, MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MediaError::NoDevice(TrackSource::Microphone))?;

    let unavailable = |e: String| MediaError::Unavailable(TrackSource::Microphone, e);

    let supported = device
        .supported_input_configs()
        .map_err(|e| unavailable(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .find(|c| c.min_sample_rate().0 <= SAMPLE_RATE && c.max_sample_rate().0 >= SAMPLE_RATE)
        .ok_or_else(|| unavailable("no 48 kHz float input format".into()))?;

    let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)).into();
    let channels = config.channels as usize;

    tracing::info!(
        "Starting microphone capture: {} Hz, {} channels",
        SAMPLE_RATE,
        channels
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Convert to mono by averaging all channels
                let mono: Vec<f32> = if channels > 1 {
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect()
                } else {
                    data.to_vec()
                };
                let _ = samples.try_send(mono);
            },
            |err| {
                tracing::error!("Microphone capture error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                MediaError::NoDevice(TrackSource::Microphone)
            }
            other => unavailable(other.to_string()),
        })?;

    stream.play().map_err(|e| unavailable(e.to_string()))?;
    Ok(stream)
}

fn capture_loop(
    track: LocalTrack,
    runtime: tokio::runtime::Handle,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), MediaError>>,
) {
    let (tx, rx) = mpsc::sync_channel::<Vec<f32>>(64);

    let mut encoder = match AudioEncoder::new() {
        Ok(encoder) => encoder,
        Err(e) => {
            let _ = ready.send(Err(MediaError::Unavailable(
                TrackSource::Microphone,
                format!("opus encoder: {}", e),
            )));
            return;
        }
    };

    let stream = match open_input_stream(tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SIZE * 2);
    while running.load(Ordering::SeqCst) && track.is_live() {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(samples) => {
                pending.extend(samples);
                while pending.len() >= FRAME_SIZE {
                    let frame: Vec<f32> = pending.drain(..FRAME_SIZE).collect();
                    let packet = match encoder.encode_float(&frame) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::warn!("Opus encode failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = runtime.block_on(track.write_sample(packet, FRAME_DURATION)) {
                        tracing::warn!("Failed to write microphone sample: {}", e);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    tracing::debug!("Microphone capture thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_silence_frame() {
        let mut encoder = AudioEncoder::new().unwrap();
        let packet = encoder.encode_float(&vec![0.0f32; FRAME_SIZE]).unwrap();
        assert!(!packet.is_empty());
    }
}
