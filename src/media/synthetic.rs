//! Synthetic capture devices: a sine tone microphone and a moving test
//! pattern camera. Used by the demo binary and by anything that needs media
//! without hardware.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::devices::{MediaConstraints, MediaDevices};
use super::stream::{LocalMediaStream, MediaFormat, MediaTrack, TrackKind, TrackSink};
use crate::error::{Error, Result};

pub const TONE_SAMPLE_RATE: u32 = 48_000;
const TONE_HZ: f32 = 440.0;
const AUDIO_FRAME: Duration = Duration::from_millis(20);
/// Preview frames are downscaled by this factor in both dimensions.
const PATTERN_SCALE: u32 = 16;

#[derive(Clone)]
pub struct SyntheticDevices {
    camera: bool,
    microphone: bool,
    stops: Arc<AtomicUsize>,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self {
            camera: true,
            microphone: true,
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Devices as seen when the user refused the permission prompt.
    pub fn denied() -> Self {
        Self {
            camera: false,
            microphone: false,
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_camera(mut self) -> Self {
        self.camera = false;
        self
    }

    /// Number of device handles released so far.
    pub fn released(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn release_counter(&self) -> impl FnOnce() + Send + 'static {
        let stops = Arc::clone(&self.stops);
        move || {
            stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalMediaStream> {
        if constraints.audio.is_none() && constraints.video.is_none() {
            return Err(Error::DeviceUnavailable("no media kinds requested".to_string()));
        }
        if constraints.audio.is_some() && !self.microphone {
            return Err(Error::DeviceUnavailable("microphone access denied".to_string()));
        }
        if constraints.video.is_some() && !self.camera {
            return Err(Error::DeviceUnavailable("camera access denied".to_string()));
        }

        let stream_id = format!("synthetic-{}", rand::random::<u32>());
        let mut tracks = Vec::new();
        let mut pending = Vec::new();

        if constraints.audio.is_some() {
            let id = format!("{stream_id}-audio");
            let format = MediaFormat::Pcm16 {
                sample_rate: TONE_SAMPLE_RATE,
                channels: 1,
            };
            tracks.push((id.clone(), TrackKind::Audio, format));
            pending.push(id);
        }
        if let Some(video) = &constraints.video {
            let id = format!("{stream_id}-video");
            let format = MediaFormat::Opaque("video/x-raw-gray".to_string());
            tracks.push((id.clone(), TrackKind::Video, format));
            pending.push(id);
            debug!(
                "synthetic camera at {}x{}@{}",
                video.width, video.height, video.frame_rate
            );
        }

        // Producers are spawned after the stream exists so they can hold sinks;
        // each track's stop hook aborts its producer.
        let mut handles = Vec::new();
        let stream_tracks: Vec<MediaTrack> = tracks
            .into_iter()
            .map(|(id, kind, format)| {
                let (abort_tx, abort_rx) = tokio::sync::oneshot::channel::<()>();
                handles.push((id.clone(), kind, abort_rx));
                let release = self.release_counter();
                MediaTrack::new(id, kind, format).with_stop_hook(move || {
                    let _ = abort_tx.send(());
                    release();
                })
            })
            .collect();
        let stream = LocalMediaStream::new(stream_id, stream_tracks);

        for (id, kind, abort_rx) in handles {
            let Some(sink) = stream.sink(&id) else {
                continue;
            };
            match kind {
                TrackKind::Audio => {
                    tokio::spawn(run_until_stopped(tone_producer(sink), abort_rx));
                }
                TrackKind::Video => {
                    let video = constraints.video.clone().unwrap_or_default();
                    tokio::spawn(run_until_stopped(
                        pattern_producer(sink, video.width, video.height, video.frame_rate),
                        abort_rx,
                    ));
                }
            }
        }

        info!("opened synthetic media stream {} ({} tracks)", stream.id(), pending.len());
        Ok(stream)
    }
}

async fn run_until_stopped(
    producer: impl std::future::Future<Output = ()>,
    abort_rx: tokio::sync::oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = producer => {}
        _ = abort_rx => {}
    }
}

async fn tone_producer(sink: TrackSink) {
    let samples_per_frame = (TONE_SAMPLE_RATE as u128 * AUDIO_FRAME.as_millis() / 1000) as usize;
    let mut ticker = tokio::time::interval(AUDIO_FRAME);
    let mut phase = 0f32;
    let step = 2.0 * std::f32::consts::PI * TONE_HZ / TONE_SAMPLE_RATE as f32;

    while !sink.is_ended() {
        ticker.tick().await;
        let mut buf = BytesMut::with_capacity(samples_per_frame * 2);
        for _ in 0..samples_per_frame {
            let value = (phase.sin() * 0.2 * i16::MAX as f32) as i16;
            buf.put_i16_le(value);
            phase = (phase + step) % (2.0 * std::f32::consts::PI);
        }
        sink.push(buf.freeze());
    }
}

async fn pattern_producer(sink: TrackSink, width: u32, height: u32, frame_rate: u32) {
    let w = (width / PATTERN_SCALE).max(1) as usize;
    let h = (height / PATTERN_SCALE).max(1) as usize;
    let period = Duration::from_millis(1000 / frame_rate.max(1) as u64);
    let mut ticker = tokio::time::interval(period);
    let mut frame: usize = 0;

    while !sink.is_ended() {
        ticker.tick().await;
        let pixels: Vec<u8> = (0..w * h)
            .map(|i| (((i % w) + frame) % 256) as u8)
            .collect();
        sink.push(Bytes::from(pixels));
        frame = frame.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denied_devices_fail() {
        let err = SyntheticDevices::denied()
            .open(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn tone_flows_until_stopped() {
        let devices = SyntheticDevices::new();
        let stream = devices.open(&MediaConstraints::audio_only()).await.unwrap();
        assert!(stream.has_kind(TrackKind::Audio));
        assert!(!stream.has_kind(TrackKind::Video));

        let mut rx = stream.subscribe();
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.data.len(), 960 * 2);

        assert_eq!(stream.stop_all(), 1);
        assert_eq!(devices.released(), 1);
    }

    #[tokio::test]
    async fn missing_camera_is_reported() {
        let err = SyntheticDevices::new()
            .without_camera()
            .open(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }
}
