//! The media capture unit: one local stream plus its recorder.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::devices::{MediaConstraints, MediaDevices};
use super::recorder::{Recorder, RecordingArtifact, RecordingEvent, RecordingState};
use super::stream::{LocalMediaStream, TrackKind};
use crate::config::RecordingConfig;
use crate::error::{Error, Result};

pub struct MediaCapture {
    devices: Arc<dyn MediaDevices>,
    stream: RwLock<Option<LocalMediaStream>>,
    recorder: Recorder,
}

impl MediaCapture {
    pub fn new(devices: Arc<dyn MediaDevices>, recording: RecordingConfig) -> Self {
        Self {
            devices,
            stream: RwLock::new(None),
            recorder: Recorder::new(recording),
        }
    }

    /// Ask the devices for a stream and make it the current local stream.
    pub async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMediaStream> {
        let stream = self.devices.open(constraints).await?;
        let previous = self.stream.write().replace(stream.clone());
        if let Some(previous) = previous {
            // Re-acquiring releases the previous devices.
            previous.stop_all();
        }
        info!(
            "acquired local stream {} (audio: {}, video: {})",
            stream.id(),
            stream.has_kind(TrackKind::Audio),
            stream.has_kind(TrackKind::Video)
        );
        Ok(stream)
    }

    pub fn local_stream(&self) -> Option<LocalMediaStream> {
        self.stream.read().clone()
    }

    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.stream
            .read()
            .as_ref()
            .and_then(|s| s.track(kind).map(|t| t.is_enabled()))
            .unwrap_or(false)
    }

    /// Flip a track's enabled flag in place. The stream and every connection
    /// carrying it are left untouched.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<bool> {
        let guard = self.stream.read();
        let stream = guard
            .as_ref()
            .ok_or_else(|| Error::DeviceUnavailable("no local stream".to_string()))?;
        let track = stream
            .track(kind)
            .ok_or_else(|| Error::DeviceUnavailable(format!("no {} track", kind)))?;
        track.set_enabled(enabled);
        debug!("{} track {}", kind, if enabled { "enabled" } else { "disabled" });
        Ok(enabled)
    }

    pub fn toggle(&self, kind: TrackKind) -> Result<bool> {
        let current = self.is_enabled(kind);
        self.set_track_enabled(kind, !current)
    }

    pub fn start_recording(&self, stream: &LocalMediaStream) -> Result<()> {
        self.recorder.start(stream)
    }

    pub async fn stop_recording(&self) -> Result<RecordingArtifact> {
        self.recorder.stop().await
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder.state()
    }

    pub fn recording_elapsed(&self) -> Duration {
        self.recorder.elapsed()
    }

    pub fn recording_events(&self) -> tokio::sync::broadcast::Receiver<RecordingEvent> {
        self.recorder.subscribe()
    }

    /// Stop every local track. True only for the call that did the stopping.
    pub fn stop(&self) -> bool {
        let stream = self.stream.read().clone();
        match stream {
            Some(stream) => {
                let stopped = stream.stop_all();
                if stopped > 0 {
                    info!("stopped {} local tracks", stopped);
                }
                stopped > 0
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticDevices;

    #[tokio::test]
    async fn toggle_keeps_the_same_stream() {
        let capture = MediaCapture::new(Arc::new(SyntheticDevices::new()), RecordingConfig::default());
        let stream = capture.acquire(&MediaConstraints::default()).await.unwrap();

        assert!(!capture.set_track_enabled(TrackKind::Video, false).unwrap());
        assert!(!stream.track(TrackKind::Video).unwrap().is_enabled());
        assert!(capture.set_track_enabled(TrackKind::Video, true).unwrap());

        let current = capture.local_stream().unwrap();
        assert!(current.ptr_eq(&stream));
        assert!(stream.track(TrackKind::Video).unwrap().is_enabled());
        capture.stop();
    }

    #[tokio::test]
    async fn toggle_without_stream_fails() {
        let capture = MediaCapture::new(Arc::new(SyntheticDevices::new()), RecordingConfig::default());
        assert!(matches!(
            capture.toggle(TrackKind::Audio),
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let devices = SyntheticDevices::new();
        let capture = MediaCapture::new(Arc::new(devices.clone()), RecordingConfig::default());
        capture.acquire(&MediaConstraints::default()).await.unwrap();
        assert!(capture.stop());
        assert!(!capture.stop());
        assert_eq!(devices.released(), 2);
    }
}
