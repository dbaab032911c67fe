//! Local media streams and their tracks.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Encoding of the payload carried by a [`MediaChunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFormat {
    /// Interleaved little-endian i16 samples
    Pcm16 { sample_rate: u32, channels: u16 },
    /// G.711 mu-law, 8 kHz mono
    Pcmu,
    Vp8,
    Opaque(String),
}

impl MediaFormat {
    pub fn mime_type(&self) -> &str {
        match self {
            MediaFormat::Pcm16 { .. } => "audio/L16",
            MediaFormat::Pcmu => "audio/PCMU",
            MediaFormat::Vp8 => "video/VP8",
            MediaFormat::Opaque(mime) => mime,
        }
    }
}

/// One unit of captured media.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub track_id: String,
    pub kind: TrackKind,
    pub format: MediaFormat,
    pub captured_at: DateTime<Utc>,
    pub data: Bytes,
}

type StopHook = Box<dyn FnOnce() + Send>;

pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    format: MediaFormat,
    enabled: AtomicBool,
    ended: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, format: MediaFormat) -> Self {
        Self {
            id: id.into(),
            kind,
            format,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            on_stop: Mutex::new(None),
        }
    }

    /// Register the device release hook run when the track stops.
    pub fn with_stop_hook(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.on_stop.lock() = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that actually ended the track.
    pub fn stop(&self) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(hook) = self.on_stop.lock().take() {
            hook();
        }
        true
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

struct StreamInner {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
    feed: broadcast::Sender<MediaChunk>,
}

/// Camera/microphone stream owned by the local participant.
///
/// Clones share the same tracks and feed; the preview, every peer connection
/// and the recorder all hold clones of one stream.
#[derive(Clone)]
pub struct LocalMediaStream {
    inner: Arc<StreamInner>,
}

impl LocalMediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks: tracks.into_iter().map(Arc::new).collect(),
                feed,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn ptr_eq(&self, other: &LocalMediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.inner.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<MediaTrack>> {
        self.inner.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.track(kind).is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaChunk> {
        self.inner.feed.subscribe()
    }

    /// Sink a device backend writes captured payloads into.
    pub fn sink(&self, track_id: &str) -> Option<TrackSink> {
        let track = self.inner.tracks.iter().find(|t| t.id() == track_id)?;
        Some(TrackSink {
            track: Arc::clone(track),
            feed: self.inner.feed.clone(),
        })
    }

    pub fn all_ended(&self) -> bool {
        self.inner.tracks.iter().all(|t| t.is_ended())
    }

    /// Stop every track. Returns how many tracks this call ended.
    pub fn stop_all(&self) -> usize {
        self.inner.tracks.iter().filter(|t| t.stop()).count()
    }
}

impl fmt::Debug for LocalMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

/// Write side of one track's contribution to the stream feed.
#[derive(Clone)]
pub struct TrackSink {
    track: Arc<MediaTrack>,
    feed: broadcast::Sender<MediaChunk>,
}

impl TrackSink {
    /// Publish a payload; dropped while the track is disabled or ended.
    pub fn push(&self, data: Bytes) -> bool {
        if self.track.is_ended() || !self.track.is_enabled() {
            return false;
        }
        let chunk = MediaChunk {
            track_id: self.track.id().to_string(),
            kind: self.track.kind(),
            format: self.track.format().clone(),
            captured_at: Utc::now(),
            data,
        };
        // No receivers is fine: nobody is watching yet.
        let _ = self.feed.send(chunk);
        true
    }

    pub fn is_ended(&self) -> bool {
        self.track.is_ended()
    }

    pub fn format(&self) -> &MediaFormat {
        self.track.format()
    }
}

/// Read-only view of a remote participant's media.
#[derive(Clone)]
pub struct RemoteStream {
    id: String,
    feed: broadcast::Sender<MediaChunk>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self { id: id.into(), feed }
    }

    /// View onto a local stream, used when both ends live in one process.
    pub fn mirror(local: &LocalMediaStream) -> Self {
        Self {
            id: local.id().to_string(),
            feed: local.inner.feed.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaChunk> {
        self.feed.subscribe()
    }

    pub(crate) fn publish(&self, chunk: MediaChunk) {
        let _ = self.feed.send(chunk);
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn audio_track(id: &str) -> MediaTrack {
        MediaTrack::new(id, TrackKind::Audio, MediaFormat::Pcm16 { sample_rate: 48_000, channels: 1 })
    }

    #[test]
    fn stop_hook_runs_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let stream = LocalMediaStream::new(
            "s",
            vec![audio_track("a").with_stop_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })],
        );
        assert_eq!(stream.stop_all(), 1);
        assert_eq!(stream.stop_all(), 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(stream.all_ended());
    }

    #[tokio::test]
    async fn disabled_track_emits_nothing() {
        let stream = LocalMediaStream::new("s", vec![audio_track("a")]);
        let mut rx = stream.subscribe();
        let sink = stream.sink("a").unwrap();

        stream.track(TrackKind::Audio).unwrap().set_enabled(false);
        assert!(!sink.push(Bytes::from_static(&[1, 2])));
        stream.track(TrackKind::Audio).unwrap().set_enabled(true);
        assert!(sink.push(Bytes::from_static(&[3, 4])));

        let chunk = rx.recv().await.unwrap();
        assert_eq!(&chunk.data[..], &[3, 4]);
        assert_eq!(chunk.kind, TrackKind::Audio);
    }
}
