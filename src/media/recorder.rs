//! Recording of a local stream into a downloadable container.
//!
//! One recording at a time per recorder. Chunks are collected by a background
//! task into a [`ChunkBuffer`] and turned into a container on stop.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::buffer::ChunkBuffer;
use super::stream::{LocalMediaStream, MediaChunk, MediaFormat, TrackKind};
use crate::config::RecordingConfig;
use crate::error::{Error, Result};

const CHUNK_STREAM_MAGIC: &[u8; 4] = b"IVRC";
const CHUNK_STREAM_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

#[derive(Debug, Clone)]
pub enum RecordingEvent {
    Started,
    /// Carries the finished artifact's duration
    Stopped(Duration),
    /// The recorder fell behind the stream and lost this many chunks
    Dropped(u64),
    Error(String),
}

/// Containers this recorder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// 16-bit PCM WAV of the first audio track
    Wav,
    /// Every chunk of every track, length-prefixed with kind and timestamp
    ChunkStream,
}

impl ContainerFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match base.as_str() {
            "audio/wav" | "audio/wave" | "audio/x-wav" => Some(ContainerFormat::Wav),
            "application/x-interview-chunks" => Some(ContainerFormat::ChunkStream),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "audio/wav",
            ContainerFormat::ChunkStream => "application/x-interview-chunks",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "wav",
            ContainerFormat::ChunkStream => "ivrc",
        }
    }
}

/// Finalized output of one start/stop cycle.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub duration: Duration,
    pub chunk_count: usize,
    /// Chunks lost because the recorder fell behind the stream
    pub dropped_chunks: u64,
    /// `None` when stop was requested without a recording in progress
    pub started_at: Option<DateTime<Utc>>,
    pub spilled_to_disk: bool,
}

impl RecordingArtifact {
    pub fn never_started() -> Self {
        Self {
            file_name: String::new(),
            mime_type: String::new(),
            data: Bytes::new(),
            duration: Duration::ZERO,
            chunk_count: 0,
            dropped_chunks: 0,
            started_at: None,
            spilled_to_disk: false,
        }
    }

    pub fn was_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_count == 0
    }

    /// Write the artifact into `dir` under its file name.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        if !self.was_started() {
            return Err(Error::RecorderUnsupported(
                "nothing was recorded".to_string(),
            ));
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.data)?;
        Ok(path)
    }
}

/// `mm:ss` for the recording badge.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

struct ActiveRecording {
    format: ContainerFormat,
    audio: Option<(u32, u16)>,
    started_at: DateTime<Utc>,
    started: Instant,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<Collected>>,
}

struct Collected {
    buffer: ChunkBuffer,
    dropped: u64,
}

pub struct Recorder {
    config: RecordingConfig,
    active: Mutex<Option<ActiveRecording>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    pub fn new(config: RecordingConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            config,
            active: Mutex::new(None),
            event_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        if self.active.lock().is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Time since the current recording started, zero when idle.
    pub fn elapsed(&self) -> Duration {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.started.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn start(&self, stream: &LocalMediaStream) -> Result<()> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(Error::AlreadyRecording);
        }

        let format = ContainerFormat::from_mime(&self.config.mime_type)
            .ok_or_else(|| Error::RecorderUnsupported(self.config.mime_type.clone()))?;

        let (track_filter, audio) = match format {
            ContainerFormat::Wav => {
                let track = stream.track(TrackKind::Audio).ok_or_else(|| {
                    Error::RecorderUnsupported(format!("{} without an audio track", format.mime_type()))
                })?;
                match track.format() {
                    MediaFormat::Pcm16 { sample_rate, channels } => {
                        (Some(track.id().to_string()), Some((*sample_rate, *channels)))
                    }
                    other => {
                        return Err(Error::RecorderUnsupported(format!(
                            "{} from {}",
                            format.mime_type(),
                            other.mime_type()
                        )))
                    }
                }
            }
            ContainerFormat::ChunkStream => (None, None),
        };

        let rx = stream.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel();
        let buffer = ChunkBuffer::new(
            self.config.spill_threshold_bytes,
            self.config.spill_dir.clone(),
        );
        let task = tokio::spawn(collect_chunks(
            rx,
            stop_rx,
            track_filter,
            format,
            buffer,
            self.event_tx.clone(),
        ));

        *active = Some(ActiveRecording {
            format,
            audio,
            started_at: Utc::now(),
            started: Instant::now(),
            stop_tx,
            task,
        });
        drop(active);

        info!("recording started on stream {} as {}", stream.id(), format.mime_type());
        let _ = self.event_tx.send(RecordingEvent::Started);
        Ok(())
    }

    /// Finish the current recording. Idle recorders return
    /// [`RecordingArtifact::never_started`].
    pub async fn stop(&self) -> Result<RecordingArtifact> {
        let active = self.active.lock().take();
        let Some(active) = active else {
            return Ok(RecordingArtifact::never_started());
        };

        let duration = active.started.elapsed();
        let _ = active.stop_tx.send(());
        let Collected { buffer, dropped } = match active.task.await {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                return Err(e);
            }
            Err(e) => {
                let err = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                let _ = self.event_tx.send(RecordingEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let chunk_count = buffer.chunk_count();
        let spilled_to_disk = buffer.is_spilled();
        let payload = buffer.into_bytes()?;
        let data = match (active.format, active.audio) {
            (ContainerFormat::Wav, Some((sample_rate, channels))) => {
                encode_wav(&payload, sample_rate, channels)?
            }
            _ => Bytes::from(payload),
        };

        let artifact = RecordingArtifact {
            file_name: format!(
                "interview-{}.{}",
                active.started_at.timestamp_millis(),
                active.format.extension()
            ),
            mime_type: active.format.mime_type().to_string(),
            data,
            duration,
            chunk_count,
            dropped_chunks: dropped,
            started_at: Some(active.started_at),
            spilled_to_disk,
        };

        info!(
            "recording stopped after {} ({} chunks, {} dropped, {} bytes)",
            format_clock(duration),
            chunk_count,
            dropped,
            artifact.data.len()
        );
        let _ = self.event_tx.send(RecordingEvent::Stopped(duration));
        Ok(artifact)
    }
}

async fn collect_chunks(
    mut rx: broadcast::Receiver<MediaChunk>,
    mut stop_rx: oneshot::Receiver<()>,
    track_filter: Option<String>,
    format: ContainerFormat,
    mut buffer: ChunkBuffer,
    events: broadcast::Sender<RecordingEvent>,
) -> Result<Collected> {
    let mut dropped = 0u64;
    let mut lost = |n: u64| {
        warn!("recorder fell behind, {} chunks dropped", n);
        dropped += n;
        let _ = events.send(RecordingEvent::Dropped(n));
    };

    if format == ContainerFormat::ChunkStream {
        let mut header = Vec::with_capacity(5);
        header.extend_from_slice(CHUNK_STREAM_MAGIC);
        header.push(CHUNK_STREAM_VERSION);
        buffer.push(&header)?;
    }
    let header_chunks = buffer.chunk_count();

    let accepts = |chunk: &MediaChunk| match &track_filter {
        Some(id) => &chunk.track_id == id,
        None => true,
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            msg = rx.recv() => match msg {
                Ok(chunk) if accepts(&chunk) => append(&mut buffer, &chunk, format)?,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => lost(n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    // Whatever was captured before stop still belongs to this segment.
    loop {
        match rx.try_recv() {
            Ok(chunk) if accepts(&chunk) => append(&mut buffer, &chunk, format)?,
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(n)) => lost(n),
            Err(_) => break,
        }
    }

    if header_chunks > 0 && buffer.chunk_count() == header_chunks {
        // Header alone is not content.
        return Ok(Collected {
            buffer: ChunkBuffer::new(usize::MAX, None),
            dropped,
        });
    }
    Ok(Collected { buffer, dropped })
}

fn append(buffer: &mut ChunkBuffer, chunk: &MediaChunk, format: ContainerFormat) -> Result<()> {
    match format {
        ContainerFormat::Wav => buffer.push(&chunk.data),
        ContainerFormat::ChunkStream => {
            let mut frame = BytesMut::with_capacity(13 + chunk.data.len());
            frame.put_u8(match chunk.kind {
                TrackKind::Audio => 0,
                TrackKind::Video => 1,
            });
            frame.put_i64_le(chunk.captured_at.timestamp_millis());
            frame.put_u32_le(chunk.data.len() as u32);
            frame.extend_from_slice(&chunk.data);
            buffer.push(&frame)
        }
    }
}

fn encode_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Bytes> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::stream::MediaTrack;

    fn pcm_stream() -> LocalMediaStream {
        LocalMediaStream::new(
            "rec",
            vec![MediaTrack::new(
                "rec-audio",
                TrackKind::Audio,
                MediaFormat::Pcm16 { sample_rate: 8_000, channels: 1 },
            )],
        )
    }

    fn config(mime: &str, threshold: usize) -> RecordingConfig {
        RecordingConfig {
            mime_type: mime.to_string(),
            spill_threshold_bytes: threshold,
            spill_dir: None,
        }
    }

    #[test]
    fn mime_parsing() {
        assert_eq!(ContainerFormat::from_mime("audio/wav"), Some(ContainerFormat::Wav));
        assert_eq!(ContainerFormat::from_mime("AUDIO/X-WAV"), Some(ContainerFormat::Wav));
        assert_eq!(ContainerFormat::from_mime("video/webm;codecs=vp9"), None);
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(Duration::from_secs(0)), "00:00");
        assert_eq!(format_clock(Duration::from_secs(75)), "01:15");
        assert_eq!(format_clock(Duration::from_secs(3_600)), "60:00");
    }

    #[tokio::test]
    async fn webm_is_unsupported() {
        let recorder = Recorder::new(config("video/webm;codecs=vp9", 1024));
        let err = recorder.start(&pcm_stream()).unwrap_err();
        assert!(matches!(err, Error::RecorderUnsupported(_)));
        assert_eq!(recorder.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn wav_needs_an_audio_track() {
        let stream = LocalMediaStream::new(
            "v",
            vec![MediaTrack::new("v1", TrackKind::Video, MediaFormat::Vp8)],
        );
        let recorder = Recorder::new(config("audio/wav", 1024));
        assert!(matches!(recorder.start(&stream), Err(Error::RecorderUnsupported(_))));
    }

    #[tokio::test]
    async fn wav_artifact_contains_pushed_samples() {
        let stream = pcm_stream();
        let sink = stream.sink("rec-audio").unwrap();
        let recorder = Recorder::new(config("audio/wav", 16));
        recorder.start(&stream).unwrap();

        for _ in 0..4 {
            let mut buf = BytesMut::new();
            for i in 0..8i16 {
                buf.put_i16_le(i * 100);
            }
            sink.push(buf.freeze());
        }

        let artifact = recorder.stop().await.unwrap();
        assert!(artifact.was_started());
        assert_eq!(artifact.chunk_count, 4);
        assert!(artifact.spilled_to_disk);
        assert_eq!(artifact.mime_type, "audio/wav");
        assert!(artifact.file_name.ends_with(".wav"));

        let reader = hound::WavReader::new(Cursor::new(artifact.data.to_vec())).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 32);
        assert_eq!(samples[3], 300);
    }

    #[tokio::test]
    async fn chunk_stream_frames_every_track() {
        let stream = LocalMediaStream::new(
            "mixed",
            vec![
                MediaTrack::new("a", TrackKind::Audio, MediaFormat::Pcmu),
                MediaTrack::new("v", TrackKind::Video, MediaFormat::Vp8),
            ],
        );
        let recorder = Recorder::new(config("application/x-interview-chunks", 1 << 20));
        recorder.start(&stream).unwrap();
        stream.sink("a").unwrap().push(Bytes::from_static(&[1, 2, 3]));
        stream.sink("v").unwrap().push(Bytes::from_static(&[9]));

        let artifact = recorder.stop().await.unwrap();
        assert_eq!(&artifact.data[..4], CHUNK_STREAM_MAGIC);
        // header + two frames
        assert_eq!(artifact.chunk_count, 3);
        assert_eq!(artifact.data.len(), 5 + (13 + 3) + (13 + 1));
    }

    #[tokio::test]
    async fn falling_behind_is_counted_and_reported() {
        let stream = pcm_stream();
        let sink = stream.sink("rec-audio").unwrap();
        let recorder = Recorder::new(config("audio/wav", 1 << 20));
        let mut events = recorder.subscribe();
        recorder.start(&stream).unwrap();

        // The collector cannot run until we yield, so the feed overflows.
        for _ in 0..300 {
            sink.push(Bytes::from_static(&[0, 0]));
        }
        let artifact = recorder.stop().await.unwrap();

        assert_eq!(artifact.dropped_chunks, 44);
        assert_eq!(artifact.chunk_count, 256);
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Started)));
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Dropped(44))));
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Stopped(_))));
    }

    #[tokio::test]
    async fn stop_when_idle_is_not_an_error() {
        let recorder = Recorder::new(RecordingConfig::default());
        let artifact = recorder.stop().await.unwrap();
        assert!(!artifact.was_started());
        assert!(artifact.is_empty());
        assert_eq!(artifact.duration, Duration::ZERO);
    }
}
