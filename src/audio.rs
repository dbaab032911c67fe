//! Microphone capture through `cpal`.
//!
//! `cpal::Stream` is not `Send`, so each capture runs on its own thread that
//! owns the stream until the track's stop hook fires.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::mpsc as std_mpsc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::media::{
    LocalMediaStream, MediaConstraints, MediaDevices, MediaFormat, MediaTrack, TrackKind,
    TrackSink,
};

/// Default system microphone. Has no camera: video requests degrade to an
/// audio-only stream.
#[derive(Debug, Default, Clone)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for CpalDevices {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalMediaStream> {
        if constraints.audio.is_none() {
            return Err(Error::DeviceUnavailable(
                "no camera backend available for a video-only request".to_string(),
            ));
        }
        if constraints.video.is_some() {
            warn!("no camera backend, continuing audio-only");
        }

        // Format lookup only; the capture thread opens its own handle.
        let format = {
            let host = cpal::default_host();
            let input_device = host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;
            let config = input_device
                .default_input_config()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
            info!("input config: {:?}", config);
            MediaFormat::Pcm16 {
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
            }
        };
        let stream_id = format!("mic-{}", rand::random::<u32>());
        let track_id = format!("{stream_id}-audio");

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let track = MediaTrack::new(track_id.clone(), TrackKind::Audio, format)
            .with_stop_hook(move || {
                let _ = stop_tx.send(());
            });
        let stream = LocalMediaStream::new(stream_id, vec![track]);
        let sink = stream
            .sink(&track_id)
            .ok_or_else(|| Error::DeviceUnavailable("capture track missing".to_string()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(sink, ready_tx, stop_rx))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                stream.stop_all();
                Err(e)
            }
            Err(_) => {
                stream.stop_all();
                Err(Error::DeviceUnavailable("capture thread exited".to_string()))
            }
        }
    }
}

fn capture_thread(
    sink: TrackSink,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let input_stream = match start_capture(sink) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    // Either an explicit stop or every sender gone ends the capture.
    let _ = stop_rx.recv();
    drop(input_stream);
    info!("microphone released");
}

fn start_capture(sink: TrackSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;
    let config = input_device
        .default_input_config()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    let input_stream = match config.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&input_device, &config.into(), sink)?,
        SampleFormat::I16 => build_input_stream::<i16>(&input_device, &config.into(), sink)?,
        SampleFormat::U16 => build_input_stream::<u16>(&input_device, &config.into(), sink)?,
        sample_format => {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported sample format: {:?}",
                sample_format
            )))
        }
    };

    input_stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    Ok(input_stream)
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: TrackSink,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let err_fn = |err| error!("an error occurred on the input audio stream: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut buf = BytesMut::with_capacity(data.len() * 2);
                for sample in data {
                    buf.put_i16_le(sample.to_sample::<i16>());
                }
                sink.push(buf.freeze());
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}
