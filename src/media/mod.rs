//! Local media: capture devices, streams, and recording.

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod devices;
pub mod recorder;
pub mod stream;
pub mod synthetic;

pub use capture::MediaCapture;
pub use devices::{AudioConstraints, MediaConstraints, MediaDevices, VideoConstraints};
pub use recorder::{
    format_clock, ContainerFormat, Recorder, RecordingArtifact, RecordingEvent, RecordingState,
};
pub use stream::{
    LocalMediaStream, MediaChunk, MediaFormat, MediaTrack, RemoteStream, TrackKind, TrackSink,
};
pub use synthetic::SyntheticDevices;
