use async_trait::async_trait;
use serde::Deserialize;

use super::stream::LocalMediaStream;
use crate::error::Result;

/// Camera request.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VideoConstraints {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_frame_rate() -> u32 {
    30
}

fn enabled() -> bool {
    true
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
        }
    }
}

/// Microphone request. All processing is on unless switched off.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AudioConstraints {
    #[serde(default = "enabled")]
    pub echo_cancellation: bool,
    #[serde(default = "enabled")]
    pub noise_suppression: bool,
    #[serde(default = "enabled")]
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// What to ask the devices for. `None` means "don't capture this kind".
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaConstraints {
    #[serde(default = "default_video")]
    pub video: Option<VideoConstraints>,
    #[serde(default = "default_audio")]
    pub audio: Option<AudioConstraints>,
}

fn default_video() -> Option<VideoConstraints> {
    Some(VideoConstraints::default())
}

fn default_audio() -> Option<AudioConstraints> {
    Some(AudioConstraints::default())
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: default_video(),
            audio: default_audio(),
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            video: None,
            audio: default_audio(),
        }
    }
}

/// Access to capture hardware.
///
/// Implementations return `Error::DeviceUnavailable` when the hardware is
/// missing or permission is denied.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalMediaStream>;
}
