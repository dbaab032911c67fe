//! Session configuration.
//!
//! Everything has a default, so an empty TOML file (or no file at all) yields a
//! working loopback setup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::error::{Error, Result};
use crate::media::MediaConstraints;

fn default_signaling_url() -> String {
    "ws://127.0.0.1:8080".to_string()
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:global.stun.twilio.com:3478"),
    ]
}

/// Top-level configuration for one interview client.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Network traversal helpers handed to every peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,

    #[serde(default)]
    pub media: MediaConstraints,

    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            ice_servers: default_ice_servers(),
            media: MediaConstraints::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.signaling_url.is_empty() {
            return Err(Error::Config("signaling_url must not be empty".to_string()));
        }
        if self.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err(Error::Config("ice server entry without urls".to_string()));
        }
        if self.recording.spill_threshold_bytes == 0 {
            return Err(Error::Config(
                "recording.spill_threshold_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().map(IceServer::to_rtc).collect()
    }
}

/// STUN/TURN endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: String::new(),
            credential: String::new(),
        }
    }

    fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone(),
            credential: self.credential.clone(),
            ..Default::default()
        }
    }
}

fn default_mime_type() -> String {
    "audio/wav".to_string()
}

fn default_spill_threshold() -> usize {
    64 * 1024 * 1024
}

/// Recorder settings (maps to the [recording] section)
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Container requested from the recorder
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Buffered bytes kept in memory before spilling to a temp file
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold_bytes: usize,
    /// Directory for spill files (system temp dir when unset)
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            mime_type: default_mime_type(),
            spill_threshold_bytes: default_spill_threshold(),
            spill_dir: None,
        }
    }
}
