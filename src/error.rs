use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("recorder does not support {0}")]
    RecorderUnsupported(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("participant already active in session {0}")]
    PresenceConflict(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("session ended before join completed")]
    SessionEnded,

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),
}

impl Error {
    /// Short message suitable for showing to the person in the room.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::InvalidSession(_) => "this interview link is not valid",
            Error::DeviceUnavailable(_) => "camera unavailable",
            Error::RecorderUnsupported(_) => "recording is not supported on this device",
            Error::AlreadyRecording => "recording already in progress",
            Error::Signaling(_) | Error::WebRTC(_) | Error::Ws(_) => "connection failed",
            Error::SessionEnded => "you left the session",
            Error::PresenceConflict(_)
            | Error::Store(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_) => "something went wrong, please try again",
        }
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => Error::Io(e),
            other => Error::RecorderUnsupported(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
