//! Peer-to-peer interview rooms: local capture and recording, presence
//! bookkeeping, and calls between the participants of a session.

pub mod audio;
pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod peer;
pub mod presence;
pub mod room;
pub mod rtc;
pub mod session;
pub mod signaling;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{InterviewSession, SessionBackends, SessionContext, SessionPhase, SessionSnapshot};
