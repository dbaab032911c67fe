use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AcquiringMedia,
    JoiningPresence,
    OpeningSignaling,
    ConnectingPeers,
    Active,
    Ending,
    Ended,
}

impl SessionPhase {
    /// Ending or ended: no join step may move the session out of here.
    pub fn is_closing(self) -> bool {
        matches!(self, SessionPhase::Ending | SessionPhase::Ended)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::AcquiringMedia => "acquiring_media",
            SessionPhase::JoiningPresence => "joining_presence",
            SessionPhase::OpeningSignaling => "opening_signaling",
            SessionPhase::ConnectingPeers => "connecting_peers",
            SessionPhase::Active => "active",
            SessionPhase::Ending => "ending",
            SessionPhase::Ended => "ended",
        };
        f.write_str(name)
    }
}
