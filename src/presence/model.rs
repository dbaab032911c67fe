use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::peer::SignalingIdentity;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(SessionId);
string_id!(AccountId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Candidate,
    Recruiter,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Candidate => write!(f, "candidate"),
            ParticipantRole::Recruiter => write!(f, "recruiter"),
        }
    }
}

/// One join of an account into a session. A row with `left_at == None` is
/// active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub session_id: SessionId,
    pub account_id: AccountId,
    pub role: ParticipantRole,
    pub display_name: String,
    pub signaling_id: Option<SignalingIdentity>,
    pub connected: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn joining(
        session_id: SessionId,
        account_id: AccountId,
        role: ParticipantRole,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            account_id,
            role,
            display_name: display_name.into(),
            signaling_id: None,
            connected: false,
            joined_at: Utc::now(),
            left_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Something about the roster changed. Carries no row data; re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantChange {
    pub kind: ChangeKind,
    pub session_id: SessionId,
    pub account_id: AccountId,
}
