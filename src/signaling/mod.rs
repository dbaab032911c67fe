//! JSON-over-WebSocket signaling between interview clients and the relay.

pub mod client;
pub mod relay;

use serde::{Deserialize, Serialize};

use crate::peer::SignalingIdentity;

pub use client::SignalingClient;
pub use relay::RelayServer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum SignalingMessage {
    /// Sent by the relay right after the socket opens
    Registered {
        peer_id: SignalingIdentity,
    },
    Offer {
        call_id: String,
        from_peer: SignalingIdentity,
        to_peer: SignalingIdentity,
        sdp: String,
    },
    Answer {
        call_id: String,
        from_peer: SignalingIdentity,
        to_peer: SignalingIdentity,
        sdp: String,
    },
    IceCandidate {
        call_id: String,
        from_peer: SignalingIdentity,
        to_peer: SignalingIdentity,
        candidate: String,
    },
    Hangup {
        call_id: String,
        from_peer: SignalingIdentity,
        to_peer: SignalingIdentity,
    },
    PeerUnavailable {
        call_id: String,
        peer_id: SignalingIdentity,
    },
    Error {
        message: String,
    },
}

impl SignalingMessage {
    /// Who a peer-to-peer message is addressed to.
    pub fn target(&self) -> Option<&SignalingIdentity> {
        match self {
            SignalingMessage::Offer { to_peer, .. }
            | SignalingMessage::Answer { to_peer, .. }
            | SignalingMessage::IceCandidate { to_peer, .. }
            | SignalingMessage::Hangup { to_peer, .. } => Some(to_peer),
            _ => None,
        }
    }

    pub fn sender(&self) -> Option<&SignalingIdentity> {
        match self {
            SignalingMessage::Offer { from_peer, .. }
            | SignalingMessage::Answer { from_peer, .. }
            | SignalingMessage::IceCandidate { from_peer, .. }
            | SignalingMessage::Hangup { from_peer, .. } => Some(from_peer),
            _ => None,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::Offer { call_id, .. }
            | SignalingMessage::Answer { call_id, .. }
            | SignalingMessage::IceCandidate { call_id, .. }
            | SignalingMessage::Hangup { call_id, .. }
            | SignalingMessage::PeerUnavailable { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Stamp the sender. The relay does this so clients cannot spoof it.
    pub fn set_sender(&mut self, identity: &SignalingIdentity) {
        match self {
            SignalingMessage::Offer { from_peer, .. }
            | SignalingMessage::Answer { from_peer, .. }
            | SignalingMessage::IceCandidate { from_peer, .. }
            | SignalingMessage::Hangup { from_peer, .. } => *from_peer = identity.clone(),
            _ => {}
        }
    }
}
