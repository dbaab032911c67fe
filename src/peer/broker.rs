//! Contract between the peer manager and a signaling/relay broker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::{LocalMediaStream, RemoteStream};

/// Address a participant registers with the broker so others can dial it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalingIdentity(String);

impl SignalingIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SignalingIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug)]
pub enum CallEvent {
    /// The far end's media is flowing
    Stream(RemoteStream),
    Closed,
}

#[async_trait]
pub trait CallControl: Send + Sync {
    /// Accept an inbound call, sending `local` back.
    async fn answer(&self, local: &LocalMediaStream) -> Result<()>;
    /// Hang up. Safe to call more than once.
    async fn close(&self);
}

/// One media call, inbound or outbound.
pub struct MediaCall {
    pub peer: SignalingIdentity,
    pub control: Arc<dyn CallControl>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
}

impl fmt::Debug for MediaCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCall").field("peer", &self.peer).finish()
    }
}

#[derive(Debug)]
pub enum BrokerEvent {
    Incoming(MediaCall),
    Error(String),
    Disconnected,
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    fn identity(&self) -> &SignalingIdentity;

    async fn dial(&self, remote: &SignalingIdentity, local: &LocalMediaStream) -> Result<MediaCall>;

    /// Release the identity and every call placed through it.
    async fn destroy(&self);
}

pub struct Registration {
    pub identity: SignalingIdentity,
    pub channel: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<BrokerEvent>,
}

#[async_trait]
pub trait SignalingBroker: Send + Sync {
    async fn register(&self) -> Result<Registration>;
}
