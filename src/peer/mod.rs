//! Signaling identity and peer calls.

pub mod broker;
pub mod loopback;
pub mod manager;

pub use broker::{
    BrokerEvent, CallControl, CallEvent, MediaCall, Registration, SignalingBroker,
    SignalingChannel, SignalingIdentity,
};
pub use loopback::LoopbackBroker;
pub use manager::{PeerEvent, PeerManager, PeerStream, PeerStreams};
