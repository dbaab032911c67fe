use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::peer::SignalingIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub identity: Option<SignalingIdentity>,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            identity: None,
            last_error: None,
        }
    }
}

/// Signaling connection status, observable by the UI.
#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            status: Arc::new(status),
        }
    }

    pub fn connecting(&self) {
        self.status.send_modify(|status| {
            status.state = ConnectionState::Connecting;
            status.last_error = None;
        });
    }

    pub fn connected(&self, identity: SignalingIdentity) {
        self.status.send_modify(|status| {
            status.state = ConnectionState::Connected;
            status.identity = Some(identity);
        });
    }

    pub fn disconnected(&self) {
        self.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.identity = None;
        });
    }

    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.identity = None;
            status.last_error = Some(error);
        });
    }

    /// Note a failure that did not drop the connection.
    pub fn record_error(&self, error: String) {
        self.status.send_modify(|status| status.last_error = Some(error));
    }

    pub fn current(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_observable() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.connecting();
        assert_eq!(rx.borrow_and_update().state, ConnectionState::Connecting);

        monitor.connected(SignalingIdentity::from("peer-1"));
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.identity, Some(SignalingIdentity::from("peer-1")));

        monitor.record_error("relay rejected a message".to_string());
        assert_eq!(monitor.current().state, ConnectionState::Connected);

        monitor.set_error("relay gone".to_string());
        let status = monitor.current();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.identity, None);
        assert_eq!(status.last_error.as_deref(), Some("relay gone"));
    }
}
