//! Signaling relay: hands out identities and forwards peer-to-peer messages.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::SignalingMessage;
use crate::error::Result;
use crate::peer::SignalingIdentity;

type Peers = Arc<Mutex<HashMap<SignalingIdentity, mpsc::UnboundedSender<SignalingMessage>>>>;

pub struct RelayServer {
    listener: TcpListener,
    peers: Peers,
}

impl RelayServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            peers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!("signaling relay listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let peers = Arc::clone(&self.peers);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peers).await {
                    warn!("connection from {} ended with error: {}", addr, e);
                }
            });
        }
    }
}

fn register(peers: &Peers, tx: mpsc::UnboundedSender<SignalingMessage>) -> SignalingIdentity {
    let mut peers = peers.lock();
    let identity = loop {
        let candidate = SignalingIdentity::new(format!("peer-{}", rand::random::<u32>()));
        if !peers.contains_key(&candidate) {
            break candidate;
        }
    };
    peers.insert(identity.clone(), tx);
    identity
}

/// Forward `msg` from `from`. Anything that cannot be delivered is answered
/// on the sender's own queue.
fn route(peers: &Peers, from: &SignalingIdentity, mut msg: SignalingMessage) {
    let peers = peers.lock();
    let Some(reply) = peers.get(from) else {
        return;
    };

    let Some(target) = msg.target().cloned() else {
        let _ = reply.send(SignalingMessage::Error {
            message: "message has no target peer".to_string(),
        });
        return;
    };

    msg.set_sender(from);
    match peers.get(&target) {
        Some(dest) if dest.send(msg.clone()).is_ok() => {
            debug!("relayed {:?} {} -> {}", msg.call_id(), from, target);
        }
        _ => {
            // A hangup for a peer that is already gone needs no answer
            if matches!(msg, SignalingMessage::Hangup { .. }) {
                return;
            }
            let _ = reply.send(SignalingMessage::PeerUnavailable {
                call_id: msg.call_id().unwrap_or_default().to_string(),
                peer_id: target,
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, peers: Peers) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sender, mut receiver) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();

    let identity = register(&peers, tx.clone());
    info!("registered {}", identity);
    let _ = tx.send(SignalingMessage::Registered {
        peer_id: identity.clone(),
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to encode {:?}: {}", msg, e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let receive_peers = Arc::clone(&peers);
    let from = identity.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<SignalingMessage>(&text) {
                Ok(signal) => route(&receive_peers, &from, signal),
                Err(e) => {
                    warn!("bad message from {}: {}", from, e);
                    if let Some(reply) = receive_peers.lock().get(&from) {
                        let _ = reply.send(SignalingMessage::Error {
                            message: format!("invalid message: {}", e),
                        });
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut receive_task) => send_task.abort(),
        _ = (&mut send_task) => receive_task.abort(),
    };

    peers.lock().remove(&identity);
    info!("released {}", identity);
    Ok(())
}
