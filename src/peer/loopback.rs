//! In-process broker. Every session registered with the same
//! `LoopbackBroker` can dial every other one; media is shared by mirroring the
//! caller's and callee's local streams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::broker::{
    BrokerEvent, CallControl, CallEvent, MediaCall, Registration, SignalingBroker,
    SignalingChannel, SignalingIdentity,
};
use crate::error::{Error, Result};
use crate::media::{LocalMediaStream, RemoteStream};

#[derive(Default)]
struct Hub {
    endpoints: HashMap<SignalingIdentity, mpsc::UnboundedSender<BrokerEvent>>,
    calls: Vec<Weak<LoopbackCall>>,
    dials: Vec<(SignalingIdentity, SignalingIdentity)>,
    registrations: usize,
    offline: bool,
}

#[derive(Clone, Default)]
pub struct LoopbackBroker {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every registration fails.
    pub fn set_offline(&self, offline: bool) {
        self.hub.lock().offline = offline;
    }

    pub fn registrations(&self) -> usize {
        self.hub.lock().registrations
    }

    pub fn is_registered(&self, identity: &SignalingIdentity) -> bool {
        self.hub.lock().endpoints.contains_key(identity)
    }

    /// Identities currently registered.
    pub fn online(&self) -> usize {
        self.hub.lock().endpoints.len()
    }

    /// Identities dialed by `from`, in dial order.
    pub fn dials_from(&self, from: &SignalingIdentity) -> Vec<SignalingIdentity> {
        self.hub
            .lock()
            .dials
            .iter()
            .filter(|(caller, _)| caller == from)
            .map(|(_, callee)| callee.clone())
            .collect()
    }

    /// Drop an endpoint as if the broker lost it.
    pub fn disconnect(&self, identity: &SignalingIdentity) {
        let endpoint = self.hub.lock().endpoints.remove(identity);
        if let Some(endpoint) = endpoint {
            let _ = endpoint.send(BrokerEvent::Disconnected);
        }
    }
}

#[async_trait]
impl SignalingBroker for LoopbackBroker {
    async fn register(&self) -> Result<Registration> {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = {
            let mut hub = self.hub.lock();
            if hub.offline {
                return Err(Error::Signaling("broker unreachable".to_string()));
            }
            let identity = loop {
                let candidate = SignalingIdentity::new(format!("peer-{}", rand::random::<u32>()));
                if !hub.endpoints.contains_key(&candidate) {
                    break candidate;
                }
            };
            hub.endpoints.insert(identity.clone(), tx);
            hub.registrations += 1;
            identity
        };
        info!("loopback broker registered {}", identity);

        Ok(Registration {
            identity: identity.clone(),
            channel: Arc::new(LoopbackChannel {
                identity,
                hub: Arc::clone(&self.hub),
            }),
            events: rx,
        })
    }
}

struct LoopbackChannel {
    identity: SignalingIdentity,
    hub: Arc<Mutex<Hub>>,
}

#[async_trait]
impl SignalingChannel for LoopbackChannel {
    fn identity(&self) -> &SignalingIdentity {
        &self.identity
    }

    async fn dial(&self, remote: &SignalingIdentity, local: &LocalMediaStream) -> Result<MediaCall> {
        if remote == &self.identity {
            return Err(Error::Signaling("cannot dial own identity".to_string()));
        }

        let mut hub = self.hub.lock();
        let endpoint = hub
            .endpoints
            .get(remote)
            .cloned()
            .ok_or_else(|| Error::Signaling(format!("peer {} unavailable", remote)))?;

        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, callee_rx) = mpsc::unbounded_channel();
        let call = Arc::new(LoopbackCall {
            caller: self.identity.clone(),
            callee: remote.clone(),
            caller_tx,
            callee_tx,
            caller_stream: local.clone(),
            answered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let incoming = MediaCall {
            peer: self.identity.clone(),
            control: Arc::new(CallSide {
                call: Arc::clone(&call),
                callee: true,
            }),
            events: callee_rx,
        };
        endpoint
            .send(BrokerEvent::Incoming(incoming))
            .map_err(|_| Error::Signaling(format!("peer {} unavailable", remote)))?;

        hub.calls.retain(|c| c.strong_count() > 0);
        hub.calls.push(Arc::downgrade(&call));
        hub.dials.push((self.identity.clone(), remote.clone()));
        debug!("{} dialed {}", self.identity, remote);

        Ok(MediaCall {
            peer: remote.clone(),
            control: Arc::new(CallSide { call, callee: false }),
            events: caller_rx,
        })
    }

    async fn destroy(&self) {
        let calls: Vec<Arc<LoopbackCall>> = {
            let mut hub = self.hub.lock();
            hub.endpoints.remove(&self.identity);
            let mut involved = Vec::new();
            hub.calls.retain(|weak| match weak.upgrade() {
                Some(call) if call.involves(&self.identity) => {
                    involved.push(call);
                    false
                }
                Some(_) => true,
                None => false,
            });
            involved
        };
        for call in calls {
            call.close();
        }
        info!("loopback broker released {}", self.identity);
    }
}

struct LoopbackCall {
    caller: SignalingIdentity,
    callee: SignalingIdentity,
    caller_tx: mpsc::UnboundedSender<CallEvent>,
    callee_tx: mpsc::UnboundedSender<CallEvent>,
    caller_stream: LocalMediaStream,
    answered: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackCall {
    fn involves(&self, identity: &SignalingIdentity) -> bool {
        &self.caller == identity || &self.callee == identity
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.caller_tx.send(CallEvent::Closed);
        let _ = self.callee_tx.send(CallEvent::Closed);
        debug!("loopback call {} -> {} closed", self.caller, self.callee);
    }
}

struct CallSide {
    call: Arc<LoopbackCall>,
    callee: bool,
}

#[async_trait]
impl CallControl for CallSide {
    async fn answer(&self, local: &LocalMediaStream) -> Result<()> {
        if !self.callee {
            return Err(Error::Signaling("outbound calls cannot be answered".to_string()));
        }
        if self.call.closed.load(Ordering::SeqCst) {
            return Err(Error::Signaling("call already closed".to_string()));
        }
        if self.call.answered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self
            .call
            .callee_tx
            .send(CallEvent::Stream(RemoteStream::mirror(&self.call.caller_stream)));
        let _ = self
            .call
            .caller_tx
            .send(CallEvent::Stream(RemoteStream::mirror(local)));
        Ok(())
    }

    async fn close(&self) {
        self.call.close();
    }
}
