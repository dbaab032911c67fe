//! Peer connection manager: owns the signaling registration, places and
//! auto-answers calls, and keeps the identity → remote stream map.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broker::{
    BrokerEvent, CallControl, CallEvent, MediaCall, SignalingBroker, SignalingChannel,
    SignalingIdentity,
};
use crate::connection::{ConnectionMonitor, ConnectionStatus};
use crate::error::{Error, Result};
use crate::media::{LocalMediaStream, RemoteStream};

/// A remote participant's media as seen by the rendering layer.
#[derive(Debug, Clone)]
pub struct PeerStream {
    pub identity: SignalingIdentity,
    pub call_id: u64,
    pub stream: RemoteStream,
}

pub type PeerStreams = HashMap<SignalingIdentity, PeerStream>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(SignalingIdentity),
    Disconnected(SignalingIdentity),
}

struct ActiveCall {
    id: u64,
    initiator: SignalingIdentity,
    control: Arc<dyn CallControl>,
}

enum Placement {
    Placed(Option<ActiveCall>),
    Rejected,
}

struct Shared {
    monitor: ConnectionMonitor,
    calls: Mutex<HashMap<SignalingIdentity, ActiveCall>>,
    streams: watch::Sender<PeerStreams>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    next_call: AtomicU64,
    local: RwLock<Option<LocalMediaStream>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(tokio::spawn(task));
    }

    /// Register a call for its peer. When another call for the same peer is
    /// already live, a call from the same initiator replaces it; calls from
    /// opposite ends keep the one whose initiator sorts lowest, which both
    /// ends agree on.
    async fn track_call(self: &Arc<Self>, call: MediaCall, initiator: SignalingIdentity) {
        let MediaCall { peer, control, events } = call;
        let id = self.next_call.fetch_add(1, Ordering::SeqCst);

        let placement = {
            let mut calls = self.calls.lock();
            let loses = calls
                .get(&peer)
                .map_or(false, |existing| existing.initiator < initiator);
            if loses {
                Placement::Rejected
            } else {
                Placement::Placed(calls.insert(
                    peer.clone(),
                    ActiveCall {
                        id,
                        initiator,
                        control: Arc::clone(&control),
                    },
                ))
            }
        };

        match placement {
            Placement::Rejected => {
                debug!("simultaneous calls with {}, keeping the earlier initiator's", peer);
                control.close().await;
                return;
            }
            Placement::Placed(Some(previous)) => {
                debug!("call {} replaces call {} with {}", id, previous.id, peer);
                self.drop_stream(&peer, previous.id);
                previous.control.close().await;
            }
            Placement::Placed(None) => {}
        }

        let shared = Arc::clone(self);
        self.spawn(async move { shared.run_call(peer, id, events).await });
    }

    async fn run_call(
        self: Arc<Self>,
        peer: SignalingIdentity,
        id: u64,
        mut events: mpsc::UnboundedReceiver<CallEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                CallEvent::Stream(stream) => {
                    if !self.is_current(&peer, id) {
                        continue;
                    }
                    info!("remote stream from {}", peer);
                    self.streams.send_modify(|streams| {
                        streams.insert(
                            peer.clone(),
                            PeerStream {
                                identity: peer.clone(),
                                call_id: id,
                                stream,
                            },
                        );
                    });
                    let _ = self.events_tx.send(PeerEvent::Connected(peer.clone()));
                }
                CallEvent::Closed => break,
            }
        }

        {
            let mut calls = self.calls.lock();
            if calls.get(&peer).map(|c| c.id) == Some(id) {
                calls.remove(&peer);
            }
        }
        if self.drop_stream(&peer, id) {
            info!("call with {} closed", peer);
        }
    }

    fn is_current(&self, peer: &SignalingIdentity, id: u64) -> bool {
        self.calls.lock().get(peer).map(|c| c.id) == Some(id)
    }

    /// Remove `peer`'s stream if it came from call `id`, in one update.
    fn drop_stream(&self, peer: &SignalingIdentity, id: u64) -> bool {
        let removed = self.streams.send_if_modified(|streams| {
            if streams.get(peer).map(|s| s.call_id) == Some(id) {
                streams.remove(peer);
                true
            } else {
                false
            }
        });
        if removed {
            let _ = self.events_tx.send(PeerEvent::Disconnected(peer.clone()));
        }
        removed
    }

    async fn accept(self: &Arc<Self>, call: MediaCall) {
        let local = self.local.read().clone();
        let Some(local) = local else {
            warn!("inbound call from {} before local media, closing", call.peer);
            call.control.close().await;
            return;
        };
        info!("answering call from {}", call.peer);
        if let Err(e) = call.control.answer(&local).await {
            warn!("failed to answer {}: {}", call.peer, e);
            call.control.close().await;
            return;
        }
        let initiator = call.peer.clone();
        self.track_call(call, initiator).await;
    }

    async fn run_broker(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<BrokerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BrokerEvent::Incoming(call) => self.accept(call).await,
                BrokerEvent::Error(message) => {
                    warn!("signaling error: {}", message);
                    self.monitor.record_error(message);
                }
                BrokerEvent::Disconnected => {
                    warn!("signaling connection lost");
                    self.monitor.set_error("signaling connection lost".to_string());
                    break;
                }
            }
        }
    }
}

pub struct PeerManager {
    broker: Arc<dyn SignalingBroker>,
    shared: Arc<Shared>,
    channel: tokio::sync::Mutex<Option<Arc<dyn SignalingChannel>>>,
    /// Bumped by `close`; a registration that finishes under an older value
    /// is thrown away.
    generation: AtomicU64,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl PeerManager {
    pub fn new(broker: Arc<dyn SignalingBroker>) -> Self {
        let (streams, _) = watch::channel(PeerStreams::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            shared: Arc::new(Shared {
                monitor: ConnectionMonitor::new(),
                calls: Mutex::new(HashMap::new()),
                streams,
                events_tx,
                next_call: AtomicU64::new(1),
                local: RwLock::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
            channel: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Register with the broker. `local` is what inbound calls are answered
    /// with. A `close` that lands while registration is pending wins: the
    /// late registration is destroyed and this returns `SessionEnded`.
    pub async fn open(&self, local: LocalMediaStream) -> Result<SignalingIdentity> {
        let generation = self.generation.load(Ordering::SeqCst);
        if let Some(existing) = self.channel.lock().await.as_ref() {
            return Ok(existing.identity().clone());
        }

        self.shared.monitor.connecting();
        let registration = match self.broker.register().await {
            Ok(registration) => registration,
            Err(e) => {
                let message = e.to_string();
                self.shared.monitor.set_error(message.clone());
                return Err(match e {
                    Error::Signaling(_) => e,
                    _ => Error::Signaling(message),
                });
            }
        };

        let mut channel = self.channel.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            drop(channel);
            info!("closed while registering, releasing {}", registration.identity);
            registration.channel.destroy().await;
            return Err(Error::SessionEnded);
        }
        if let Some(existing) = channel.as_ref() {
            let identity = existing.identity().clone();
            drop(channel);
            registration.channel.destroy().await;
            return Ok(identity);
        }

        *self.shared.local.write() = Some(local);
        let identity = registration.identity.clone();
        *channel = Some(registration.channel);
        self.shared.monitor.connected(identity.clone());

        let shared = Arc::clone(&self.shared);
        self.shared.spawn(shared.run_broker(registration.events));

        info!("signaling identity {}", identity);
        Ok(identity)
    }

    pub async fn call(&self, remote: &SignalingIdentity, local: &LocalMediaStream) -> Result<()> {
        let channel = self
            .channel
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Signaling("signaling is not open".to_string()))?;
        info!("calling {}", remote);
        let call = channel.dial(remote, local).await?;
        self.shared
            .track_call(call, channel.identity().clone())
            .await;
        Ok(())
    }

    /// Close every call and release the signaling identity. Safe to call
    /// repeatedly, including before `open`.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let channel = self.channel.lock().await.take();

        let calls: Vec<ActiveCall> = self.shared.calls.lock().drain().map(|(_, c)| c).collect();
        for call in &calls {
            call.control.close().await;
        }

        let mut dropped = Vec::new();
        self.shared.streams.send_if_modified(|streams| {
            dropped.extend(streams.drain().map(|(identity, _)| identity));
            !dropped.is_empty()
        });
        for identity in dropped {
            let _ = self.shared.events_tx.send(PeerEvent::Disconnected(identity));
        }

        if let Some(channel) = channel {
            channel.destroy().await;
            info!("signaling identity {} released", channel.identity());
        }

        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
        *self.shared.local.write() = None;
        self.shared.monitor.disconnected();
    }

    pub fn identity(&self) -> Option<SignalingIdentity> {
        self.shared.monitor.current().identity
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.monitor.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.monitor.current()
    }

    pub fn remote_streams(&self) -> watch::Receiver<PeerStreams> {
        self.shared.streams.subscribe()
    }

    pub fn remote_snapshot(&self) -> PeerStreams {
        self.shared.streams.borrow().clone()
    }

    /// True while a call with `identity` is live, answered or not.
    pub fn is_tracking(&self, identity: &SignalingIdentity) -> bool {
        self.shared.calls.lock().contains_key(identity)
    }

    /// Connect/disconnect notifications. Only the first caller gets them.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaFormat, MediaTrack, TrackKind};
    use crate::peer::{LoopbackBroker, Registration};
    use crate::connection::ConnectionState;
    use std::time::Duration;

    fn stream(id: &str) -> LocalMediaStream {
        LocalMediaStream::new(
            id,
            vec![MediaTrack::new(format!("{id}-a"), TrackKind::Audio, MediaFormat::Pcmu)],
        )
    }

    async fn settle<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn close_before_open_is_harmless() {
        let manager = PeerManager::new(Arc::new(LoopbackBroker::new()));
        manager.close().await;
        manager.close().await;
        assert_eq!(manager.connection_status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn open_failure_is_reported_on_status() {
        let broker = LoopbackBroker::new();
        broker.set_offline(true);
        let manager = PeerManager::new(Arc::new(broker));
        let err = manager.open(stream("a")).await.unwrap_err();
        assert!(matches!(err, Error::Signaling(_)));
        let status = manager.connection_status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_error.is_some());
    }

    /// Holds every registration until the test lets it through.
    struct HeldBroker {
        inner: LoopbackBroker,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait::async_trait]
    impl SignalingBroker for HeldBroker {
        async fn register(&self) -> Result<Registration> {
            self.gate.acquire().await.unwrap().forget();
            self.inner.register().await
        }
    }

    #[tokio::test]
    async fn close_during_registration_releases_the_late_identity() {
        let inner = LoopbackBroker::new();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let manager = Arc::new(PeerManager::new(Arc::new(HeldBroker {
            inner: inner.clone(),
            gate: Arc::clone(&gate),
        })));

        let opening = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.open(stream("a")).await }
        });
        settle(|| manager.connection_status().state == ConnectionState::Connecting).await;

        tokio::time::timeout(Duration::from_secs(1), manager.close())
            .await
            .expect("close waited on a pending registration");

        gate.add_permits(1);
        assert!(matches!(opening.await.unwrap(), Err(Error::SessionEnded)));
        assert_eq!(inner.registrations(), 1);
        assert_eq!(inner.online(), 0);
        assert!(manager.identity().is_none());
    }

    #[tokio::test]
    async fn call_is_answered_and_removed_on_close() {
        let broker = Arc::new(LoopbackBroker::new());
        let a = PeerManager::new(broker.clone());
        let b = PeerManager::new(broker.clone());
        let a_stream = stream("a");
        let b_stream = stream("b");
        let a_id = a.open(a_stream.clone()).await.unwrap();
        let b_id = b.open(b_stream.clone()).await.unwrap();

        b.call(&a_id, &b_stream).await.unwrap();
        settle(|| a.remote_snapshot().len() == 1 && b.remote_snapshot().len() == 1).await;
        assert_eq!(a.remote_snapshot()[&b_id].stream.id(), "b");
        assert_eq!(b.remote_snapshot()[&a_id].stream.id(), "a");

        let mut a_events = a.events().unwrap();
        b.close().await;
        settle(|| a.remote_snapshot().is_empty()).await;
        assert_eq!(a_events.recv().await, Some(PeerEvent::Connected(b_id.clone())));
        assert_eq!(a_events.recv().await, Some(PeerEvent::Disconnected(b_id)));
    }

    #[tokio::test]
    async fn redial_replaces_instead_of_duplicating() {
        let broker = Arc::new(LoopbackBroker::new());
        let a = PeerManager::new(broker.clone());
        let b = PeerManager::new(broker.clone());
        let a_stream = stream("a");
        let b_stream = stream("b");
        let a_id = a.open(a_stream).await.unwrap();
        b.open(b_stream.clone()).await.unwrap();

        b.call(&a_id, &b_stream).await.unwrap();
        settle(|| b.remote_snapshot().len() == 1).await;
        let first = b.remote_snapshot()[&a_id].call_id;

        b.call(&a_id, &b_stream).await.unwrap();
        settle(|| b.remote_snapshot().get(&a_id).map(|s| s.call_id) != Some(first)).await;
        settle(|| b.remote_snapshot().len() == 1 && a.remote_snapshot().len() == 1).await;
    }

    #[tokio::test]
    async fn simultaneous_calls_converge_on_one_connection() {
        let broker = Arc::new(LoopbackBroker::new());
        let a = PeerManager::new(broker.clone());
        let b = PeerManager::new(broker.clone());
        let a_stream = stream("a");
        let b_stream = stream("b");
        let a_id = a.open(a_stream.clone()).await.unwrap();
        let b_id = b.open(b_stream.clone()).await.unwrap();

        let (ra, rb) = tokio::join!(a.call(&b_id, &a_stream), b.call(&a_id, &b_stream));
        ra.unwrap();
        rb.unwrap();

        settle(|| a.remote_snapshot().len() == 1 && b.remote_snapshot().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.remote_snapshot().len(), 1);
        assert_eq!(b.remote_snapshot().len(), 1);
        assert!(a.is_tracking(&b_id));
        assert!(b.is_tracking(&a_id));
    }
}
