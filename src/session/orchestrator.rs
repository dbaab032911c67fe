//! One interview room: media, presence and peer calls wired together.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::SessionContext;
use super::phase::SessionPhase;
use crate::config::SessionConfig;
use crate::connection::ConnectionStatus;
use crate::error::{Error, Result};
use crate::media::{
    LocalMediaStream, MediaCapture, MediaDevices, RecordingArtifact, RecordingEvent,
    RecordingState, TrackKind,
};
use crate::peer::{PeerEvent, PeerManager, PeerStreams, SignalingBroker, SignalingIdentity};
use crate::presence::{Participant, ParticipantStore, PresenceSubscription, PresenceSync};
use crate::room::Roster;

/// External collaborators a session runs against.
#[derive(Clone)]
pub struct SessionBackends {
    pub devices: Arc<dyn MediaDevices>,
    pub store: Arc<dyn ParticipantStore>,
    pub broker: Arc<dyn SignalingBroker>,
}

/// Everything a UI needs to draw the room.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub connection: ConnectionStatus,
    pub local_stream: Option<LocalMediaStream>,
    pub remote_streams: PeerStreams,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub recording: RecordingState,
    pub recording_elapsed: Duration,
    pub last_recording: Option<RecordingArtifact>,
}

struct Inner {
    context: SessionContext,
    config: SessionConfig,
    capture: MediaCapture,
    peers: PeerManager,
    presence: PresenceSync,
    roster: Mutex<Roster>,
    phase: watch::Sender<SessionPhase>,
    cancelled: watch::Sender<bool>,
    teardown: tokio::sync::Mutex<()>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    last_recording: Mutex<Option<RecordingArtifact>>,
}

#[derive(Clone)]
pub struct InterviewSession {
    inner: Arc<Inner>,
}

impl InterviewSession {
    pub fn new(context: SessionContext, config: SessionConfig, backends: SessionBackends) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Idle);
        let (cancelled, _) = watch::channel(false);
        let roster = Roster::new(context.account.id.clone());
        Self {
            inner: Arc::new(Inner {
                capture: MediaCapture::new(backends.devices, config.recording.clone()),
                peers: PeerManager::new(backends.broker),
                presence: PresenceSync::new(backends.store),
                roster: Mutex::new(roster),
                phase,
                cancelled,
                teardown: tokio::sync::Mutex::new(()),
                reconciler: Mutex::new(None),
                last_recording: Mutex::new(None),
                context,
                config,
            }),
        }
    }

    /// Run the join sequence up to `Active`. Any failure, or an `end()` that
    /// lands while this is in flight, tears everything down again.
    pub async fn enter(&self) -> Result<()> {
        let inner = &self.inner;
        if *inner.cancelled.borrow() {
            return Err(Error::SessionEnded);
        }
        if *inner.phase.borrow() != SessionPhase::Idle {
            return Err(Error::InvalidSession("session already entered".to_string()));
        }

        info!(
            "{} entering session {}",
            inner.context.account.id, inner.context.session_id
        );
        match Arc::clone(inner).join().await {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, Error::SessionEnded) {
                    info!("session {} ended during join", inner.context.session_id);
                } else {
                    error!("failed to enter session {}: {}", inner.context.session_id, e);
                }
                inner.teardown().await;
                Err(e)
            }
        }
    }

    /// Leave presence, close every call, stop local media. Safe to call any
    /// number of times, from any phase.
    pub async fn end(&self) {
        self.inner.cancelled.send_replace(true);
        self.inner.teardown().await;
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    pub fn phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase.subscribe()
    }

    pub fn current_phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    pub fn identity(&self) -> Option<SignalingIdentity> {
        self.inner.peers.identity()
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.peers.status()
    }

    pub fn remote_streams(&self) -> watch::Receiver<PeerStreams> {
        self.inner.peers.remote_streams()
    }

    pub fn local_stream(&self) -> Option<LocalMediaStream> {
        self.inner.capture.local_stream()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = &self.inner;
        SessionSnapshot {
            phase: *inner.phase.borrow(),
            connection: inner.peers.connection_status(),
            local_stream: inner.capture.local_stream(),
            remote_streams: inner.peers.remote_snapshot(),
            audio_enabled: inner.capture.is_enabled(TrackKind::Audio),
            video_enabled: inner.capture.is_enabled(TrackKind::Video),
            recording: inner.capture.recording_state(),
            recording_elapsed: inner.capture.recording_elapsed(),
            last_recording: inner.last_recording.lock().clone(),
        }
    }

    pub fn toggle_audio(&self) -> Result<bool> {
        self.inner.capture.toggle(TrackKind::Audio)
    }

    pub fn toggle_video(&self) -> Result<bool> {
        self.inner.capture.toggle(TrackKind::Video)
    }

    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<bool> {
        self.inner.capture.set_track_enabled(kind, enabled)
    }

    pub fn start_recording(&self) -> Result<()> {
        let stream = self
            .inner
            .capture
            .local_stream()
            .ok_or_else(|| Error::DeviceUnavailable("no local stream to record".to_string()))?;
        self.inner.capture.start_recording(&stream)
    }

    pub async fn stop_recording(&self) -> Result<RecordingArtifact> {
        self.inner.finish_recording().await
    }

    /// Start/stop notifications for the recording timer.
    pub fn recording_events(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.capture.recording_events()
    }
}

impl Inner {
    fn set_phase(&self, next: SessionPhase) {
        self.phase.send_if_modified(|phase| {
            if phase.is_closing() || *phase == next {
                return false;
            }
            debug!("session {} phase {} -> {}", self.context.session_id, phase, next);
            *phase = next;
            true
        });
    }

    fn checkpoint(&self) -> Result<()> {
        if *self.cancelled.borrow() {
            Err(Error::SessionEnded)
        } else {
            Ok(())
        }
    }

    /// Drive `step` until it finishes or `end()` is called. A registration
    /// can stay pending indefinitely, so leaving must not wait on it.
    async fn unless_cancelled<T>(&self, step: impl Future<Output = Result<T>>) -> Result<T> {
        let mut cancelled = self.cancelled.subscribe();
        tokio::select! {
            result = step => result,
            _ = cancelled.wait_for(|ended| *ended) => Err(Error::SessionEnded),
        }
    }

    async fn join(self: Arc<Self>) -> Result<()> {
        let session = &self.context.session_id;
        let account = &self.context.account;

        self.set_phase(SessionPhase::AcquiringMedia);
        let local = self.capture.acquire(&self.config.media).await?;
        self.checkpoint()?;

        self.set_phase(SessionPhase::JoiningPresence);
        self.presence
            .join(session, &account.id, account.role, &account.display_name)
            .await?;
        self.checkpoint()?;

        self.set_phase(SessionPhase::OpeningSignaling);
        let identity = self.unless_cancelled(self.peers.open(local.clone())).await?;
        self.checkpoint()?;
        self.roster.lock().set_identity(identity.clone());
        self.presence.publish_identity(session, &account.id, &identity).await?;
        self.checkpoint()?;

        self.set_phase(SessionPhase::ConnectingPeers);
        let subscription = self.presence.subscribe(session);
        let active = self.presence.list_active(session).await?;
        self.checkpoint()?;
        self.dial(&active, &local).await;
        self.checkpoint()?;

        let peer_events = self.peers.events();
        let reconciler = tokio::spawn(Arc::clone(&self).reconcile(subscription, peer_events, local));
        if let Some(previous) = self.reconciler.lock().replace(reconciler) {
            previous.abort();
        }
        // end() may have run between the last checkpoint and the spawn
        self.checkpoint()?;

        self.set_phase(SessionPhase::Active);
        info!("session {} active as {}", session, identity);
        Ok(())
    }

    async fn dial(&self, active: &[Participant], local: &LocalMediaStream) {
        let plan = self
            .roster
            .lock()
            .to_dial(active, |identity| self.peers.is_tracking(identity));
        for identity in plan {
            if let Err(e) = self.peers.call(&identity, local).await {
                warn!("call to {} failed: {}", identity, e);
                self.roster.lock().forget(&identity);
            }
        }
    }

    async fn reconcile(
        self: Arc<Self>,
        mut roster_changes: PresenceSubscription,
        peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
        local: LocalMediaStream,
    ) {
        let session = self.context.session_id.clone();
        let (_idle_tx, idle_rx) = mpsc::unbounded_channel();
        let mut peer_events = peer_events.unwrap_or(idle_rx);

        loop {
            tokio::select! {
                changed = roster_changes.changed() => {
                    if changed.is_none() {
                        warn!("presence feed for {} closed", session);
                        break;
                    }
                    match self.presence.list_active(&session).await {
                        Ok(active) => self.dial(&active, &local).await,
                        Err(e) => warn!("roster refresh failed, retrying on next change: {}", e),
                    }
                }
                Some(event) = peer_events.recv() => match event {
                    PeerEvent::Connected(identity) => info!("{} connected", identity),
                    PeerEvent::Disconnected(identity) => {
                        info!("{} disconnected", identity);
                        self.roster.lock().forget(&identity);
                    }
                },
            }
        }
    }

    async fn finish_recording(&self) -> Result<RecordingArtifact> {
        let artifact = self.capture.stop_recording().await?;
        if artifact.was_started() {
            info!(
                "recording {} finished ({} bytes)",
                artifact.file_name,
                artifact.data.len()
            );
            *self.last_recording.lock() = Some(artifact.clone());
        }
        Ok(artifact)
    }

    /// Every step runs even when an earlier one fails. Re-running it is
    /// harmless and releases anything acquired since the last run.
    async fn teardown(&self) {
        let _serial = self.teardown.lock().await;
        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Ended {
                return false;
            }
            *phase = SessionPhase::Ending;
            true
        });

        let reconciler = self.reconciler.lock().take();
        if let Some(task) = reconciler {
            task.abort();
        }

        let session = &self.context.session_id;
        if let Err(e) = self.presence.leave(session, &self.context.account.id).await {
            warn!("leaving {} failed: {}", session, e);
        }
        self.peers.close().await;

        if self.capture.recording_state() == RecordingState::Recording {
            if let Err(e) = self.finish_recording().await {
                warn!("could not finalize recording: {}", e);
            }
        }
        self.capture.stop();
        self.roster.lock().clear();

        if self.phase.send_replace(SessionPhase::Ended) != SessionPhase::Ended {
            info!("session {} ended", session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticDevices;
    use crate::peer::LoopbackBroker;
    use crate::presence::{MemoryStore, ParticipantRole, SessionId};
    use crate::auth::Account;

    fn session(store: &MemoryStore, broker: &LoopbackBroker, account: &str) -> InterviewSession {
        let context = SessionContext::new(
            SessionId::from("s1"),
            Account {
                id: account.into(),
                display_name: account.to_string(),
                role: ParticipantRole::Candidate,
            },
        )
        .unwrap();
        InterviewSession::new(
            context,
            SessionConfig::default(),
            SessionBackends {
                devices: Arc::new(SyntheticDevices::new()),
                store: Arc::new(store.clone()),
                broker: Arc::new(broker.clone()),
            },
        )
    }

    #[tokio::test]
    async fn enter_reaches_active_and_publishes_identity() {
        let store = MemoryStore::new();
        let broker = LoopbackBroker::new();
        let alice = session(&store, &broker, "alice");

        alice.enter().await.unwrap();
        assert_eq!(alice.current_phase(), SessionPhase::Active);

        let rows = store.rows(&"s1".into());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].signaling_id, alice.identity());
        assert!(rows[0].connected);

        alice.end().await;
        assert_eq!(alice.current_phase(), SessionPhase::Ended);
    }

    #[tokio::test]
    async fn entering_twice_is_rejected() {
        let store = MemoryStore::new();
        let broker = LoopbackBroker::new();
        let alice = session(&store, &broker, "alice");
        alice.enter().await.unwrap();
        assert!(matches!(alice.enter().await, Err(Error::InvalidSession(_))));
        alice.end().await;
        assert!(matches!(alice.enter().await, Err(Error::SessionEnded)));
    }

    #[tokio::test]
    async fn recording_is_kept_as_last_recording() {
        let store = MemoryStore::new();
        let broker = LoopbackBroker::new();
        let alice = session(&store, &broker, "alice");
        alice.enter().await.unwrap();

        alice.start_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let artifact = alice.stop_recording().await.unwrap();
        assert!(artifact.was_started());

        let snapshot = alice.snapshot();
        assert_eq!(snapshot.recording, RecordingState::Idle);
        assert_eq!(
            snapshot.last_recording.map(|a| a.file_name),
            Some(artifact.file_name)
        );
        alice.end().await;
    }

    #[tokio::test]
    async fn end_finalizes_a_running_recording() {
        let store = MemoryStore::new();
        let broker = LoopbackBroker::new();
        let alice = session(&store, &broker, "alice");
        alice.enter().await.unwrap();
        let mut events = alice.recording_events();
        alice.start_recording().unwrap();

        alice.end().await;
        let snapshot = alice.snapshot();
        assert_eq!(snapshot.recording, RecordingState::Idle);
        assert!(snapshot.last_recording.is_some());
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Started)));
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Stopped(_))));
    }
}
