#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

use interview_room::auth::Account;
use interview_room::media::{LocalMediaStream, MediaConstraints, MediaDevices, SyntheticDevices};
use interview_room::peer::{LoopbackBroker, Registration, SignalingBroker, SignalingIdentity};
use interview_room::presence::{
    AccountId, MemoryStore, Participant, ParticipantChange, ParticipantRole, ParticipantStore,
    SessionId, StoreError, StoreResult,
};
use interview_room::{InterviewSession, SessionBackends, SessionConfig, SessionContext};

pub const SESSION: &str = "interview-42";

pub fn context(account: &str, role: ParticipantRole) -> SessionContext {
    SessionContext::new(
        SessionId::from(SESSION),
        Account {
            id: AccountId::from(account),
            display_name: account.to_string(),
            role,
        },
    )
    .unwrap()
}

pub fn session(
    account: &str,
    devices: Arc<dyn MediaDevices>,
    store: Arc<dyn ParticipantStore>,
    broker: &LoopbackBroker,
) -> InterviewSession {
    session_with_broker(account, devices, store, Arc::new(broker.clone()))
}

pub fn session_with_broker(
    account: &str,
    devices: Arc<dyn MediaDevices>,
    store: Arc<dyn ParticipantStore>,
    broker: Arc<dyn SignalingBroker>,
) -> InterviewSession {
    InterviewSession::new(
        context(account, ParticipantRole::Candidate),
        SessionConfig::default(),
        SessionBackends {
            devices,
            store,
            broker,
        },
    )
}

pub fn synthetic_session(
    account: &str,
    store: &MemoryStore,
    broker: &LoopbackBroker,
) -> (InterviewSession, SyntheticDevices) {
    let devices = SyntheticDevices::new();
    let session = session(account, Arc::new(devices.clone()), Arc::new(store.clone()), broker);
    (session, devices)
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub fn active_rows(store: &MemoryStore) -> Vec<Participant> {
    store
        .rows(&SessionId::from(SESSION))
        .into_iter()
        .filter(|p| p.is_active())
        .collect()
}

pub fn identity_of(session: &InterviewSession) -> SignalingIdentity {
    session.identity().expect("session has a signaling identity")
}

/// Devices that hold every `open` until the test releases them.
#[derive(Clone)]
pub struct GatedDevices {
    inner: SyntheticDevices,
    gate: Arc<Semaphore>,
}

impl GatedDevices {
    pub fn new() -> Self {
        Self {
            inner: SyntheticDevices::new(),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn released(&self) -> usize {
        self.inner.released()
    }
}

#[async_trait]
impl MediaDevices for GatedDevices {
    async fn open(&self, constraints: &MediaConstraints) -> interview_room::Result<LocalMediaStream> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.inner.open(constraints).await
    }
}

/// A store whose reads can be made to fail on demand.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ParticipantStore for FlakyStore {
    async fn insert(&self, participant: Participant) -> StoreResult<()> {
        self.inner.insert(participant).await
    }

    async fn update_identity(
        &self,
        session: &SessionId,
        account: &AccountId,
        identity: &SignalingIdentity,
    ) -> StoreResult<bool> {
        self.inner.update_identity(session, account, identity).await
    }

    async fn select_active(&self, session: &SessionId) -> StoreResult<Vec<Participant>> {
        self.check()?;
        self.inner.select_active(session).await
    }

    async fn close_active(
        &self,
        session: &SessionId,
        account: &AccountId,
        left_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.close_active(session, account, left_at).await
    }

    async fn delete(&self, session: &SessionId, account: &AccountId) -> StoreResult<usize> {
        self.inner.delete(session, account).await
    }

    fn subscribe(&self, session: &SessionId) -> broadcast::Receiver<ParticipantChange> {
        self.inner.subscribe(session)
    }
}

/// A relay that accepts the connection but never assigns an identity.
pub struct SilentBroker;

#[async_trait]
impl SignalingBroker for SilentBroker {
    async fn register(&self) -> interview_room::Result<Registration> {
        std::future::pending().await
    }
}
