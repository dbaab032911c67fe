//! Presence synchronizer: the session's view of the participant table.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, warn};

use super::model::{AccountId, Participant, ParticipantChange, ParticipantRole, SessionId};
use super::store::{ParticipantStore, StoreError};
use crate::error::Result;
use crate::peer::SignalingIdentity;

#[derive(Clone)]
pub struct PresenceSync {
    store: Arc<dyn ParticipantStore>,
}

impl PresenceSync {
    pub fn new(store: Arc<dyn ParticipantStore>) -> Self {
        Self { store }
    }

    /// Add an active row for `account`. Joining twice is not an error.
    pub async fn join(
        &self,
        session: &SessionId,
        account: &AccountId,
        role: ParticipantRole,
        display_name: &str,
    ) -> Result<()> {
        let row = Participant::joining(session.clone(), account.clone(), role, display_name);
        match self.store.insert(row).await {
            Ok(()) => {
                info!("{} joined {} as {}", account, session, role);
                Ok(())
            }
            Err(StoreError::UniqueViolation { .. }) => {
                debug!("{} already active in {}", account, session);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn publish_identity(
        &self,
        session: &SessionId,
        account: &AccountId,
        identity: &SignalingIdentity,
    ) -> Result<()> {
        if !self.store.update_identity(session, account, identity).await? {
            warn!("{} has no active row in {}, identity {} not published", account, session, identity);
        }
        Ok(())
    }

    pub async fn list_active(&self, session: &SessionId) -> Result<Vec<Participant>> {
        Ok(self.store.select_active(session).await?)
    }

    pub fn subscribe(&self, session: &SessionId) -> PresenceSubscription {
        PresenceSubscription {
            rx: self.store.subscribe(session),
        }
    }

    /// Close the active row. A no-op when not joined.
    pub async fn leave(&self, session: &SessionId, account: &AccountId) -> Result<()> {
        if self.store.close_active(session, account, Utc::now()).await? {
            info!("{} left {}", account, session);
        }
        Ok(())
    }
}

/// Roster change signal. Bursts and lag collapse into one wakeup.
pub struct PresenceSubscription {
    rx: broadcast::Receiver<ParticipantChange>,
}

impl PresenceSubscription {
    /// Wait for the roster to change. `None` once the feed is gone.
    pub async fn changed(&mut self) -> Option<()> {
        match self.rx.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("presence feed lagged by {}", skipped),
            Err(RecvError::Closed) => return None,
        }
        loop {
            match self.rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => return Some(()),
                Err(TryRecvError::Closed) => return Some(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryStore;

    #[tokio::test]
    async fn join_is_idempotent() {
        let store = MemoryStore::new();
        let presence = PresenceSync::new(Arc::new(store.clone()));
        let session = SessionId::from("s1");
        let account = AccountId::from("alice");

        presence.join(&session, &account, ParticipantRole::Recruiter, "Alice").await.unwrap();
        presence.join(&session, &account, ParticipantRole::Recruiter, "Alice").await.unwrap();

        assert_eq!(presence.list_active(&session).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leave_clears_connected() {
        let store = MemoryStore::new();
        let presence = PresenceSync::new(Arc::new(store.clone()));
        let session = SessionId::from("s1");
        let account = AccountId::from("alice");

        presence.join(&session, &account, ParticipantRole::Candidate, "Alice").await.unwrap();
        presence
            .publish_identity(&session, &account, &SignalingIdentity::from("peer-7"))
            .await
            .unwrap();
        presence.leave(&session, &account).await.unwrap();
        presence
            .publish_identity(&session, &account, &SignalingIdentity::from("peer-8"))
            .await
            .unwrap();

        let rows = store.rows(&session);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].left_at.is_some());
        assert!(!rows[0].connected);
        assert_eq!(rows[0].signaling_id, Some(SignalingIdentity::from("peer-7")));
        assert!(presence.list_active(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_without_join_is_a_no_op() {
        let presence = PresenceSync::new(Arc::new(MemoryStore::new()));
        presence.leave(&"s1".into(), &"nobody".into()).await.unwrap();
    }

    #[tokio::test]
    async fn bursts_collapse_into_one_signal() {
        let store = MemoryStore::new();
        let presence = PresenceSync::new(Arc::new(store.clone()));
        let session = SessionId::from("s1");
        let mut sub = presence.subscribe(&session);

        for name in ["a", "b", "c"] {
            presence
                .join(&session, &name.into(), ParticipantRole::Candidate, name)
                .await
                .unwrap();
        }
        assert_eq!(sub.changed().await, Some(()));
        let again = tokio::time::timeout(std::time::Duration::from_millis(20), sub.changed()).await;
        assert!(again.is_err());
    }
}
