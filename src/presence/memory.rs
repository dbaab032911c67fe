//! In-process participant table with a broadcast change feed per session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::model::{AccountId, ChangeKind, Participant, ParticipantChange, SessionId};
use super::store::{ParticipantStore, StoreError, StoreResult};
use crate::peer::SignalingIdentity;

const FEED_CAPACITY: usize = 64;

#[derive(Default)]
struct Table {
    rows: Vec<Participant>,
    feeds: HashMap<SessionId, broadcast::Sender<ParticipantChange>>,
}

impl Table {
    fn feed(&mut self, session: &SessionId) -> &broadcast::Sender<ParticipantChange> {
        self.feeds
            .entry(session.clone())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
    }

    fn notify(&mut self, kind: ChangeKind, session: &SessionId, account: &AccountId) {
        let change = ParticipantChange {
            kind,
            session_id: session.clone(),
            account_id: account.clone(),
        };
        let _ = self.feed(session).send(change);
    }

    fn active_mut(&mut self, session: &SessionId, account: &AccountId) -> Option<&mut Participant> {
        self.rows
            .iter_mut()
            .find(|p| p.is_active() && &p.session_id == session && &p.account_id == account)
    }
}

/// Cloning shares the table, so sessions in one process see each other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    table: Arc<Mutex<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row for `session`, active or not, in insertion order.
    pub fn rows(&self, session: &SessionId) -> Vec<Participant> {
        self.table
            .lock()
            .rows
            .iter()
            .filter(|p| &p.session_id == session)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ParticipantStore for MemoryStore {
    async fn insert(&self, participant: Participant) -> StoreResult<()> {
        let mut table = self.table.lock();
        let session = participant.session_id.clone();
        let account = participant.account_id.clone();
        if participant.is_active() && table.active_mut(&session, &account).is_some() {
            return Err(StoreError::UniqueViolation { session, account });
        }
        table.rows.push(participant);
        debug!("participant {} inserted into {}", account, session);
        table.notify(ChangeKind::Insert, &session, &account);
        Ok(())
    }

    async fn update_identity(
        &self,
        session: &SessionId,
        account: &AccountId,
        identity: &SignalingIdentity,
    ) -> StoreResult<bool> {
        let mut table = self.table.lock();
        match table.active_mut(session, account) {
            Some(row) => {
                row.signaling_id = Some(identity.clone());
                row.connected = true;
            }
            None => return Ok(false),
        }
        table.notify(ChangeKind::Update, session, account);
        Ok(true)
    }

    async fn select_active(&self, session: &SessionId) -> StoreResult<Vec<Participant>> {
        Ok(self
            .table
            .lock()
            .rows
            .iter()
            .filter(|p| p.is_active() && &p.session_id == session)
            .cloned()
            .collect())
    }

    async fn close_active(
        &self,
        session: &SessionId,
        account: &AccountId,
        left_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut table = self.table.lock();
        match table.active_mut(session, account) {
            Some(row) => {
                row.left_at = Some(left_at);
                row.connected = false;
            }
            None => return Ok(false),
        }
        table.notify(ChangeKind::Update, session, account);
        Ok(true)
    }

    async fn delete(&self, session: &SessionId, account: &AccountId) -> StoreResult<usize> {
        let mut table = self.table.lock();
        let before = table.rows.len();
        table
            .rows
            .retain(|p| !(&p.session_id == session && &p.account_id == account));
        let removed = before - table.rows.len();
        if removed > 0 {
            debug!("deleted {} rows for {} in {}", removed, account, session);
            table.notify(ChangeKind::Delete, session, account);
        }
        Ok(removed)
    }

    fn subscribe(&self, session: &SessionId) -> broadcast::Receiver<ParticipantChange> {
        self.table.lock().feed(session).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ParticipantRole;

    fn row(account: &str) -> Participant {
        Participant::joining("s1".into(), account.into(), ParticipantRole::Candidate, account)
    }

    #[tokio::test]
    async fn second_active_row_is_rejected() {
        let store = MemoryStore::new();
        store.insert(row("alice")).await.unwrap();
        let err = store.insert(row("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));

        store
            .close_active(&"s1".into(), &"alice".into(), Utc::now())
            .await
            .unwrap();
        store.insert(row("alice")).await.unwrap();
        assert_eq!(store.rows(&"s1".into()).len(), 2);
    }

    #[tokio::test]
    async fn changes_are_broadcast_per_session() {
        let store = MemoryStore::new();
        let mut s1 = store.subscribe(&"s1".into());
        let mut s2 = store.subscribe(&"s2".into());

        store.insert(row("alice")).await.unwrap();
        let change = s1.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.account_id.as_str(), "alice");
        assert!(s2.try_recv().is_err());
    }

    #[tokio::test]
    async fn identity_only_lands_on_active_rows() {
        let store = MemoryStore::new();
        let session: SessionId = "s1".into();
        let account: AccountId = "bob".into();
        let identity = SignalingIdentity::from("peer-1");

        assert!(!store.update_identity(&session, &account, &identity).await.unwrap());
        store.insert(row("bob")).await.unwrap();
        assert!(store.update_identity(&session, &account, &identity).await.unwrap());

        let active = store.select_active(&session).await.unwrap();
        assert_eq!(active[0].signaling_id.as_ref(), Some(&identity));
        assert!(active[0].connected);
    }

    #[tokio::test]
    async fn delete_removes_history_and_notifies() {
        let store = MemoryStore::new();
        let session: SessionId = "s1".into();
        let account: AccountId = "carol".into();
        store.insert(row("carol")).await.unwrap();
        store.close_active(&session, &account, Utc::now()).await.unwrap();
        store.insert(row("carol")).await.unwrap();
        store.insert(row("dave")).await.unwrap();

        let mut feed = store.subscribe(&session);
        assert_eq!(store.delete(&session, &account).await.unwrap(), 2);
        let change = feed.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.account_id, account);

        let left: Vec<_> = store.rows(&session).into_iter().map(|p| p.account_id).collect();
        assert_eq!(left, vec![AccountId::from("dave")]);
        assert_eq!(store.delete(&session, &account).await.unwrap(), 0);
        assert!(feed.try_recv().is_err());
    }
}
