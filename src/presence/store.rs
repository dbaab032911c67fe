//! Record store contract for participant rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use super::model::{AccountId, Participant, ParticipantChange, SessionId};
use crate::error::Error;
use crate::peer::SignalingIdentity;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{account} already has an active row in session {session}")]
    UniqueViolation { session: SessionId, account: AccountId },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { session, .. } => Error::PresenceConflict(session.to_string()),
            StoreError::Unavailable(msg) => Error::Store(msg),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Insert a new row. At most one active row per (session, account).
    async fn insert(&self, participant: Participant) -> StoreResult<()>;

    /// Set the signaling identity on the active row and mark it connected.
    /// Returns false when there is no active row.
    async fn update_identity(
        &self,
        session: &SessionId,
        account: &AccountId,
        identity: &SignalingIdentity,
    ) -> StoreResult<bool>;

    async fn select_active(&self, session: &SessionId) -> StoreResult<Vec<Participant>>;

    /// Set `left_at` and clear `connected` on the active row. Returns false
    /// when there was none.
    async fn close_active(
        &self,
        session: &SessionId,
        account: &AccountId,
        left_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Remove every row, active or historical, for `account` in `session`.
    /// Returns how many rows went.
    async fn delete(&self, session: &SessionId, account: &AccountId) -> StoreResult<usize>;

    fn subscribe(&self, session: &SessionId) -> broadcast::Receiver<ParticipantChange>;
}
