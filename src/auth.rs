//! Who is signed in on this client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::presence::{AccountId, ParticipantRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub role: ParticipantRole,
}

#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn current_account(&self) -> Option<Account>;
}

/// Always returns the same account, or nobody.
#[derive(Debug, Clone, Default)]
pub struct StaticAccount(Option<Account>);

impl StaticAccount {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: ParticipantRole) -> Self {
        Self(Some(Account {
            id: AccountId::new(id),
            display_name: display_name.into(),
            role,
        }))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl AccountProvider for StaticAccount {
    async fn current_account(&self) -> Option<Account> {
        self.0.clone()
    }
}
