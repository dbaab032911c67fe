use crate::auth::{Account, AccountProvider};
use crate::error::{Error, Result};
use crate::presence::SessionId;

/// Who is joining which session. Resolved once, before anything starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub account: Account,
}

impl SessionContext {
    pub fn new(session_id: SessionId, account: Account) -> Result<Self> {
        if session_id.is_empty() {
            return Err(Error::InvalidSession("missing session id".to_string()));
        }
        Ok(Self { session_id, account })
    }

    pub async fn resolve(session_id: &str, accounts: &dyn AccountProvider) -> Result<Self> {
        let session_id = SessionId::new(session_id);
        if session_id.is_empty() {
            return Err(Error::InvalidSession("missing session id".to_string()));
        }
        let account = accounts
            .current_account()
            .await
            .ok_or_else(|| Error::InvalidSession("no signed-in account".to_string()))?;
        Self::new(session_id, account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAccount;
    use crate::presence::ParticipantRole;

    #[tokio::test]
    async fn empty_session_or_no_account_is_invalid() {
        let alice = StaticAccount::new("alice", "Alice", ParticipantRole::Recruiter);
        assert!(matches!(
            SessionContext::resolve("  ", &alice).await,
            Err(Error::InvalidSession(_))
        ));
        assert!(matches!(
            SessionContext::resolve("s1", &StaticAccount::signed_out()).await,
            Err(Error::InvalidSession(_))
        ));

        let ctx = SessionContext::resolve("s1", &alice).await.unwrap();
        assert_eq!(ctx.session_id.as_str(), "s1");
        assert_eq!(ctx.account.display_name, "Alice");
    }
}
