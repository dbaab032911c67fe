//! Decides whom to dial when the roster changes.

use std::collections::HashSet;

use crate::peer::SignalingIdentity;
use crate::presence::{AccountId, Participant};

#[derive(Debug, Default)]
pub struct Roster {
    own_account: Option<AccountId>,
    own_identity: Option<SignalingIdentity>,
    dialed: HashSet<SignalingIdentity>,
}

impl Roster {
    pub fn new(own_account: AccountId) -> Self {
        Self {
            own_account: Some(own_account),
            ..Self::default()
        }
    }

    pub fn set_identity(&mut self, identity: SignalingIdentity) {
        self.own_identity = Some(identity);
    }

    /// Identities in `active` that still need a call. Each is returned once
    /// until `forget` is called for it. `connected` reports peers that are
    /// already in a call with us (typically because they dialed us).
    pub fn to_dial<F>(&mut self, active: &[Participant], connected: F) -> Vec<SignalingIdentity>
    where
        F: Fn(&SignalingIdentity) -> bool,
    {
        let mut plan = Vec::new();
        for participant in active {
            if !participant.is_active() || Some(&participant.account_id) == self.own_account.as_ref() {
                continue;
            }
            let Some(identity) = participant.signaling_id.as_ref() else {
                continue;
            };
            if Some(identity) == self.own_identity.as_ref()
                || self.dialed.contains(identity)
                || connected(identity)
            {
                continue;
            }
            self.dialed.insert(identity.clone());
            plan.push(identity.clone());
        }
        plan
    }

    /// Allow `identity` to be dialed again, after a failed dial or a hangup.
    pub fn forget(&mut self, identity: &SignalingIdentity) -> bool {
        self.dialed.remove(identity)
    }

    pub fn dialed(&self) -> usize {
        self.dialed.len()
    }

    pub fn clear(&mut self) {
        self.dialed.clear();
        self.own_identity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ParticipantRole;

    fn published(account: &str, identity: Option<&str>) -> Participant {
        let mut p = Participant::joining("s1".into(), account.into(), ParticipantRole::Candidate, account);
        p.signaling_id = identity.map(SignalingIdentity::from);
        p.connected = identity.is_some();
        p
    }

    #[test]
    fn skips_self_unpublished_and_already_dialed() {
        let mut roster = Roster::new("me".into());
        roster.set_identity("peer-me".into());
        let active = vec![
            published("me", Some("peer-me")),
            published("a", Some("peer-a")),
            published("b", None),
            published("c", Some("peer-c")),
        ];

        let plan = roster.to_dial(&active, |_| false);
        assert_eq!(plan, vec![SignalingIdentity::from("peer-a"), SignalingIdentity::from("peer-c")]);
        assert!(roster.to_dial(&active, |_| false).is_empty());
        assert_eq!(roster.dialed(), 2);
    }

    #[test]
    fn peers_already_in_a_call_are_not_dialed() {
        let mut roster = Roster::new("me".into());
        let active = vec![published("a", Some("peer-a"))];
        assert!(roster.to_dial(&active, |id| id.as_str() == "peer-a").is_empty());
    }

    #[test]
    fn forgotten_identities_are_dialed_again() {
        let mut roster = Roster::new("me".into());
        let active = vec![published("a", Some("peer-a"))];
        assert_eq!(roster.to_dial(&active, |_| false).len(), 1);
        assert!(roster.forget(&"peer-a".into()));
        assert_eq!(roster.to_dial(&active, |_| false).len(), 1);
    }
}
