use hashbrown::HashMap;
use parking_lot::Mutex;

use wire::{Error, Result};

pub const MAX_PARTY_MEMBERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropRule {
    LeaderOnly,
    Participant,
    Everyone,
}

/// A character joining a party must leave any team first; a character
/// joining a team must leave any party first (see `dominion::team`). Both
/// sides call into the other's registry rather than each owning a flag.
pub trait PartyHooks {
    fn leave_team(&self, cid: i32);
}

#[derive(Debug, Clone)]
pub struct Party {
    pub id: u32,
    pub leader_cid: i32,
    /// Join order; index 0 is the oldest member, used for leader succession.
    pub members: Vec<i32>,
    pub drop_rule: DropRule,
}

impl Party {
    fn new(id: u32, leader_cid: i32) -> Self {
        Party {
            id,
            leader_cid,
            members: vec![leader_cid],
            drop_rule: DropRule::LeaderOnly,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingInvite {
    inviter_cid: i32,
    /// `None` if the inviter has no party yet and accepting allocates a
    /// fresh one; `Some(party_id)` if the inviter already leads a party.
    existing_party: Option<u32>,
}

/// Outcome of `accept`, describing which state changed so the caller can
/// build the right notification packets.
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    Formed(Party),
    Joined(Party),
}

/// Outcome of `leave`/`kick`, describing whether the party survived.
#[derive(Debug, Clone)]
pub enum DepartureOutcome {
    Disbanded { former_members: Vec<i32> },
    Continued(Party),
}

struct Inner {
    parties: HashMap<u32, Party>,
    member_party: HashMap<i32, u32>,
    pending_invites: HashMap<i32, PendingInvite>,
    next_id: u32,
}

/// Implicit-formation party registry (C10 Party). Party id 0 is never
/// stored as a real row; it is represented by the absence of an entry in
/// `member_party` plus a pending invite.
pub struct PartyRegistry {
    inner: Mutex<Inner>,
}

impl PartyRegistry {
    pub fn new() -> Self {
        PartyRegistry {
            inner: Mutex::new(Inner {
                parties: HashMap::new(),
                member_party: HashMap::new(),
                pending_invites: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn party_of(&self, cid: i32) -> Option<Party> {
        let inner = self.inner.lock();
        inner.member_party.get(&cid).and_then(|id| inner.parties.get(id)).cloned()
    }

    /// Records an invite. If the inviter already leads a party, the target
    /// joins that party on accept; otherwise accepting allocates a new
    /// party for both.
    pub fn invite(&self, inviter_cid: i32, invitee_cid: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.member_party.contains_key(&invitee_cid) {
            return Err(Error::Conflict("target is already in a party".into()));
        }
        let existing_party = match inner.member_party.get(&inviter_cid) {
            Some(&id) => {
                let party = inner.parties.get(&id).expect("party index consistent");
                if party.leader_cid != inviter_cid {
                    return Err(Error::State("only the leader may invite".into()));
                }
                if party.members.len() >= MAX_PARTY_MEMBERS {
                    return Err(Error::Capacity("party is full".into()));
                }
                Some(id)
            }
            None => None,
        };
        inner.pending_invites.insert(
            invitee_cid,
            PendingInvite {
                inviter_cid,
                existing_party,
            },
        );
        Ok(())
    }

    pub fn cancel_invite(&self, invitee_cid: i32) {
        self.inner.lock().pending_invites.remove(&invitee_cid);
    }

    /// Allocates a party (if this is the inviter's first member) or adds to
    /// the existing one. Either way, force-removes the invitee from any
    /// team.
    pub fn accept(&self, invitee_cid: i32, hooks: &dyn PartyHooks) -> Result<AcceptOutcome> {
        let mut inner = self.inner.lock();
        let invite = inner
            .pending_invites
            .remove(&invitee_cid)
            .ok_or_else(|| Error::NotFound("no pending party invite".into()))?;

        let outcome = match invite.existing_party {
            Some(party_id) => {
                let party = inner.parties.get_mut(&party_id).ok_or_else(|| Error::NotFound("party no longer exists".into()))?;
                if party.members.len() >= MAX_PARTY_MEMBERS {
                    return Err(Error::Capacity("party is full".into()));
                }
                party.members.push(invitee_cid);
                let snapshot = party.clone();
                inner.member_party.insert(invitee_cid, party_id);
                AcceptOutcome::Joined(snapshot)
            }
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                let mut party = Party::new(id, invite.inviter_cid);
                party.members.push(invitee_cid);
                inner.member_party.insert(invite.inviter_cid, id);
                inner.member_party.insert(invitee_cid, id);
                inner.parties.insert(id, party.clone());
                AcceptOutcome::Formed(party)
            }
        };
        drop(inner);
        hooks.leave_team(invitee_cid);
        Ok(outcome)
    }

    pub fn set_drop_rule(&self, requester_cid: i32, rule: DropRule) -> Result<()> {
        let mut inner = self.inner.lock();
        let party_id = *inner
            .member_party
            .get(&requester_cid)
            .ok_or_else(|| Error::State("not in a party".into()))?;
        let party = inner.parties.get_mut(&party_id).expect("party index consistent");
        if party.leader_cid != requester_cid {
            return Err(Error::State("only the leader may change the drop rule".into()));
        }
        party.drop_rule = rule;
        Ok(())
    }

    /// Leader succession: the oldest remaining member becomes leader when
    /// the leader leaves and at least two members remain. A party with at
    /// most one member left is disbanded.
    pub fn leave(&self, cid: i32) -> Result<DepartureOutcome> {
        let mut inner = self.inner.lock();
        let party_id = inner
            .member_party
            .remove(&cid)
            .ok_or_else(|| Error::State("not in a party".into()))?;
        self.remove_member_and_settle(&mut inner, party_id, cid)
    }

    pub fn kick(&self, requester_cid: i32, target_cid: i32) -> Result<DepartureOutcome> {
        let mut inner = self.inner.lock();
        let party_id = *inner
            .member_party
            .get(&requester_cid)
            .ok_or_else(|| Error::State("not in a party".into()))?;
        {
            let party = inner.parties.get(&party_id).expect("party index consistent");
            if party.leader_cid != requester_cid {
                return Err(Error::State("only the leader may kick".into()));
            }
            if !party.members.contains(&target_cid) {
                return Err(Error::NotFound("target is not in this party".into()));
            }
        }
        inner.member_party.remove(&target_cid);
        self.remove_member_and_settle(&mut inner, party_id, target_cid)
    }

    pub fn disband(&self, requester_cid: i32) -> Result<Vec<i32>> {
        let mut inner = self.inner.lock();
        let party_id = *inner
            .member_party
            .get(&requester_cid)
            .ok_or_else(|| Error::State("not in a party".into()))?;
        let party = inner.parties.get(&party_id).expect("party index consistent");
        if party.leader_cid != requester_cid {
            return Err(Error::State("only the leader may disband".into()));
        }
        let members = party.members.clone();
        for member in &members {
            inner.member_party.remove(member);
        }
        inner.parties.remove(&party_id);
        Ok(members)
    }

    fn remove_member_and_settle(&self, inner: &mut Inner, party_id: u32, departed_cid: i32) -> Result<DepartureOutcome> {
        let party = inner.parties.get_mut(&party_id).expect("party index consistent");
        party.members.retain(|&m| m != departed_cid);

        if party.members.len() <= 1 {
            let former_members = party.members.clone();
            for member in &former_members {
                inner.member_party.remove(member);
            }
            inner.parties.remove(&party_id);
            return Ok(DepartureOutcome::Disbanded { former_members });
        }

        if party.leader_cid == departed_cid {
            party.leader_cid = party.members[0];
        }
        Ok(DepartureOutcome::Continued(party.clone()))
    }
}

impl Default for PartyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHooks;
    impl PartyHooks for NoopHooks {
        fn leave_team(&self, _cid: i32) {}
    }

    #[test]
    fn formation_leader_death_and_disband() {
        let parties = PartyRegistry::new();
        let hooks = NoopHooks;

        parties.invite(1, 2).unwrap();
        let outcome = parties.accept(2, &hooks).unwrap();
        let party_id = match outcome {
            AcceptOutcome::Formed(p) => {
                assert_eq!(p.leader_cid, 1);
                assert_eq!(p.members, vec![1, 2]);
                p.id
            }
            _ => panic!("expected Formed"),
        };

        parties.invite(1, 3).unwrap();
        match parties.accept(3, &hooks).unwrap() {
            AcceptOutcome::Joined(p) => {
                assert_eq!(p.id, party_id);
                assert_eq!(p.members, vec![1, 2, 3]);
            }
            _ => panic!("expected Joined"),
        }

        match parties.leave(1).unwrap() {
            DepartureOutcome::Continued(p) => {
                assert_eq!(p.leader_cid, 2);
                assert_eq!(p.members, vec![2, 3]);
            }
            _ => panic!("expected Continued"),
        }

        match parties.leave(2).unwrap() {
            DepartureOutcome::Disbanded { former_members } => {
                assert_eq!(former_members, vec![3]);
            }
            _ => panic!("expected Disbanded"),
        }
        assert!(parties.party_of(3).is_none());
    }

    #[test]
    fn kick_requires_leader() {
        let parties = PartyRegistry::new();
        let hooks = NoopHooks;
        parties.invite(1, 2).unwrap();
        parties.accept(2, &hooks).unwrap();
        assert!(parties.kick(2, 1).is_err());
        assert!(parties.kick(1, 2).is_ok());
    }

    #[test]
    fn party_caps_at_five_members() {
        let parties = PartyRegistry::new();
        let hooks = NoopHooks;
        parties.invite(1, 2).unwrap();
        parties.accept(2, &hooks).unwrap();
        for cid in 3..=6 {
            parties.invite(1, cid).unwrap();
            parties.accept(cid, &hooks).unwrap();
        }
        assert!(matches!(parties.invite(1, 7), Err(Error::Capacity(_))));
    }
}
