use hashbrown::HashMap;
use parking_lot::Mutex;

use wire::{Error, Result};

pub const SMALL_ZIOTITE_PER_MEMBER_CAP: i32 = 10_000;
pub const LARGE_ZIOTITE_CAP: i8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamCategory {
    Pvp,
    Diaspora,
    Cathedral,
}

impl TeamCategory {
    pub fn max_size(self) -> usize {
        match self {
            TeamCategory::Pvp => 5,
            TeamCategory::Diaspora => 10,
            TeamCategory::Cathedral => 10,
        }
    }
}

/// Side effect of joining a team: any existing party must be left first.
pub trait TeamHooks {
    fn leave_party(&self, cid: i32);
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: i32,
    pub leader_cid: i32,
    pub category: TeamCategory,
    pub kind: u8,
    /// Join order; index 0 is the oldest member, used for leader succession.
    pub members: Vec<i32>,
    pub small_ziotite: i32,
    pub large_ziotite: i8,
}

impl Team {
    fn new(id: i32, leader_cid: i32, category: TeamCategory, kind: u8) -> Self {
        Team {
            id,
            leader_cid,
            category,
            kind,
            members: vec![leader_cid],
            small_ziotite: 0,
            large_ziotite: 0,
        }
    }

    fn small_ziotite_cap(&self) -> i32 {
        SMALL_ZIOTITE_PER_MEMBER_CAP * self.members.len() as i32
    }
}

struct Inner {
    teams: HashMap<i32, Team>,
    member_team: HashMap<i32, i32>,
    next_id: i32,
}

/// Transient team registry (C10 Team).
pub struct TeamRegistry {
    inner: Mutex<Inner>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        TeamRegistry {
            inner: Mutex::new(Inner {
                teams: HashMap::new(),
                member_team: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn team_of(&self, cid: i32) -> Option<Team> {
        let inner = self.inner.lock();
        inner.member_team.get(&cid).and_then(|id| inner.teams.get(id)).cloned()
    }

    pub fn create(&self, leader_cid: i32, category: TeamCategory, kind: u8, hooks: &dyn TeamHooks) -> Result<Team> {
        let mut inner = self.inner.lock();
        if inner.member_team.contains_key(&leader_cid) {
            return Err(Error::Conflict("already on a team".into()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let team = Team::new(id, leader_cid, category, kind);
        inner.member_team.insert(leader_cid, id);
        inner.teams.insert(id, team.clone());
        drop(inner);
        hooks.leave_party(leader_cid);
        Ok(team)
    }

    /// Requires the target to not already be on a team; the caller must
    /// also ensure the target is not currently in a party (that check
    /// belongs to whichever side is driving the join, since Party and
    /// Team have no dependency on each other).
    pub fn join(&self, team_id: i32, cid: i32, hooks: &dyn TeamHooks) -> Result<Team> {
        let mut inner = self.inner.lock();
        if inner.member_team.contains_key(&cid) {
            return Err(Error::Conflict("already on a team".into()));
        }
        let team = inner.teams.get_mut(&team_id).ok_or_else(|| Error::NotFound("team does not exist".into()))?;
        if team.members.len() >= team.category.max_size() {
            return Err(Error::Capacity("team is full".into()));
        }
        team.members.push(cid);
        let snapshot = team.clone();
        inner.member_team.insert(cid, team_id);
        drop(inner);
        hooks.leave_party(cid);
        Ok(snapshot)
    }

    /// Leaving as leader with remaining members promotes the next-to-join.
    /// Returns `None` if the team is disbanded (no members left).
    pub fn leave(&self, cid: i32) -> Result<Option<Team>> {
        let mut inner = self.inner.lock();
        let team_id = inner.member_team.remove(&cid).ok_or_else(|| Error::State("not on a team".into()))?;
        let team = inner.teams.get_mut(&team_id).expect("team index consistent");
        team.members.retain(|&m| m != cid);

        if team.members.is_empty() {
            inner.teams.remove(&team_id);
            return Ok(None);
        }
        if team.leader_cid == cid {
            team.leader_cid = team.members[0];
        }
        Ok(Some(team.clone()))
    }

    /// Disbanding a Cathedral team may transition the remaining members
    /// into a fresh Diaspora team in the same call.
    pub fn disband(&self, requester_cid: i32, transition_to_diaspora: bool) -> Result<Option<Team>> {
        let mut inner = self.inner.lock();
        let team_id = *inner.member_team.get(&requester_cid).ok_or_else(|| Error::State("not on a team".into()))?;
        let team = inner.teams.get(&team_id).expect("team index consistent").clone();
        if team.leader_cid != requester_cid {
            return Err(Error::State("only the leader may disband".into()));
        }
        for cid in &team.members {
            inner.member_team.remove(cid);
        }
        inner.teams.remove(&team_id);

        if transition_to_diaspora && team.category == TeamCategory::Cathedral {
            let id = inner.next_id;
            inner.next_id += 1;
            let mut diaspora = Team::new(id, team.leader_cid, TeamCategory::Diaspora, team.kind);
            diaspora.members = team.members.clone();
            for cid in &diaspora.members {
                inner.member_team.insert(*cid, id);
            }
            inner.teams.insert(id, diaspora.clone());
            return Ok(Some(diaspora));
        }
        Ok(None)
    }

    pub fn adjust_small_ziotite(&self, team_id: i32, delta: i32) -> Result<Team> {
        let mut inner = self.inner.lock();
        let team = inner.teams.get_mut(&team_id).ok_or_else(|| Error::NotFound("team does not exist".into()))?;
        let cap = team.small_ziotite_cap();
        team.small_ziotite = (team.small_ziotite + delta).clamp(0, cap);
        Ok(team.clone())
    }

    pub fn adjust_large_ziotite(&self, team_id: i32, delta: i8) -> Result<Team> {
        let mut inner = self.inner.lock();
        let team = inner.teams.get_mut(&team_id).ok_or_else(|| Error::NotFound("team does not exist".into()))?;
        team.large_ziotite = (team.large_ziotite + delta).clamp(0, LARGE_ZIOTITE_CAP);
        Ok(team.clone())
    }
}

impl Default for TeamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHooks;
    impl TeamHooks for NoopHooks {
        fn leave_party(&self, _cid: i32) {}
    }

    #[test]
    fn leader_succession_on_leave() {
        let teams = TeamRegistry::new();
        let hooks = NoopHooks;
        let team = teams.create(1, TeamCategory::Pvp, 0, &hooks).unwrap();
        teams.join(team.id, 2, &hooks).unwrap();
        teams.join(team.id, 3, &hooks).unwrap();

        let remaining = teams.leave(1).unwrap().unwrap();
        assert_eq!(remaining.leader_cid, 2);
        assert_eq!(remaining.members, vec![2, 3]);
    }

    #[test]
    fn last_member_leaving_disbands() {
        let teams = TeamRegistry::new();
        let hooks = NoopHooks;
        let team = teams.create(1, TeamCategory::Pvp, 0, &hooks).unwrap();
        assert!(teams.leave(1).unwrap().is_none());
        assert!(teams.team_of(1).is_none());
        let _ = team;
    }

    #[test]
    fn ziotite_clamps_to_caps() {
        let teams = TeamRegistry::new();
        let hooks = NoopHooks;
        let team = teams.create(1, TeamCategory::Pvp, 0, &hooks).unwrap();
        let updated = teams.adjust_small_ziotite(team.id, 999_999).unwrap();
        assert_eq!(updated.small_ziotite, SMALL_ZIOTITE_PER_MEMBER_CAP);
        let updated = teams.adjust_large_ziotite(team.id, 100).unwrap();
        assert_eq!(updated.large_ziotite, LARGE_ZIOTITE_CAP);
        let updated = teams.adjust_small_ziotite(team.id, -999_999).unwrap();
        assert_eq!(updated.small_ziotite, 0);
    }

    #[test]
    fn cathedral_disband_can_transition_to_diaspora() {
        let teams = TeamRegistry::new();
        let hooks = NoopHooks;
        let team = teams.create(1, TeamCategory::Cathedral, 0, &hooks).unwrap();
        teams.join(team.id, 2, &hooks).unwrap();
        let transitioned = teams.disband(1, true).unwrap().unwrap();
        assert_eq!(transitioned.category, TeamCategory::Diaspora);
        assert_eq!(transitioned.members, vec![1, 2]);
    }
}
