use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use wire::{Error, Result};

/// Members per clan. Named after the source constant even though it reads
/// like a clan-count cap.
pub const MAX_CLAN_COUNT: usize = 30;

/// Cumulative login-points required to reach each level above 1, indexed
/// from level 2.
const LEVEL_THRESHOLDS: [u32; 9] = [100, 300, 700, 1_500, 3_000, 6_000, 12_000, 24_000, 48_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClanMemberType {
    Master,
    SubMaster,
    Normal,
}

#[derive(Debug, Clone)]
pub struct ClanMember {
    pub cid: i32,
    pub member_type: ClanMemberType,
    pub login_points: u32,
}

#[derive(Debug, Clone)]
pub struct ClanInfo {
    pub id: i32,
    pub clan_ref: Uuid,
    pub name: String,
    pub base_zone: u32,
    pub level: u8,
    /// Insertion order doubles as join order, needed for master succession.
    pub members: IndexMap<i32, ClanMember>,
}

impl ClanInfo {
    fn recompute_level(&mut self) {
        let total: u32 = self.members.values().map(|m| m.login_points).sum();
        let mut level = 1u8;
        for (i, threshold) in LEVEL_THRESHOLDS.iter().enumerate() {
            if total >= *threshold {
                level = (i + 2) as u8;
            }
        }
        self.level = level;
    }
}

/// Side effect of disband: null the clan reference on each affected
/// character and notify those still online.
pub trait ClanHooks {
    fn clear_clan_ref(&self, cid: i32);
    fn notify_disbanded(&self, cid: i32);
}

struct Inner {
    clans: HashMap<i32, ClanInfo>,
    names: HashMap<String, i32>,
    member_clan: HashMap<i32, i32>,
    pending_invites: HashMap<i32, i32>,
    next_id: i32,
}

/// Persistent clan membership registry (C10 Clan).
pub struct ClanRegistry {
    inner: Mutex<Inner>,
}

impl ClanRegistry {
    pub fn new() -> Self {
        ClanRegistry {
            inner: Mutex::new(Inner {
                clans: HashMap::new(),
                names: HashMap::new(),
                member_clan: HashMap::new(),
                pending_invites: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn clan_of(&self, cid: i32) -> Option<ClanInfo> {
        let inner = self.inner.lock();
        inner.member_clan.get(&cid).and_then(|id| inner.clans.get(id)).cloned()
    }

    pub fn create(&self, founder_cid: i32, clan_ref: Uuid, name: &str, base_zone: u32) -> Result<ClanInfo> {
        let mut inner = self.inner.lock();
        if inner.names.contains_key(name) {
            return Err(Error::Conflict(format!("clan name '{name}' is taken")));
        }
        if inner.member_clan.contains_key(&founder_cid) {
            return Err(Error::Conflict("already in a clan".into()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let mut members = IndexMap::new();
        members.insert(
            founder_cid,
            ClanMember {
                cid: founder_cid,
                member_type: ClanMemberType::Master,
                login_points: 0,
            },
        );
        let clan = ClanInfo {
            id,
            clan_ref,
            name: name.to_string(),
            base_zone,
            level: 1,
            members,
        };
        inner.names.insert(name.to_string(), id);
        inner.member_clan.insert(founder_cid, id);
        inner.clans.insert(id, clan.clone());
        Ok(clan)
    }

    pub fn invite(&self, invitee_cid: i32, clan_id: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.member_clan.contains_key(&invitee_cid) {
            return Err(Error::Conflict("target is already in a clan".into()));
        }
        let clan = inner.clans.get(&clan_id).ok_or_else(|| Error::NotFound("clan does not exist".into()))?;
        if clan.members.len() >= MAX_CLAN_COUNT {
            return Err(Error::Capacity("clan is full".into()));
        }
        inner.pending_invites.insert(invitee_cid, clan_id);
        Ok(())
    }

    pub fn cancel_invite(&self, invitee_cid: i32) {
        self.inner.lock().pending_invites.remove(&invitee_cid);
    }

    pub fn accept(&self, invitee_cid: i32) -> Result<ClanInfo> {
        let mut inner = self.inner.lock();
        let clan_id = inner
            .pending_invites
            .remove(&invitee_cid)
            .ok_or_else(|| Error::NotFound("no pending clan invite".into()))?;
        if inner.member_clan.contains_key(&invitee_cid) {
            return Err(Error::Conflict("already in a clan".into()));
        }
        let clan = inner.clans.get_mut(&clan_id).ok_or_else(|| Error::NotFound("clan no longer exists".into()))?;
        if clan.members.len() >= MAX_CLAN_COUNT {
            return Err(Error::Capacity("clan is full".into()));
        }
        clan.members.insert(
            invitee_cid,
            ClanMember {
                cid: invitee_cid,
                member_type: ClanMemberType::Normal,
                login_points: 0,
            },
        );
        clan.recompute_level();
        let snapshot = clan.clone();
        inner.member_clan.insert(invitee_cid, clan_id);
        Ok(snapshot)
    }

    pub fn kick(&self, requester_cid: i32, target_cid: i32) -> Result<ClanInfo> {
        let mut inner = self.inner.lock();
        let clan_id = *inner.member_clan.get(&requester_cid).ok_or_else(|| Error::State("not in a clan".into()))?;
        let clan = inner.clans.get_mut(&clan_id).expect("clan index consistent");
        let requester_type = clan.members.get(&requester_cid).map(|m| m.member_type);
        if !matches!(requester_type, Some(ClanMemberType::Master) | Some(ClanMemberType::SubMaster)) {
            return Err(Error::State("requires MASTER or SUB_MASTER".into()));
        }
        let target_type = clan.members.get(&target_cid).map(|m| m.member_type);
        if target_type.is_none() {
            return Err(Error::NotFound("target is not in this clan".into()));
        }
        if target_type == Some(ClanMemberType::Master) {
            return Err(Error::State("the MASTER cannot be kicked".into()));
        }
        clan.members.shift_remove(&target_cid);
        clan.recompute_level();
        let snapshot = clan.clone();
        inner.member_clan.remove(&target_cid);
        Ok(snapshot)
    }

    /// Leaving as MASTER promotes the first SUB_MASTER, or failing that the
    /// first normal member, to MASTER.
    pub fn leave(&self, cid: i32) -> Result<ClanInfo> {
        let mut inner = self.inner.lock();
        let clan_id = inner.member_clan.remove(&cid).ok_or_else(|| Error::State("not in a clan".into()))?;
        let clan = inner.clans.get_mut(&clan_id).expect("clan index consistent");
        let was_master = clan.members.get(&cid).map(|m| m.member_type) == Some(ClanMemberType::Master);
        clan.members.shift_remove(&cid);

        if was_master {
            let successor = clan
                .members
                .values()
                .find(|m| m.member_type == ClanMemberType::SubMaster)
                .or_else(|| clan.members.values().next())
                .map(|m| m.cid);
            if let Some(successor_cid) = successor {
                clan.members.get_mut(&successor_cid).unwrap().member_type = ClanMemberType::Master;
            }
        }
        clan.recompute_level();
        Ok(clan.clone())
    }

    /// Transactional disband: deletes the member rows and the clan row,
    /// and reports which cids to null and notify. Rollback on a database
    /// failure is the caller's responsibility; this call itself cannot
    /// partially fail.
    pub fn disband(&self, requester_cid: i32, hooks: &dyn ClanHooks) -> Result<Vec<i32>> {
        let mut inner = self.inner.lock();
        let clan_id = *inner.member_clan.get(&requester_cid).ok_or_else(|| Error::State("not in a clan".into()))?;
        let clan = inner.clans.get(&clan_id).expect("clan index consistent");
        if clan.members.get(&requester_cid).map(|m| m.member_type) != Some(ClanMemberType::Master) {
            return Err(Error::State("only the MASTER may disband".into()));
        }
        let members: Vec<i32> = clan.members.keys().copied().collect();
        let clan_name = clan.name.clone();
        for cid in &members {
            inner.member_clan.remove(cid);
        }
        inner.names.remove(&clan_name);
        inner.clans.remove(&clan_id);
        drop(inner);

        for cid in &members {
            hooks.clear_clan_ref(*cid);
            hooks.notify_disbanded(*cid);
        }
        Ok(members)
    }

    pub fn add_login_points(&self, cid: i32, points: u32) -> Result<ClanInfo> {
        let mut inner = self.inner.lock();
        let clan_id = *inner.member_clan.get(&cid).ok_or_else(|| Error::State("not in a clan".into()))?;
        let clan = inner.clans.get_mut(&clan_id).expect("clan index consistent");
        if let Some(member) = clan.members.get_mut(&cid) {
            member.login_points += points;
        }
        clan.recompute_level();
        Ok(clan.clone())
    }
}

impl Default for ClanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHooks;
    impl ClanHooks for NoopHooks {
        fn clear_clan_ref(&self, _cid: i32) {}
        fn notify_disbanded(&self, _cid: i32) {}
    }

    #[test]
    fn disband_transaction_nulls_every_member() {
        let clans = ClanRegistry::new();
        let clan = clans.create(1, Uuid::new_v4(), "Shadow", 100).unwrap();
        clans.invite(2, clan.id).unwrap();
        clans.accept(2).unwrap();
        clans.invite(3, clan.id).unwrap();
        clans.accept(3).unwrap();
        clans.kick(1, 1).unwrap_err(); // master can't kick itself via kick path either way, sanity

        let hooks = NoopHooks;
        let members = clans.disband(1, &hooks).unwrap();
        assert_eq!(members.len(), 3);
        assert!(clans.clan_of(1).is_none());
        assert!(clans.clan_of(2).is_none());
        assert!(clans.clan_of(3).is_none());
    }

    #[test]
    fn master_leaving_promotes_submaster_then_normal() {
        let clans = ClanRegistry::new();
        let clan = clans.create(1, Uuid::new_v4(), "Wolves", 1).unwrap();
        clans.invite(2, clan.id).unwrap();
        clans.accept(2).unwrap();

        let updated = clans.leave(1).unwrap();
        assert_eq!(updated.members.get(&2).unwrap().member_type, ClanMemberType::Master);
    }

    #[test]
    fn master_cannot_be_kicked() {
        let clans = ClanRegistry::new();
        let clan = clans.create(1, Uuid::new_v4(), "Foxes", 1).unwrap();
        clans.invite(2, clan.id).unwrap();
        clans.accept(2).unwrap();
        assert!(clans.kick(2, 1).is_err());
    }

    #[test]
    fn duplicate_name_rejected() {
        let clans = ClanRegistry::new();
        clans.create(1, Uuid::new_v4(), "Crows", 1).unwrap();
        assert!(matches!(clans.create(2, Uuid::new_v4(), "Crows", 2), Err(Error::Conflict(_))));
    }
}
