use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use wire::packet::Packet;
use wire::Result;

pub const RELATED_FRIENDS: u8 = 1 << 0;
pub const RELATED_PARTY: u8 = 1 << 1;
pub const RELATED_CLAN: u8 = 1 << 2;
pub const RELATED_TEAM: u8 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterStatus {
    Offline,
    Online,
}

/// World-scoped character session row. `world_cid` is the only identifier
/// used in cross-server traffic for this character.
#[derive(Debug, Clone)]
pub struct CharacterLogin {
    pub character_uuid: Uuid,
    pub world_cid: i32,
    pub status: CharacterStatus,
    pub world_id: i32,
    pub channel_id: i8,
    pub zone_id: u32,
    pub party_id: u32,
    pub clan_id: i32,
    pub team_id: i32,
}

impl CharacterLogin {
    fn new(character_uuid: Uuid, world_cid: i32, world_id: i32) -> Self {
        CharacterLogin {
            character_uuid,
            world_cid,
            status: CharacterStatus::Offline,
            world_id,
            channel_id: -1,
            zone_id: 0,
            party_id: 0,
            clan_id: -1,
            team_id: -1,
        }
    }
}

/// Supplies a character's online friends list. Friend relationships are
/// persisted game content (out of scope for the core); this trait lets
/// `related_character_logins` consult them without the registry owning
/// that storage.
pub trait FriendSource {
    fn friends_of(&self, world_cid: i32) -> Vec<i32>;
}

pub struct NoFriends;
impl FriendSource for NoFriends {
    fn friends_of(&self, _world_cid: i32) -> Vec<i32> {
        Vec::new()
    }
}

/// Side effects of deleting a character outright (never a logout): purge
/// from any group membership and cancel pending match entries.
pub trait DeletionHooks {
    fn leave_party(&self, cid: i32);
    fn leave_clan(&self, cid: i32);
    fn leave_team(&self, cid: i32);
    fn cancel_match_entry(&self, cid: i32);
}

struct Inner {
    by_uuid: HashMap<Uuid, Arc<Mutex<CharacterLogin>>>,
    by_cid: HashMap<i32, Arc<Mutex<CharacterLogin>>>,
    next_cid: i32,
}

/// World-CID allocation, character login cache, and relationship fan-out
/// (C9). Two maps over the same shared rows plus the cid counter are
/// guarded by one mutex.
pub struct CharacterRegistry {
    inner: Mutex<Inner>,
}

impl CharacterRegistry {
    pub fn new() -> Self {
        CharacterRegistry {
            inner: Mutex::new(Inner {
                by_uuid: HashMap::new(),
                by_cid: HashMap::new(),
                next_cid: 1,
            }),
        }
    }

    /// Returns the existing row if this character has already registered
    /// this process's lifetime, otherwise allocates the next world-cid.
    pub fn register(&self, character_uuid: Uuid, world_id: i32) -> Arc<Mutex<CharacterLogin>> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.by_uuid.get(&character_uuid) {
            return existing.clone();
        }
        let cid = inner.next_cid;
        inner.next_cid += 1;
        let login = Arc::new(Mutex::new(CharacterLogin::new(character_uuid, cid, world_id)));
        inner.by_uuid.insert(character_uuid, login.clone());
        inner.by_cid.insert(cid, login.clone());
        login
    }

    pub fn get_by_uuid(&self, character_uuid: Uuid) -> Option<Arc<Mutex<CharacterLogin>>> {
        self.inner.lock().by_uuid.get(&character_uuid).cloned()
    }

    pub fn get_by_cid(&self, world_cid: i32) -> Option<Arc<Mutex<CharacterLogin>>> {
        self.inner.lock().by_cid.get(&world_cid).cloned()
    }

    /// Removes the row only on character deletion, never logout.
    pub fn unregister(&self, world_cid: i32) -> Option<Arc<Mutex<CharacterLogin>>> {
        let mut inner = self.inner.lock();
        let login = inner.by_cid.remove(&world_cid)?;
        let uuid = login.lock().character_uuid;
        inner.by_uuid.remove(&uuid);
        Some(login)
    }

    /// Deletion beyond bookkeeping removal: purges the character from any
    /// party/clan/team and cancels pending match entries, per the
    /// supplemental operations recovered from the original source.
    pub fn delete_character(&self, world_cid: i32, hooks: &dyn DeletionHooks) {
        hooks.leave_party(world_cid);
        hooks.leave_clan(world_cid);
        hooks.leave_team(world_cid);
        hooks.cancel_match_entry(world_cid);
        self.unregister(world_cid);
    }

    /// Given a bitmask over {FRIENDS, PARTY, CLAN, TEAM}, returns the
    /// unique union of related login rows, excluding the source.
    pub fn related_character_logins(
        &self,
        source_cid: i32,
        mask: u8,
        party_members: &[i32],
        clan_members: &[i32],
        team_members: &[i32],
        friends: &dyn FriendSource,
    ) -> Vec<Arc<Mutex<CharacterLogin>>> {
        let mut seen = hashbrown::HashSet::new();
        let mut out = Vec::new();
        let inner = self.inner.lock();

        let mut push = |cid: i32, seen: &mut hashbrown::HashSet<i32>, out: &mut Vec<Arc<Mutex<CharacterLogin>>>| {
            if cid == source_cid || !seen.insert(cid) {
                return;
            }
            if let Some(login) = inner.by_cid.get(&cid) {
                out.push(login.clone());
            }
        };

        if mask & RELATED_FRIENDS != 0 {
            for cid in friends.friends_of(source_cid) {
                push(cid, &mut seen, &mut out);
            }
        }
        if mask & RELATED_PARTY != 0 {
            for &cid in party_members {
                push(cid, &mut seen, &mut out);
            }
        }
        if mask & RELATED_CLAN != 0 {
            for &cid in clan_members {
                push(cid, &mut seen, &mut out);
            }
        }
        if mask & RELATED_TEAM != 0 {
            for &cid in team_members {
                push(cid, &mut seen, &mut out);
            }
        }
        out
    }

    /// Fan-out primitive used by every broadcast: groups targets by
    /// channel, rewrites `payload` with a `u16` count plus the target
    /// world-cids inserted at `cid_offset`, and invokes `send` once per
    /// destination channel.
    #[allow(clippy::too_many_arguments)]
    pub fn send_to_related(
        &self,
        payload: &[u8],
        cid_offset: usize,
        targets: &[Arc<Mutex<CharacterLogin>>],
        zone_restrict: Option<u32>,
        mut send: impl FnMut(i8, Vec<u8>),
    ) -> Result<()> {
        let mut by_channel: HashMap<i8, Vec<i32>> = HashMap::new();
        for target in targets {
            let t = target.lock();
            if t.channel_id < 0 {
                continue;
            }
            if let Some(zone) = zone_restrict {
                if t.zone_id != zone {
                    continue;
                }
            }
            by_channel.entry(t.channel_id).or_default().push(t.world_cid);
        }

        for (channel_id, cids) in by_channel {
            let mut cid_block = Packet::new();
            cid_block.write_u16_le(cids.len() as u16)?;
            for cid in &cids {
                cid_block.write_i32_le(*cid)?;
            }
            let mut out = Vec::with_capacity(payload.len() + cid_block.size());
            out.extend_from_slice(&payload[..cid_offset.min(payload.len())]);
            out.extend_from_slice(cid_block.as_slice());
            out.extend_from_slice(&payload[cid_offset.min(payload.len())..]);
            send(channel_id, out);
        }
        Ok(())
    }
}

impl Default for CharacterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_by_uuid() {
        let registry = CharacterRegistry::new();
        let uuid = Uuid::new_v4();
        let a = registry.register(uuid, 1);
        let b = registry.register(uuid, 1);
        assert_eq!(a.lock().world_cid, b.lock().world_cid);
    }

    #[test]
    fn cids_allocate_sequentially_from_one() {
        let registry = CharacterRegistry::new();
        let first = registry.register(Uuid::new_v4(), 1);
        let second = registry.register(Uuid::new_v4(), 1);
        assert_eq!(first.lock().world_cid, 1);
        assert_eq!(second.lock().world_cid, 2);
    }

    #[test]
    fn send_to_related_groups_by_channel() {
        let registry = CharacterRegistry::new();
        let a = registry.register(Uuid::new_v4(), 1);
        a.lock().channel_id = 1;
        let b = registry.register(Uuid::new_v4(), 1);
        b.lock().channel_id = 2;

        let mut sent = Vec::new();
        registry
            .send_to_related(b"\x00\x00hello", 2, &[a.clone(), b.clone()], None, |ch, bytes| {
                sent.push((ch, bytes));
            })
            .unwrap();
        assert_eq!(sent.len(), 2);
    }
}
