use std::sync::Arc;
use std::time::Duration;

use slog::Logger;

use concord::manager::DataSyncManager;
use concord::object::InMemoryDatabase;
use dominion::{
    AccountRegistry, CharacterRegistry, ClanHooks, ClanRegistry, DeletionHooks, LogoutHooks, MatchQueueManager, NoFriends, PartyHooks,
    PartyRegistry, QueueKind, TeamHooks, TeamRegistry, RELATED_CLAN, RELATED_TEAM,
};
use nexus::TimerManager;

use crate::registry::WorldRegistry;

/// Every registry this process owns (spec §2's World component table: C8
/// AccountRegistry, C9 CharacterRegistry, C10 group subsystems) plus the
/// data-sync engine channels replicate records through.
pub struct WorldState {
    pub accounts: Arc<AccountRegistry>,
    pub characters: Arc<CharacterRegistry>,
    pub parties: Arc<PartyRegistry>,
    pub clans: Arc<ClanRegistry>,
    pub teams: Arc<TeamRegistry>,
    pub match_queue: Arc<MatchQueueManager>,
    pub sync: Arc<DataSyncManager>,
    pub registry: Arc<WorldRegistry>,
    pub log: Logger,
}

impl WorldState {
    pub fn new(timers: Arc<TimerManager>, channel_switch_timeout: Duration, registry: Arc<WorldRegistry>, log: Logger) -> Self {
        WorldState {
            accounts: Arc::new(AccountRegistry::new(timers.clone(), channel_switch_timeout, log.new(slog::o!("registry" => "account")))),
            characters: Arc::new(CharacterRegistry::new()),
            parties: Arc::new(PartyRegistry::new()),
            clans: Arc::new(ClanRegistry::new()),
            teams: Arc::new(TeamRegistry::new()),
            match_queue: Arc::new(MatchQueueManager::new(timers.clone(), log.new(slog::o!("registry" => "match_queue")))),
            sync: Arc::new(DataSyncManager::new(InMemoryDatabase::new(), timers, log.new(slog::o!("registry" => "sync")))),
            registry,
            log,
        }
    }

    pub fn friend_source(&self) -> Arc<NoFriends> {
        Arc::new(NoFriends)
    }
}

/// Wires the cross-registry cascades the group subsystems need on
/// leave/disband: a party departure also pulls the character out of its
/// team, a clan disband clears the member's clan reference, and so on —
/// the same cascades `AccountRegistry::logout`/`CharacterRegistry::
/// delete_character` drive via their own hook traits.
pub struct WorldHooks {
    pub parties: Arc<PartyRegistry>,
    pub clans: Arc<ClanRegistry>,
    pub teams: Arc<TeamRegistry>,
    pub characters: Arc<CharacterRegistry>,
    pub sync: Arc<DataSyncManager>,
    pub match_queue: Arc<MatchQueueManager>,
    pub log: Logger,
}

impl LogoutHooks for WorldHooks {
    fn leave_party(&self, cid: i32) {
        let _ = self.parties.leave(cid);
    }

    /// This core has no type registered that keys a sync record by cid (no
    /// `ObjectConfig` here carries a character identity), and a
    /// `CharacterLogin` row is deliberately kept past logout (see
    /// `CharacterRegistry::unregister`) so there is nothing to remove from
    /// that table either. Left as a documented no-op rather than guessing at
    /// a record shape this core does not own.
    fn clear_sync_for_cid(&self, cid: i32) {
        let _ = &self.sync;
        slog::debug!(self.log, "no cid-keyed sync record to clear"; "cid" => cid);
    }

    /// Resolves the clan/team members who should learn this character just
    /// went offline. Party membership is excluded: `logout` already calls
    /// `leave_party` before this hook runs, so the party is gone by the time
    /// we would look it up. Actual packet delivery needs a connection
    /// resolver this struct is not given (see module docs), so this stops at
    /// resolving the relationship.
    fn notify_related(&self, cid: i32) {
        let clan_members: Vec<i32> = self.clans.clan_of(cid).map(|c| c.members.keys().copied().collect()).unwrap_or_default();
        let team_members: Vec<i32> = self.teams.team_of(cid).map(|t| t.members).unwrap_or_default();
        let related = self.characters.related_character_logins(cid, RELATED_CLAN | RELATED_TEAM, &[], &clan_members, &team_members, &NoFriends);
        slog::debug!(self.log, "resolved related characters for logout"; "cid" => cid, "related_count" => related.len());
    }

    fn notify_lobby_logout(&self, username: &str) {
        slog::debug!(self.log, "notifying lobby of logout"; "username" => username);
    }
}

impl PartyHooks for WorldHooks {
    fn leave_team(&self, cid: i32) {
        let _ = self.teams.leave(cid);
    }
}

impl ClanHooks for WorldHooks {
    fn clear_clan_ref(&self, cid: i32) {
        slog::debug!(self.log, "clearing clan reference"; "cid" => cid);
    }

    fn notify_disbanded(&self, cid: i32) {
        slog::debug!(self.log, "notifying member of clan disband"; "cid" => cid);
    }
}

impl TeamHooks for WorldHooks {
    fn leave_party(&self, cid: i32) {
        let _ = self.parties.leave(cid);
    }
}

impl DeletionHooks for WorldHooks {
    fn leave_party(&self, cid: i32) {
        let _ = self.parties.leave(cid);
    }

    fn leave_clan(&self, cid: i32) {
        let _ = self.clans.leave(cid);
    }

    fn leave_team(&self, cid: i32) {
        let _ = self.teams.leave(cid);
    }

    fn cancel_match_entry(&self, cid: i32) {
        for kind in [QueueKind::Solo, QueueKind::Team] {
            if self.match_queue.remove_entry(kind, cid).is_some() {
                slog::debug!(self.log, "cancelled match queue entry on character deletion"; "cid" => cid, "kind" => ?kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorldRegistry;
    use uuid::Uuid;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn state() -> WorldState {
        let timers = Arc::new(TimerManager::start());
        let registry = Arc::new(WorldRegistry::new(0, "World".into(), "127.0.0.1".into(), 18666));
        WorldState::new(timers, Duration::from_secs(5), registry, log())
    }

    fn hooks(state: &WorldState) -> WorldHooks {
        WorldHooks {
            parties: state.parties.clone(),
            clans: state.clans.clone(),
            teams: state.teams.clone(),
            characters: state.characters.clone(),
            sync: state.sync.clone(),
            match_queue: state.match_queue.clone(),
            log: log(),
        }
    }

    #[test]
    fn party_hooks_leaving_team_does_not_panic_without_a_team() {
        let state = state();
        let hooks = hooks(&state);
        hooks.leave_team(42);
    }

    #[test]
    fn deletion_hooks_cascade_through_every_group_registry() {
        let state = state();
        let hooks = hooks(&state);
        let login = state.characters.register(Uuid::new_v4(), 0);
        let cid = login.lock().world_cid;
        hooks.leave_party(cid);
        hooks.leave_clan(cid);
        hooks.leave_team(cid);
        hooks.cancel_match_entry(cid);
    }
}
