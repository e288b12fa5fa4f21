use std::sync::Arc;

use slog::Logger;
use uuid::Uuid;

use dominion::CharacterStatus;
use nexus::{Connection, ConnectionId, PacketContext, PacketParser, Reactor};
use wire::codes::{self, character_login_flag, Action};
use wire::packet::Packet;
use wire::Result;

use concord::relay::{RelayEnvelope, RelayTarget};

use crate::registry::{RegisteredChannel, WorldRegistry};
use crate::state::WorldState;

pub struct WorldContext {
    pub reactor: Arc<Reactor>,
    pub log: Logger,
}

impl PacketContext for WorldContext {
    fn connection(&self, id: ConnectionId) -> Option<Arc<std::sync::Mutex<Connection>>> {
        self.reactor.connection(id)
    }

    fn log(&self) -> &Logger {
        &self.log
    }
}

fn reply_with(ctx: &mut dyn PacketContext, connection: ConnectionId, packet: Packet) {
    if let Some(conn) = ctx.connection(connection) {
        conn.lock().unwrap().queue_packet(packet.into_bytes());
    }
}

/// A channel announces itself (spec §5.11's `RegisteredChannel`) and joins
/// the data-sync topology for the record types it is allowed to mirror.
pub struct SetChannelInfoParser {
    pub registry: Arc<WorldRegistry>,
    pub state: Arc<WorldState>,
}

impl PacketParser for SetChannelInfoParser {
    fn parse(&self, ctx: &mut dyn PacketContext, connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let channel = RegisteredChannel {
            id: packet.read_u8()? as i8,
            name: packet.read_string16()?,
            host: packet.read_string16()?,
            port: packet.read_u16_le()?,
        };
        slog::info!(ctx.log(), "channel registered"; "channel" => &channel.name, "connection" => connection);
        self.registry.register_channel(channel);
        self.state.sync.register_connection(connection, ["CharacterLogin".to_string()]);
        Ok(())
    }
}

/// Replies with this world's own descriptor, used by a channel (or a
/// reconnecting lobby) to confirm which world it reached.
pub struct GetWorldInfoParser {
    pub registry: Arc<WorldRegistry>,
}

impl PacketParser for GetWorldInfoParser {
    fn parse(&self, ctx: &mut dyn PacketContext, connection: ConnectionId, _packet: &mut Packet) -> Result<()> {
        let description = self.registry.describe();
        let mut reply = Packet::new();
        reply.write_u16_le(codes::PACKET_GET_WORLD_INFO)?;
        reply.write_u8(description.id as u8)?;
        reply.write_string16(&description.name)?;
        reply.write_string16(&description.host)?;
        reply.write_u16_le(description.port)?;
        reply.write_u16_le(description.channels.len() as u16)?;
        for channel in &description.channels {
            reply.write_u8(channel.id as u8)?;
            reply.write_string16(&channel.name)?;
            reply.write_string16(&channel.host)?;
            reply.write_u16_le(channel.port)?;
        }
        reply_with(ctx, connection, reply);
        Ok(())
    }
}

/// Raw `DataSyncManager::sync_incoming` entry point: the packet body past
/// the command code is the sync engine's own wire format.
pub struct DataSyncParser {
    pub state: Arc<WorldState>,
}

impl PacketParser for DataSyncParser {
    fn parse(&self, _ctx: &mut dyn PacketContext, connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        self.state.sync.sync_incoming(packet, Some(connection))
    }
}

/// Channel login/status updates (spec §6's `character_login_flag` bitmask).
/// Only the three BASIC fields (status/zone/channel) are carried; message,
/// friend and party-icon fields are client-protocol concerns out of scope
/// here.
pub struct CharacterLoginParser {
    pub state: Arc<WorldState>,
}

impl PacketParser for CharacterLoginParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let world_cid = packet.read_i32_le()?;
        let flags = packet.read_u8()?;
        let Some(login) = self.state.characters.get_by_cid(world_cid) else {
            slog::debug!(ctx.log(), "character login update for unregistered cid"; "cid" => world_cid);
            return Ok(());
        };
        let mut login = login.lock();
        if flags & character_login_flag::STATUS != 0 {
            login.status = if packet.read_u8()? != 0 { CharacterStatus::Online } else { CharacterStatus::Offline };
        }
        if flags & character_login_flag::ZONE != 0 {
            login.zone_id = packet.read_u32_le()?;
        }
        if flags & character_login_flag::CHANNEL != 0 {
            login.channel_id = packet.read_u8()? as i8;
        }
        Ok(())
    }
}

/// Starts or ends a web-game session on behalf of an account (spec §5.11).
/// Payload: username, then `1` to start with a world-cid, `0` to end.
pub struct WebGameParser {
    pub state: Arc<WorldState>,
}

impl PacketParser for WebGameParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let username = packet.read_string16()?;
        if packet.read_u8()? == 1 {
            let world_cid = packet.read_i32_le()?;
            if let Err(e) = self.state.accounts.start_web_game_session(&username, world_cid) {
                slog::warn!(ctx.log(), "failed to start web game session"; "username" => &username, "error" => %e);
            }
        } else {
            self.state.accounts.end_web_game_session(&username);
        }
        Ok(())
    }
}

/// Decodes a relay envelope and fans it out to the character(s) it
/// addresses. Only `Cids` targeting (the shape channel-to-channel
/// forwarding actually uses) is resolved to a live send; the remaining
/// modes are accepted but left for a future channel-routing layer since
/// they need persistent account/clan/team lookups this core does not own.
/// `Cids` targets that resolve to no live character bounce a `Failure`
/// relay back to the sender, naming each one by its world-cid — this core
/// has no character display-name registry (persistent game content is out
/// of scope), so the cid stands in for the name the original protocol
/// would have carried.
pub struct RelayParser {
    pub state: Arc<WorldState>,
}

impl PacketParser for RelayParser {
    fn parse(&self, ctx: &mut dyn PacketContext, connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let bytes = packet.read_bytes(packet.remaining())?;
        let envelope = RelayEnvelope::decode(bytes)?;
        match &envelope.target {
            RelayTarget::Cids(cids) => {
                let mut targets = Vec::new();
                let mut unreachable = Vec::new();
                for cid in cids {
                    match self.state.characters.get_by_cid(*cid) {
                        Some(login) => targets.push(login),
                        None => unreachable.push(*cid),
                    }
                }

                if !targets.is_empty() {
                    let mut out = Packet::new();
                    out.write_u16_le(codes::PACKET_RELAY)?;
                    out.write_i32_le(envelope.source_world_cid)?;
                    let cid_offset = out.size();
                    out.write_bytes(&envelope.original_packet)?;
                    self.state.characters.send_to_related(out.as_slice(), cid_offset, &targets, None, |channel_id, payload| {
                        slog::debug!(ctx.log(), "relaying to channel"; "channel" => channel_id, "bytes" => payload.len());
                    })?;
                }

                if !unreachable.is_empty() {
                    slog::debug!(ctx.log(), "relay target(s) not online"; "cids" => unreachable.len());
                    let bounce = RelayEnvelope {
                        source_world_cid: envelope.source_world_cid,
                        target: RelayTarget::Names(unreachable.iter().map(i32::to_string).collect()),
                        original_packet: envelope.original_packet.clone(),
                    };
                    let mut out = Packet::new();
                    out.write_u16_le(codes::PACKET_RELAY)?;
                    out.write_bytes(&bounce.encode()?)?;
                    if let Some(conn) = ctx.connection(connection) {
                        conn.lock().unwrap().queue_packet(out.into_bytes());
                    }
                }
            }
            other => {
                slog::debug!(ctx.log(), "relay mode not yet routed"; "mode" => ?envelope.mode(), "target" => ?other);
            }
        }
        Ok(())
    }
}

/// Party/clan/team request handling shares one action vocabulary
/// (`wire::codes::Action`) across the three `PACKET_*_UPDATE` codes; each
/// parser below only implements the subset of actions its registry
/// actually exposes as a single-call operation.
pub struct PartyUpdateParser {
    pub state: Arc<WorldState>,
    pub hooks: Arc<crate::state::WorldHooks>,
}

impl PacketParser for PartyUpdateParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let Some(action) = Action::from_u8(packet.read_u8()?) else {
            return Ok(());
        };
        match action {
            Action::Add => {
                let inviter = packet.read_i32_le()?;
                let invitee = packet.read_i32_le()?;
                if let Err(e) = self.state.parties.invite(inviter, invitee) {
                    slog::debug!(ctx.log(), "party invite rejected"; "error" => %e);
                }
            }
            Action::ResponseYes => {
                let invitee = packet.read_i32_le()?;
                if let Err(e) = self.state.parties.accept(invitee, self.hooks.as_ref()) {
                    slog::debug!(ctx.log(), "party accept rejected"; "error" => %e);
                }
            }
            Action::ResponseNo => {
                let invitee = packet.read_i32_le()?;
                self.state.parties.cancel_invite(invitee);
            }
            Action::GroupLeave => {
                let cid = packet.read_i32_le()?;
                if let Err(e) = self.state.parties.leave(cid) {
                    slog::debug!(ctx.log(), "party leave rejected"; "error" => %e);
                }
            }
            Action::GroupKick => {
                let requester = packet.read_i32_le()?;
                let target = packet.read_i32_le()?;
                if let Err(e) = self.state.parties.kick(requester, target) {
                    slog::debug!(ctx.log(), "party kick rejected"; "error" => %e);
                }
            }
            Action::GroupDisband => {
                let requester = packet.read_i32_le()?;
                if let Err(e) = self.state.parties.disband(requester) {
                    slog::debug!(ctx.log(), "party disband rejected"; "error" => %e);
                }
            }
            other => {
                slog::debug!(ctx.log(), "party action not supported"; "action" => ?other);
            }
        }
        Ok(())
    }
}

pub struct ClanUpdateParser {
    pub state: Arc<WorldState>,
    pub hooks: Arc<crate::state::WorldHooks>,
}

impl PacketParser for ClanUpdateParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let Some(action) = Action::from_u8(packet.read_u8()?) else {
            return Ok(());
        };
        match action {
            Action::Add => {
                let founder = packet.read_i32_le()?;
                let name = packet.read_string16()?;
                let base_zone = packet.read_u32_le()?;
                if let Err(e) = self.state.clans.create(founder, Uuid::new_v4(), &name, base_zone) {
                    slog::debug!(ctx.log(), "clan creation rejected"; "error" => %e);
                }
            }
            Action::ResponseYes => {
                let invitee = packet.read_i32_le()?;
                if let Err(e) = self.state.clans.accept(invitee) {
                    slog::debug!(ctx.log(), "clan accept rejected"; "error" => %e);
                }
            }
            Action::GroupLeave => {
                let cid = packet.read_i32_le()?;
                if let Err(e) = self.state.clans.leave(cid) {
                    slog::debug!(ctx.log(), "clan leave rejected"; "error" => %e);
                }
            }
            Action::GroupKick => {
                let requester = packet.read_i32_le()?;
                let target = packet.read_i32_le()?;
                if let Err(e) = self.state.clans.kick(requester, target) {
                    slog::debug!(ctx.log(), "clan kick rejected"; "error" => %e);
                }
            }
            Action::GroupDisband => {
                let requester = packet.read_i32_le()?;
                if let Err(e) = self.state.clans.disband(requester, self.hooks.as_ref()) {
                    slog::debug!(ctx.log(), "clan disband rejected"; "error" => %e);
                }
            }
            other => {
                slog::debug!(ctx.log(), "clan action not supported"; "action" => ?other);
            }
        }
        Ok(())
    }
}

/// Lobby's reply to a forwarded credential check (spec.md §4.7's
/// `AccountRegistry::lobby_login`). The world-lobby link carries no
/// per-request correlation id, so the reply echoes the username the
/// request carried; a rejected login has nothing further to apply.
pub struct AccountLoginResultParser {
    pub state: Arc<WorldState>,
}

impl PacketParser for AccountLoginResultParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let username = packet.read_string16()?;
        if packet.read_u8()? != 1 {
            slog::debug!(ctx.log(), "lobby rejected account login"; "username" => &username);
            return Ok(());
        }
        let uuid_str = packet.read_string16()?;
        let channel_id = packet.read_u8()? as i8;
        let Ok(account_uuid) = Uuid::parse_str(&uuid_str) else {
            slog::warn!(ctx.log(), "lobby sent an unparseable account uuid"; "uuid" => uuid_str);
            return Ok(());
        };
        self.state.accounts.lobby_login(account_uuid, &username);
        slog::info!(ctx.log(), "account promoted to lobby state"; "username" => &username, "channel" => channel_id);
        Ok(())
    }
}

pub struct TeamUpdateParser {
    pub state: Arc<WorldState>,
}

impl PacketParser for TeamUpdateParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let Some(action) = Action::from_u8(packet.read_u8()?) else {
            return Ok(());
        };
        match action {
            Action::GroupLeave => {
                let cid = packet.read_i32_le()?;
                if let Err(e) = self.state.teams.leave(cid) {
                    slog::debug!(ctx.log(), "team leave rejected"; "error" => %e);
                }
            }
            Action::GroupDisband => {
                let requester = packet.read_i32_le()?;
                let transition_to_diaspora = packet.read_u8()? == 1;
                if let Err(e) = self.state.teams.disband(requester, transition_to_diaspora) {
                    slog::debug!(ctx.log(), "team disband rejected"; "error" => %e);
                }
            }
            other => {
                slog::debug!(ctx.log(), "team action not supported"; "action" => ?other);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorldRegistry;
    use crate::state::WorldHooks;
    use nexus::TimerManager;
    use std::time::Duration;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct NullCtx(Logger);
    impl PacketContext for NullCtx {
        fn connection(&self, _id: ConnectionId) -> Option<Arc<std::sync::Mutex<Connection>>> {
            None
        }
        fn log(&self) -> &Logger {
            &self.0
        }
    }

    fn state() -> Arc<WorldState> {
        let timers = Arc::new(TimerManager::start());
        let registry = Arc::new(WorldRegistry::new(0, "World".into(), "127.0.0.1".into(), 18666));
        Arc::new(WorldState::new(timers, Duration::from_secs(5), registry, log()))
    }

    #[test]
    fn set_channel_info_registers_channel_and_sync_connection() {
        let state = state();
        let parser = SetChannelInfoParser { registry: state.registry.clone(), state: state.clone() };
        let mut packet = Packet::new();
        packet.write_u8(1).unwrap();
        packet.write_string16("Channel01").unwrap();
        packet.write_string16("127.0.0.1").unwrap();
        packet.write_u16_le(14666).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut packet).unwrap();
        assert_eq!(state.registry.channel_ids(), vec![1]);
    }

    #[test]
    fn get_world_info_does_not_panic_without_a_live_connection() {
        let state = state();
        let parser = GetWorldInfoParser { registry: state.registry.clone() };
        let mut packet = Packet::new();
        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut packet).unwrap();
    }

    #[test]
    fn character_login_update_applies_requested_fields_only() {
        let state = state();
        let login = state.characters.register(Uuid::new_v4(), 0);
        let cid = login.lock().world_cid;

        let parser = CharacterLoginParser { state: state.clone() };
        let mut packet = Packet::new();
        packet.write_i32_le(cid).unwrap();
        packet.write_u8(character_login_flag::STATUS | character_login_flag::ZONE).unwrap();
        packet.write_u8(1).unwrap();
        packet.write_u32_le(42).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut packet).unwrap();

        let login = login.lock();
        assert_eq!(login.status, CharacterStatus::Online);
        assert_eq!(login.zone_id, 42);
        assert_eq!(login.channel_id, -1);
    }

    #[test]
    fn party_update_invite_and_accept_forms_a_party() {
        let state = state();
        let hooks = Arc::new(WorldHooks {
            parties: state.parties.clone(),
            clans: state.clans.clone(),
            teams: state.teams.clone(),
            characters: state.characters.clone(),
            sync: state.sync.clone(),
            match_queue: state.match_queue.clone(),
            log: log(),
        });
        let parser = PartyUpdateParser { state: state.clone(), hooks };

        let mut invite = Packet::new();
        invite.write_u8(Action::Add.to_u8()).unwrap();
        invite.write_i32_le(1).unwrap();
        invite.write_i32_le(2).unwrap();
        invite.rewind();
        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut invite).unwrap();

        let mut accept = Packet::new();
        accept.write_u8(Action::ResponseYes.to_u8()).unwrap();
        accept.write_i32_le(2).unwrap();
        accept.rewind();
        parser.parse(&mut ctx, 7, &mut accept).unwrap();

        let leader_party = state.parties.party_of(1).expect("leader should have a party");
        let member_party = state.parties.party_of(2).expect("invitee should have joined");
        assert_eq!(leader_party.id, member_party.id);
    }

    #[test]
    fn account_login_result_promotes_account_on_acceptance() {
        let state = state();
        let parser = AccountLoginResultParser { state: state.clone() };
        let uuid = Uuid::new_v4();
        let mut packet = Packet::new();
        packet.write_string16("alice").unwrap();
        packet.write_u8(1).unwrap();
        packet.write_string16(&uuid.to_string()).unwrap();
        packet.write_u8(1).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut packet).unwrap();
        assert!(state.accounts.snapshot("alice").is_some());
    }

    #[test]
    fn account_login_result_ignores_rejections() {
        let state = state();
        let parser = AccountLoginResultParser { state: state.clone() };
        let mut packet = Packet::new();
        packet.write_string16("ghost").unwrap();
        packet.write_u8(0).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut packet).unwrap();
        assert!(state.accounts.snapshot("ghost").is_none());
    }

    /// S5: a Cids relay naming one online and one offline target delivers
    /// to the online one and does not error on the offline one — the
    /// failure bounce back to the sender is a best-effort queue onto a live
    /// connection, which this test's no-op context has none of to observe.
    #[test]
    fn relay_with_a_mix_of_online_and_offline_targets_does_not_error() {
        let state = state();
        let login = state.characters.register(Uuid::new_v4(), 0);
        let cid = login.lock().world_cid;
        login.lock().channel_id = 1;

        let parser = RelayParser { state: state.clone() };
        let envelope = RelayEnvelope {
            source_world_cid: 99,
            target: RelayTarget::Cids(vec![cid, cid + 1000]),
            original_packet: vec![1, 2, 3],
        };
        let mut packet = Packet::new();
        packet.write_bytes(&envelope.encode().unwrap()).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 7, &mut packet).unwrap();
    }
}
