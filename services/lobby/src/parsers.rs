use std::sync::Arc;

use slog::Logger;

use nexus::{Connection, ConnectionId, PacketContext, PacketParser, Reactor};
use wire::codes;
use wire::packet::Packet;
use wire::Result;

use crate::store::AccountStore;
use crate::world_link::{RegisteredChannel, RegisteredWorld, WorldLink};

pub struct LobbyContext {
    pub reactor: Arc<Reactor>,
    pub log: Logger,
}

impl PacketContext for LobbyContext {
    fn connection(&self, id: ConnectionId) -> Option<Arc<std::sync::Mutex<Connection>>> {
        self.reactor.connection(id)
    }

    fn log(&self) -> &Logger {
        &self.log
    }
}

/// World announces itself and its channel list. Payload: world id (i8),
/// world name, host, port, then a u16 channel count and one
/// `{id: i8, name, host, port: u16}` row per channel.
pub struct SetWorldInfoParser {
    pub link: Arc<WorldLink>,
}

impl PacketParser for SetWorldInfoParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let world = RegisteredWorld {
            id: packet.read_u8()? as i8,
            name: packet.read_string16()?,
            host: packet.read_string16()?,
            port: packet.read_u16_le()?,
        };
        let channel_count = packet.read_u16_le()?;
        let mut channels = Vec::with_capacity(channel_count as usize);
        for _ in 0..channel_count {
            channels.push(RegisteredChannel {
                id: packet.read_u8()? as i8,
                name: packet.read_string16()?,
                host: packet.read_string16()?,
                port: packet.read_u16_le()?,
            });
        }
        slog::info!(ctx.log(), "world registered"; "world" => &world.name, "channels" => channels.len());
        self.link.register(world, channels);
        Ok(())
    }
}

/// A world-relayed credential check on behalf of a connecting client.
/// Request payload: username, password. Reply (written back on the same
/// connection): username (string16, echoed since the world-lobby link has
/// no per-request correlation id), ok (u8), and if ok, account uuid
/// (string16) and the assigned channel id (i8).
pub struct AccountLoginParser {
    pub store: Arc<dyn AccountStore>,
    pub link: Arc<WorldLink>,
}

impl PacketParser for AccountLoginParser {
    fn parse(&self, ctx: &mut dyn PacketContext, connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let username = packet.read_string16()?;
        let password = packet.read_string16()?;

        let outcome = self.store.find_by_username(&username).filter(|a| !a.banned && a.password_hash == password);

        let mut reply = Packet::new();
        reply.write_u16_le(codes::PACKET_ACCOUNT_LOGIN)?;
        reply.write_string16(&username)?;
        match outcome.zip(self.link.assign_channel()) {
            Some((account, channel_id)) => {
                self.store.touch_last_login(account.uuid);
                reply.write_u8(1)?;
                reply.write_string16(&account.uuid.to_string())?;
                reply.write_u8(channel_id as u8)?;
                slog::info!(ctx.log(), "account login accepted"; "username" => &username, "channel" => channel_id);
            }
            None => {
                reply.write_u8(0)?;
                slog::info!(ctx.log(), "account login rejected"; "username" => &username);
            }
        }

        if let Some(conn) = ctx.connection(connection) {
            conn.lock().unwrap().queue_packet(reply.into_bytes());
        }
        Ok(())
    }
}

/// World notifies Lobby that a session ended; Lobby has no session state of
/// its own to clean up (that lives in World's AccountRegistry) beyond the
/// audit log entry.
pub struct AccountLogoutParser;

impl PacketParser for AccountLogoutParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let username = packet.read_string16()?;
        slog::debug!(ctx.log(), "account logout acknowledged"; "username" => username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAccountStore;

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

    #[test]
    fn set_world_info_populates_link() {
        let link = Arc::new(WorldLink::new());
        let parser = SetWorldInfoParser { link: link.clone() };
        let mut packet = Packet::new();
        packet.write_u8(0).unwrap();
        packet.write_string16("World").unwrap();
        packet.write_string16("127.0.0.1").unwrap();
        packet.write_u16_le(18666).unwrap();
        packet.write_u16_le(1).unwrap();
        packet.write_u8(1).unwrap();
        packet.write_string16("Channel01").unwrap();
        packet.write_string16("127.0.0.1").unwrap();
        packet.write_u16_le(14666).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 1, &mut packet).unwrap();
        assert!(link.world().is_some());
        assert_eq!(link.assign_channel(), Some(1));
    }

    #[test]
    fn unknown_account_is_rejected_without_panicking() {
        let store = InMemoryAccountStore::new();
        let link = Arc::new(WorldLink::new());
        let parser = AccountLoginParser { store, link };
        let mut packet = Packet::new();
        packet.write_string16("ghost").unwrap();
        packet.write_string16("whatever").unwrap();
        packet.rewind();
        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 1, &mut packet).unwrap();
    }
}
