use std::sync::Arc;

use parking_lot::Mutex;
use slog::Logger;

use concord::manager::DataSyncManager;
use nexus::{Connection, ConnectionId, PacketContext, PacketParser, Reactor};
use wire::packet::Packet;
use wire::Result;

use crate::local_state::LocalCharacterTable;

pub struct ChannelContext {
    pub reactor: Arc<Reactor>,
    pub log: Logger,
}

impl PacketContext for ChannelContext {
    fn connection(&self, id: ConnectionId) -> Option<Arc<std::sync::Mutex<Connection>>> {
        self.reactor.connection(id)
    }

    fn log(&self) -> &Logger {
        &self.log
    }
}

/// World's own descriptor, as last seen from a `PACKET_GET_WORLD_INFO`
/// reply. Nothing in this core consumes it yet beyond logging; it stands
/// ready for whatever inter-channel routing decisions a fuller build would
/// add.
#[derive(Default)]
pub struct WorldInfoCache {
    inner: Mutex<Option<(i8, String)>>,
}

impl WorldInfoCache {
    pub fn new() -> Self {
        WorldInfoCache::default()
    }

    pub fn store(&self, id: i8, name: String) {
        *self.inner.lock() = Some((id, name));
    }

    pub fn get(&self) -> Option<(i8, String)> {
        self.inner.lock().clone()
    }
}

pub struct WorldInfoReplyParser {
    pub cache: Arc<WorldInfoCache>,
}

impl PacketParser for WorldInfoReplyParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let id = packet.read_u8()? as i8;
        let name = packet.read_string16()?;
        let _host = packet.read_string16()?;
        let _port = packet.read_u16_le()?;
        let channel_count = packet.read_u16_le()?;
        for _ in 0..channel_count {
            let _id = packet.read_u8()?;
            let _name = packet.read_string16()?;
            let _host = packet.read_string16()?;
            let _port = packet.read_u16_le()?;
        }
        slog::debug!(ctx.log(), "world info refreshed"; "world" => &name);
        self.cache.store(id, name);
        Ok(())
    }
}

/// World relays a message addressed to one or more world-cids this channel
/// hosts (spec §4.9's one-hop relay). Delivery to the actual client
/// connection is out of scope here; this logs the world-cids the payload
/// resolved to so the relay path is observable end to end.
pub struct RelayDeliveryParser {
    pub characters: Arc<LocalCharacterTable>,
}

impl PacketParser for RelayDeliveryParser {
    fn parse(&self, ctx: &mut dyn PacketContext, _connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        let source_world_cid = packet.read_i32_le()?;
        let target_count = packet.read_u16_le()?;
        let mut targets = Vec::with_capacity(target_count as usize);
        for _ in 0..target_count {
            targets.push(packet.read_i32_le()?);
        }
        let local: Vec<_> = targets.iter().copied().filter(|cid| self.characters.is_local(*cid)).collect();
        slog::debug!(ctx.log(), "relay delivered"; "source" => source_world_cid, "local_targets" => local.len(), "total_targets" => targets.len());
        Ok(())
    }
}

/// Raw entry point into this channel's own `DataSyncManager` mirror for
/// records World pushes down.
pub struct DataSyncParser {
    pub sync: Arc<DataSyncManager>,
}

impl PacketParser for DataSyncParser {
    fn parse(&self, _ctx: &mut dyn PacketContext, connection: ConnectionId, packet: &mut Packet) -> Result<()> {
        self.sync.sync_incoming(packet, Some(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn world_info_reply_populates_the_cache() {
        let cache = Arc::new(WorldInfoCache::new());
        let parser = WorldInfoReplyParser { cache: cache.clone() };
        let mut packet = Packet::new();
        packet.write_u8(0).unwrap();
        packet.write_string16("World").unwrap();
        packet.write_string16("127.0.0.1").unwrap();
        packet.write_u16_le(18666).unwrap();
        packet.write_u16_le(0).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 1, &mut packet).unwrap();
        assert_eq!(cache.get(), Some((0, "World".to_string())));
    }

    #[test]
    fn relay_delivery_counts_local_targets() {
        let characters = Arc::new(LocalCharacterTable::new());
        characters.add(42);
        let parser = RelayDeliveryParser { characters };
        let mut packet = Packet::new();
        packet.write_i32_le(1).unwrap();
        packet.write_u16_le(2).unwrap();
        packet.write_i32_le(42).unwrap();
        packet.write_i32_le(43).unwrap();
        packet.rewind();

        let mut ctx = NullCtx(log());
        parser.parse(&mut ctx, 1, &mut packet).unwrap();
    }
}
