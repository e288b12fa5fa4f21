use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use slog::Logger;

use wire::packet::Packet;
use wire::{Error, Result};

use crate::message::{Message, MessageKind};
use crate::net::{Connection, ConnectionId};
use crate::worker::Manager;

/// A handler for one command code. Registered at startup by the containing
/// process (lobby/world/channel); the same code may resolve to different
/// parsers in different processes.
pub trait PacketParser: Send + Sync {
    fn parse(&self, ctx: &mut dyn PacketContext, connection: ConnectionId, packet: &mut Packet) -> Result<()>;
}

/// The subset of process state a parser needs: a way to reach the owning
/// connection to reply or close it.
pub trait PacketContext {
    fn connection(&self, id: ConnectionId) -> Option<Arc<Mutex<Connection>>>;
    fn log(&self) -> &Logger;
}

/// Restricts which command codes are reachable given a connection's current
/// login/handshake state. The default always allows; lobby/world/channel
/// override to gate on login state.
pub trait ConnectionStateGuard: Send + Sync {
    fn validate(&self, connection: ConnectionId, code: u16) -> bool {
        let _ = (connection, code);
        true
    }
}

struct AllowAll;
impl ConnectionStateGuard for AllowAll {}

/// Owns `command-code -> PacketParser` and routes inbound `Packet` messages
/// to the right one, closing the connection on any parser failure.
pub struct ManagerPacket {
    parsers: HashMap<u16, Box<dyn PacketParser>>,
    guard: Box<dyn ConnectionStateGuard>,
    ctx: Box<dyn PacketContext + Send>,
}

impl ManagerPacket {
    pub fn new(ctx: Box<dyn PacketContext + Send>) -> Self {
        ManagerPacket {
            parsers: HashMap::new(),
            guard: Box::new(AllowAll),
            ctx,
        }
    }

    pub fn with_guard(mut self, guard: Box<dyn ConnectionStateGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn register(&mut self, code: u16, parser: Box<dyn PacketParser>) {
        self.parsers.insert(code, parser);
    }
}

impl Manager for ManagerPacket {
    fn kinds(&self) -> &[MessageKind] {
        &[MessageKind::Connection, MessageKind::System]
    }

    fn process(&mut self, msg: Message, log: &Logger) -> Result<()> {
        let (connection, mut packet) = match msg {
            Message::Packet { connection, packet } => (connection, packet),
            Message::WorldNotification { port } => {
                slog::info!(log, "world registered via pre-encryption extension frame"; "port" => port);
                return Ok(());
            }
            _ => return Ok(()),
        };

        packet.rewind();
        let code = packet.read_u16_le()?;

        if !self.guard.validate(connection, code) {
            slog::warn!(log, "connection not permitted to send this command"; "code" => code);
            self.close(connection);
            return Err(Error::State("connection not permitted for command".into()));
        }

        let Some(parser) = self.parsers.get(&code) else {
            slog::warn!(log, "no parser registered for command code"; "code" => code);
            return Ok(());
        };

        if let Err(e) = parser.parse(self.ctx.as_mut(), connection, &mut packet) {
            slog::warn!(log, "packet parser failed, closing connection"; "code" => code, "error" => %e);
            self.close(connection);
            return Err(e);
        }
        Ok(())
    }
}

impl ManagerPacket {
    fn close(&self, id: ConnectionId) {
        if let Some(conn) = self.ctx.connection(id) {
            conn.lock().unwrap().disconnect(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct NoConnections;
    impl PacketContext for NoConnections {
        fn connection(&self, _id: ConnectionId) -> Option<Arc<Mutex<Connection>>> {
            None
        }
        fn log(&self) -> &Logger {
            unimplemented!("not exercised by these tests")
        }
    }

    #[test]
    fn declares_interest_in_both_connection_and_system_messages() {
        let manager = ManagerPacket::new(Box::new(NoConnections));
        assert!(manager.kinds().contains(&MessageKind::Connection));
        assert!(manager.kinds().contains(&MessageKind::System));
    }

    #[test]
    fn a_world_notification_is_consumed_without_touching_any_connection() {
        let mut manager = ManagerPacket::new(Box::new(NoConnections));
        let result = manager.process(Message::WorldNotification { port: 18667 }, &test_logger());
        assert!(result.is_ok());
    }
}
