pub mod connection;
pub mod frame;
pub mod server;

pub use connection::{Connection, ConnectionStatus, Role};
pub use server::{Reactor, TcpServer};

/// Identifies a connection within the owning process. Stable for the
/// connection's lifetime; never reused while it is live.
pub type ConnectionId = usize;
