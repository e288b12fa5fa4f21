//! The Worker/Message-bus runtime and the encrypted server-to-server
//! transport shared by every process in the cluster: messages and queues
//! (C1), workers (C2), the timer manager (C3), the encrypted connection and
//! accept loop (C4/C5), and command-code packet dispatch (C6).

pub mod manager;
pub mod message;
pub mod net;
pub mod runtime;
pub mod timer;
pub mod worker;

pub use manager::{ManagerPacket, PacketContext, PacketParser};
pub use message::{Message, MessageKind, MessageQueue};
pub use net::{Connection, ConnectionId, ConnectionStatus, Reactor, Role, TcpServer};
pub use runtime::Runtime;
pub use timer::{TimerHandle, TimerManager};
pub use worker::{Manager, Worker, WorkerHandle};
