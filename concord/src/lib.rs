//! Cross-server data sync engine (C7): typed record replication between
//! Lobby/World/Channel with ownership rules, deferred relay, and the relay
//! envelope used for channel-to-channel/world forwarding.

pub mod manager;
pub mod object;
pub mod relay;

pub use manager::DataSyncManager;
pub use object::{BuildHandler, CascadeHandler, Database, InMemoryDatabase, ObjectConfig, RecordData, SyncCompleteHandler, SyncResult, UpdateHandler};
pub use relay::{RelayEnvelope, RelayMode, RelayTarget};
