use std::sync::Arc;

use uuid::Uuid;

/// The payload a sync operation carries for one record. Persistent types
/// are identified and transported by UUID (the receiver reloads content
/// from its own database); non-persistent types carry their full
/// serialized content inline.
#[derive(Debug, Clone)]
pub enum RecordData {
    Persistent { uuid: Uuid, payload: Vec<u8> },
    NonPersistent { payload: Vec<u8> },
}

impl RecordData {
    pub fn payload(&self) -> &[u8] {
        match self {
            RecordData::Persistent { payload, .. } => payload,
            RecordData::NonPersistent { payload } => payload,
        }
    }

    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            RecordData::Persistent { uuid, .. } => Some(*uuid),
            RecordData::NonPersistent { .. } => None,
        }
    }
}

/// Outcome of an update/build/remove handler, mirroring the three-way
/// result the engine branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    /// Applied; queue for outbound relay if this server is the master.
    Updated,
    /// Applied; already final, do not re-broadcast.
    Handled,
    /// Rejected; drop and log.
    Failed,
}

pub type UpdateHandler = dyn Fn(&RecordData, bool, Option<nexus::ConnectionId>) -> SyncResult + Send + Sync;
/// Builds an empty non-persistent record and populates it from the wire
/// payload in one step (combining the original system's separate
/// build-then-load-packet calls, since the parsing shape is always
/// type-specific anyway).
pub type BuildHandler = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;
pub type SyncCompleteHandler = dyn Fn(&[RecordData], Option<nexus::ConnectionId>) + Send + Sync;
/// Given a removed record, returns the sibling records (type name +
/// identity payload) that must cascade-remove alongside it — the
/// generalized form of the SearchEntry-children / MatchEntry-siblings rule.
pub type CascadeHandler = dyn Fn(&RecordData) -> Vec<(String, RecordData)> + Send + Sync;
/// Extracts a wall-clock expiration time (seconds since epoch), if any,
/// from a record so the engine can schedule its removal timer.
pub type ExpirationExtractor = dyn Fn(&RecordData) -> Option<u64> + Send + Sync;

/// Registered once per type at process startup. Declares ownership and the
/// handlers the engine calls during `update_record`/`remove_record`/
/// `sync_incoming`.
#[derive(Clone)]
pub struct ObjectConfig {
    pub type_name: String,
    pub persistent: bool,
    pub server_owned: bool,
    pub dynamic_handler: bool,
    pub update_handler: Option<Arc<UpdateHandler>>,
    pub build_handler: Option<Arc<BuildHandler>>,
    pub sync_complete_handler: Option<Arc<SyncCompleteHandler>>,
    pub cascade_handler: Option<Arc<CascadeHandler>>,
    pub expiration_extractor: Option<Arc<ExpirationExtractor>>,
}

impl ObjectConfig {
    pub fn new(type_name: impl Into<String>) -> Self {
        ObjectConfig {
            type_name: type_name.into(),
            persistent: false,
            server_owned: false,
            dynamic_handler: false,
            update_handler: None,
            build_handler: None,
            sync_complete_handler: None,
            cascade_handler: None,
            expiration_extractor: None,
        }
    }

    pub fn persistent(mut self, v: bool) -> Self {
        self.persistent = v;
        self
    }

    pub fn server_owned(mut self, v: bool) -> Self {
        self.server_owned = v;
        self
    }

    pub fn dynamic_handler(mut self, v: bool) -> Self {
        self.dynamic_handler = v;
        self
    }

    pub fn with_update_handler(mut self, h: impl Fn(&RecordData, bool, Option<nexus::ConnectionId>) -> SyncResult + Send + Sync + 'static) -> Self {
        self.update_handler = Some(Arc::new(h));
        self
    }

    pub fn with_build_handler(mut self, h: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) -> Self {
        self.build_handler = Some(Arc::new(h));
        self
    }

    pub fn with_sync_complete_handler(mut self, h: impl Fn(&[RecordData], Option<nexus::ConnectionId>) + Send + Sync + 'static) -> Self {
        self.sync_complete_handler = Some(Arc::new(h));
        self
    }

    pub fn with_cascade_handler(mut self, h: impl Fn(&RecordData) -> Vec<(String, RecordData)> + Send + Sync + 'static) -> Self {
        self.cascade_handler = Some(Arc::new(h));
        self
    }

    pub fn with_expiration_extractor(mut self, h: impl Fn(&RecordData) -> Option<u64> + Send + Sync + 'static) -> Self {
        self.expiration_extractor = Some(Arc::new(h));
        self
    }
}

/// Stands in for the lobby/world databases, which are out of scope (no
/// database engine is prescribed). Persistent types are loaded/stored
/// through this trait; the in-memory implementation is a reference
/// implementation, not a production database.
pub trait Database: Send + Sync {
    fn load(&self, type_name: &str, uuid: Uuid) -> Option<Vec<u8>>;
    fn store(&self, type_name: &str, uuid: Uuid, payload: Vec<u8>);
}

pub struct InMemoryDatabase {
    rows: parking_lot::Mutex<hashbrown::HashMap<(String, Uuid), Vec<u8>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryDatabase {
            rows: parking_lot::Mutex::new(hashbrown::HashMap::new()),
        })
    }
}

impl Database for InMemoryDatabase {
    fn load(&self, type_name: &str, uuid: Uuid) -> Option<Vec<u8>> {
        self.rows.lock().get(&(type_name.to_string(), uuid)).cloned()
    }

    fn store(&self, type_name: &str, uuid: Uuid, payload: Vec<u8>) {
        self.rows.lock().insert((type_name.to_string(), uuid), payload);
    }
}
