use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use uuid::Uuid;

use nexus::{Connection, ConnectionId, MessageQueue, TimerManager};
use wire::packet::Packet;
use wire::{Error, Result};

use crate::object::{Database, ObjectConfig, RecordData, SyncResult};

struct PendingType {
    updates: Vec<RecordData>,
    removes: Vec<RecordData>,
}

impl PendingType {
    fn new() -> Self {
        PendingType {
            updates: Vec::new(),
            removes: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.removes.is_empty()
    }
}

struct Inner {
    configs: HashMap<String, ObjectConfig>,
    connection_types: HashMap<ConnectionId, HashSet<String>>,
    pending: HashMap<String, PendingType>,
}

/// Cross-server record replication engine (C7). One mutex guards every map
/// below; no callback invoked while holding it may call back into the
/// manager (the locking discipline the whole runtime follows).
pub struct DataSyncManager {
    inner: Mutex<Inner>,
    database: Arc<dyn Database>,
    timers: Arc<TimerManager>,
    log: slog::Logger,
}

impl DataSyncManager {
    pub fn new(database: Arc<dyn Database>, timers: Arc<TimerManager>, log: slog::Logger) -> Self {
        DataSyncManager {
            inner: Mutex::new(Inner {
                configs: HashMap::new(),
                connection_types: HashMap::new(),
                pending: HashMap::new(),
            }),
            database,
            timers,
            log,
        }
    }

    pub fn register_type(&self, config: ObjectConfig) {
        let mut inner = self.inner.lock();
        inner.pending.insert(config.type_name.clone(), PendingType::new());
        inner.configs.insert(config.type_name.clone(), config);
    }

    /// A connection declares which types it wants to receive. Called at
    /// channel registration and again on reconnect.
    pub fn register_connection(&self, id: ConnectionId, types: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock();
        inner.connection_types.entry(id).or_default().extend(types);
    }

    pub fn remove_connection(&self, id: ConnectionId) {
        self.inner.lock().connection_types.remove(&id);
    }

    pub fn update_record(&self, type_name: &str, record: RecordData, source: Option<ConnectionId>) -> SyncResult {
        self.apply(type_name, record, false, source)
    }

    pub fn remove_record(&self, type_name: &str, record: RecordData, source: Option<ConnectionId>) -> SyncResult {
        let result = self.apply(type_name, record.clone(), true, source);
        if result != SyncResult::Failed {
            self.cascade_remove(type_name, &record, source);
        }
        result
    }

    fn cascade_remove(&self, type_name: &str, record: &RecordData, source: Option<ConnectionId>) {
        let cascade_handler = {
            let inner = self.inner.lock();
            inner.configs.get(type_name).and_then(|c| c.cascade_handler.clone())
        };
        let Some(handler) = cascade_handler else {
            return;
        };
        for (child_type, child_record) in handler(record) {
            self.remove_record(&child_type, child_record, source);
        }
    }

    fn apply(&self, type_name: &str, record: RecordData, is_remove: bool, source: Option<ConnectionId>) -> SyncResult {
        let (server_owned, dynamic, handler) = {
            let inner = self.inner.lock();
            match inner.configs.get(type_name) {
                Some(c) => (c.server_owned, c.dynamic_handler, c.update_handler.clone()),
                None => {
                    slog::warn!(self.log, "update/remove on unregistered type"; "type" => type_name);
                    return SyncResult::Failed;
                }
            }
        };

        if !server_owned && !dynamic {
            slog::debug!(self.log, "rejecting mutation of non-owned, non-dynamic type"; "type" => type_name);
            return SyncResult::Failed;
        }

        let Some(handler) = handler else {
            return SyncResult::Handled;
        };

        let result = handler(&record, is_remove, source);
        match result {
            SyncResult::Updated if server_owned => {
                self.enqueue_outgoing(type_name, record, is_remove);
            }
            SyncResult::Failed => {
                slog::warn!(self.log, "sync handler rejected record"; "type" => type_name, "remove" => is_remove);
            }
            _ => {}
        }

        result
    }

    /// Looks up the expiration time a type's extractor reports for this
    /// record, if any. Callers that mutate an expiring type (SearchEntry)
    /// should follow `update_record`/`remove_record` with
    /// `schedule_expiration_on` when this returns `Some`.
    pub fn expiration_of(&self, type_name: &str, record: &RecordData) -> Option<u64> {
        let inner = self.inner.lock();
        let extractor = inner.configs.get(type_name)?.expiration_extractor.clone()?;
        extractor(record)
    }

    /// Schedules a timer that re-checks the record's expiration when it
    /// fires, removing it only if the expiration still matches — this
    /// covers a replacement racing the original timer. The owning process
    /// supplies the queue its sync-manager worker dequeues from.
    pub fn schedule_expiration_on(
        self: &Arc<Self>,
        type_name: String,
        record: RecordData,
        expiration_at: u64,
        queue: Arc<MessageQueue>,
    ) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
        let delay = expiration_at.saturating_sub(now);
        let deadline = std::time::Instant::now() + Duration::from_secs(delay);
        let this = self.clone();
        self.timers.register(deadline, queue, move || {
            this.fire_expiration(&type_name, &record, expiration_at);
        });
    }

    fn fire_expiration(&self, type_name: &str, record: &RecordData, expected_expiration: u64) {
        if self.expiration_of(type_name, record) != Some(expected_expiration) {
            return;
        }
        self.remove_record(type_name, record.clone(), None);
    }

    fn enqueue_outgoing(&self, type_name: &str, record: RecordData, is_remove: bool) {
        let mut inner = self.inner.lock();
        let entry = inner.pending.entry(type_name.to_string()).or_insert_with(PendingType::new);
        if is_remove {
            entry.updates.retain(|r| !same_identity(r, &record));
            entry.removes.push(record);
        } else {
            entry.removes.retain(|r| !same_identity(r, &record));
            entry.updates.push(record);
        }
    }

    /// Drains the outbound queues and builds one relay packet per
    /// (connection, type) pair, delivering it straight onto that
    /// connection's outgoing list.
    pub fn sync_outgoing(&self, resolve: impl Fn(ConnectionId) -> Option<Arc<std::sync::Mutex<Connection>>>) -> Result<()> {
        let drained: Vec<(String, PendingType)> = {
            let mut inner = self.inner.lock();
            inner
                .pending
                .iter_mut()
                .filter(|(_, p)| !p.is_empty())
                .map(|(k, v)| {
                    let updates = std::mem::take(&mut v.updates);
                    let removes = std::mem::take(&mut v.removes);
                    (k.clone(), PendingType { updates, removes })
                })
                .collect()
        };
        if drained.is_empty() {
            return Ok(());
        }

        let targets: Vec<(ConnectionId, HashSet<String>)> = {
            let inner = self.inner.lock();
            inner.connection_types.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        for (type_name, pending) in &drained {
            let packet = build_sync_packet(type_name, pending)?;
            for (conn_id, types) in &targets {
                if !types.contains(type_name) {
                    continue;
                }
                if let Some(conn) = resolve(*conn_id) {
                    conn.lock().unwrap().queue_packet(packet.clone());
                }
            }
        }
        Ok(())
    }

    /// Replays every currently-registered record of every type this
    /// connection is interested in — used when a channel reconnects after
    /// a network drop, per the failure-recovery model.
    pub fn sync_existing_channel_records(
        &self,
        connection: ConnectionId,
        snapshot: impl Fn(&str) -> Vec<RecordData>,
        send: impl Fn(Vec<u8>),
    ) -> Result<()> {
        let types: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .connection_types
                .get(&connection)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        };
        for type_name in types {
            let records = snapshot(&type_name);
            if records.is_empty() {
                continue;
            }
            let pending = PendingType {
                updates: records,
                removes: Vec::new(),
            };
            let packet = build_sync_packet(&type_name, &pending)?;
            send(packet);
        }
        Ok(())
    }

    /// Reads a `PACKET_DATA_SYNC` payload from a peer and applies it.
    /// Unknown types are logged and skipped, never treated as fatal: the
    /// engine must survive a peer that is ahead on its type catalog.
    pub fn sync_incoming(&self, packet: &mut Packet, source: Option<ConnectionId>) -> Result<()> {
        let type_name = packet.read_string16()?;

        let (persistent, build_handler) = {
            let inner = self.inner.lock();
            match inner.configs.get(&type_name) {
                Some(c) => (c.persistent, c.build_handler.clone()),
                None => {
                    slog::info!(self.log, "sync_incoming: unregistered type, skipping"; "type" => %type_name);
                    return Ok(());
                }
            }
        };

        let updates = self.read_records(packet, &type_name, persistent, build_handler.as_deref())?;
        let removes = self.read_records(packet, &type_name, persistent, build_handler.as_deref())?;

        let mut completion = Vec::new();
        let (update_handler, sync_complete_handler) = {
            let inner = self.inner.lock();
            let c = inner.configs.get(&type_name).expect("checked above");
            (c.update_handler.clone(), c.sync_complete_handler.clone())
        };

        for record in updates {
            if let Some(h) = &update_handler {
                h(&record, false, source);
            }
            if sync_complete_handler.is_some() {
                completion.push(record);
            }
        }
        for record in removes {
            if let Some(h) = &update_handler {
                h(&record, true, source);
            }
            if sync_complete_handler.is_some() {
                completion.push(record);
            }
        }

        if let Some(h) = sync_complete_handler {
            h(&completion, source);
        }

        Ok(())
    }

    fn read_records(
        &self,
        packet: &mut Packet,
        type_name: &str,
        persistent: bool,
        build_handler: Option<&crate::object::BuildHandler>,
    ) -> Result<Vec<RecordData>> {
        let count = packet.read_u16_le()?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if persistent {
                let uuid_str = packet.read_string16()?;
                let Ok(uuid) = Uuid::parse_str(&uuid_str) else {
                    slog::warn!(self.log, "skipping record with null/invalid uuid"; "type" => type_name);
                    continue;
                };
                match self.database.load(type_name, uuid) {
                    Some(payload) => out.push(RecordData::Persistent { uuid, payload }),
                    None => slog::warn!(self.log, "persistent record not found in database"; "type" => type_name, "uuid" => %uuid),
                }
            } else {
                let len = packet.read_u16_le()? as usize;
                let raw = packet.read_bytes(len)?;
                let Some(build_handler) = build_handler else {
                    return Err(Error::Sync(format!("type {type_name} has no build handler")));
                };
                let Some(payload) = build_handler(&raw) else {
                    return Err(Error::Sync(format!("failed to build record for type {type_name}")));
                };
                out.push(RecordData::NonPersistent { payload });
            }
        }
        Ok(out)
    }
}

fn same_identity(a: &RecordData, b: &RecordData) -> bool {
    match (a.uuid(), b.uuid()) {
        (Some(x), Some(y)) => x == y,
        _ => a.payload() == b.payload(),
    }
}

fn build_sync_packet(type_name: &str, pending: &PendingType) -> Result<Vec<u8>> {
    let mut packet = Packet::new();
    packet.write_string16(type_name)?;
    write_record_set(&mut packet, &pending.updates)?;
    write_record_set(&mut packet, &pending.removes)?;
    Ok(packet.into_bytes())
}

fn write_record_set(packet: &mut Packet, records: &[RecordData]) -> Result<()> {
    packet.write_u16_le(records.len() as u16)?;
    for record in records {
        match record {
            RecordData::Persistent { uuid, .. } => {
                packet.write_string16(&uuid.to_string())?;
            }
            RecordData::NonPersistent { payload } => {
                packet.write_u16_le(payload.len() as u16)?;
                packet.write_bytes(payload)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    fn log() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn drain_and_run(queue: &MessageQueue) {
        let mut dest = Vec::new();
        queue.dequeue_any(&mut dest);
        for msg in dest {
            if let nexus::Message::Execute(f) = msg {
                f();
            }
        }
    }

    fn non_persistent(payload: &[u8]) -> RecordData {
        RecordData::NonPersistent { payload: payload.to_vec() }
    }

    #[test]
    fn update_on_an_unregistered_type_is_rejected() {
        let manager = DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log());
        assert_eq!(manager.update_record("Ghost", non_persistent(b"x"), None), SyncResult::Failed);
    }

    #[test]
    fn update_on_a_non_owned_non_dynamic_type_is_rejected_without_calling_the_handler() {
        let manager = DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = calls.clone();
        manager.register_type(ObjectConfig::new("Readonly").server_owned(false).dynamic_handler(false).with_update_handler(move |_, _, _| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            SyncResult::Updated
        }));
        assert_eq!(manager.update_record("Readonly", non_persistent(b"x"), None), SyncResult::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_server_owned_update_is_queued_for_outgoing_relay() {
        let manager = DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log());
        manager.register_type(ObjectConfig::new("SearchEntry").server_owned(true).with_update_handler(|_, _, _| SyncResult::Updated));
        manager.register_connection(1, ["SearchEntry".to_string()]);
        assert_eq!(manager.update_record("SearchEntry", non_persistent(b"entry"), None), SyncResult::Updated);

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_inner = delivered.clone();
        manager
            .sync_outgoing(move |id| {
                assert_eq!(id, 1);
                delivered_inner.fetch_add(1, Ordering::SeqCst);
                None
            })
            .unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_a_search_entry_cascades_to_its_children() {
        let manager = DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log());
        let removed = Arc::new(AtomicUsize::new(0));
        let removed_inner = removed.clone();
        manager.register_type(
            ObjectConfig::new("SearchEntry")
                .server_owned(true)
                .with_update_handler(move |_, is_remove, _| {
                    if is_remove {
                        removed_inner.fetch_add(1, Ordering::SeqCst);
                    }
                    SyncResult::Updated
                })
                .with_cascade_handler(|parent| {
                    // a parent entry's removal cascades to exactly one child, modeling the
                    // parent-entry-id relationship without needing a second registered type.
                    // children (marked "child-of-...") do not cascade further.
                    if parent.payload().starts_with(b"child-of-") {
                        return vec![];
                    }
                    vec![("SearchEntry".to_string(), non_persistent(format!("child-of-{:?}", parent.payload()).as_bytes()))]
                }),
        );
        manager.remove_record("SearchEntry", non_persistent(b"parent"), None);
        assert_eq!(removed.load(Ordering::SeqCst), 2);
    }

    /// S6: a SearchEntry is replaced with a later expiration before its
    /// original timer fires. The original timer must see the mismatch and
    /// do nothing; only the replacement's own timer removes the entry.
    #[test]
    fn expiration_timer_is_a_no_op_after_the_record_is_replaced() {
        let manager = Arc::new(DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log()));
        let current_expiration = Arc::new(AtomicU64::new(600));
        let removed = Arc::new(AtomicUsize::new(0));

        let removed_inner = removed.clone();
        let current_inner = current_expiration.clone();
        manager.register_type(
            ObjectConfig::new("SearchEntry")
                .server_owned(true)
                .with_update_handler(move |_, is_remove, _| {
                    if is_remove {
                        removed_inner.fetch_add(1, Ordering::SeqCst);
                    }
                    SyncResult::Updated
                })
                .with_expiration_extractor(move |_| Some(current_inner.load(Ordering::SeqCst))),
        );

        let queue = MessageQueue::new();
        let record = non_persistent(b"entry-99");
        manager.clone().schedule_expiration_on("SearchEntry".to_string(), record.clone(), 600, queue.clone());

        // the entry is replaced with a later expiration before the original timer fires.
        current_expiration.store(900, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        drain_and_run(&queue);
        assert_eq!(removed.load(Ordering::SeqCst), 0);

        manager.clone().schedule_expiration_on("SearchEntry".to_string(), record, 900, queue.clone());
        std::thread::sleep(Duration::from_millis(20));
        drain_and_run(&queue);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_incoming_skips_unregistered_types_without_error() {
        let manager = DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log());
        let mut packet = Packet::new();
        packet.write_string16("Unknown").unwrap();
        packet.rewind();
        manager.sync_incoming(&mut packet, None).unwrap();
    }

    #[test]
    fn sync_incoming_round_trips_a_non_persistent_record_through_the_update_handler() {
        let manager = DataSyncManager::new(InMemoryDatabase::new(), Arc::new(TimerManager::start()), log());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_inner = seen.clone();
        manager.register_type(
            ObjectConfig::new("CharacterLogin")
                .with_build_handler(|raw| Some(raw.to_vec()))
                .with_update_handler(move |record, is_remove, _| {
                    seen_inner.lock().push((record.payload().to_vec(), is_remove));
                    SyncResult::Handled
                }),
        );

        let mut packet = Packet::new();
        packet.write_string16("CharacterLogin").unwrap();
        packet.write_u16_le(1).unwrap();
        packet.write_u16_le(3).unwrap();
        packet.write_bytes(b"abc").unwrap();
        packet.write_u16_le(0).unwrap();
        packet.rewind();

        manager.sync_incoming(&mut packet, Some(7)).unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (b"abc".to_vec(), false));
    }
}
