use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::Rng;
use slog::Logger;
use uuid::Uuid;

use nexus::{MessageQueue, TimerManager};
use wire::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Offline,
    Lobby,
    LobbyToChannel,
    Channel,
    ChannelToChannel,
}

/// Per-account session state. Regenerated (new session key) on every
/// channel handoff.
#[derive(Debug, Clone)]
pub struct AccountLogin {
    pub account_uuid: Uuid,
    pub username: String,
    pub session_key: u32,
    pub state: LoginState,
    pub channel_id: i8,
    /// The logged-in character's world-cid, if one has completed channel
    /// login under this session.
    pub character_cid: Option<i32>,
}

impl AccountLogin {
    fn new(account_uuid: Uuid, username: String) -> Self {
        AccountLogin {
            account_uuid,
            username,
            session_key: generate_session_key(),
            state: LoginState::Offline,
            channel_id: -1,
            character_cid: None,
        }
    }
}

fn generate_session_key() -> u32 {
    rand::thread_rng().gen_range(1..=0x7FFF_FFFFu32)
}

struct PendingSwitch {
    target_channel: i8,
    timeout_handle: nexus::TimerHandle,
}

#[derive(Debug, Clone)]
pub struct WebGameSession {
    pub account_username: String,
    pub session_id: String,
    pub world_cid: i32,
}

fn generate_web_session_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..20).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// Side effects a full logout fans out to, implemented by whichever layer
/// owns party/character/lobby-connection state. Kept as a trait so
/// `AccountRegistry` (the username-keyed session table) does not need a
/// hard dependency on the group subsystems.
pub trait LogoutHooks {
    fn leave_party(&self, cid: i32);
    fn clear_sync_for_cid(&self, cid: i32);
    fn notify_related(&self, cid: i32);
    fn notify_lobby_logout(&self, username: &str);
}

struct Inner {
    accounts: HashMap<String, AccountLogin>,
    pending_switches: HashMap<String, PendingSwitch>,
    web_sessions: HashMap<String, WebGameSession>,
}

/// Tracks logged-in accounts, session keys, channel-switch handoff, and
/// web-game sessions (C8). One mutex guards every map.
pub struct AccountRegistry {
    inner: Mutex<Inner>,
    timers: Arc<TimerManager>,
    channel_switch_timeout: Duration,
    log: Logger,
}

fn normalize(username: &str) -> String {
    username.to_lowercase()
}

impl AccountRegistry {
    pub fn new(timers: Arc<TimerManager>, channel_switch_timeout: Duration, log: Logger) -> Self {
        AccountRegistry {
            inner: Mutex::new(Inner {
                accounts: HashMap::new(),
                pending_switches: HashMap::new(),
                web_sessions: HashMap::new(),
            }),
            timers,
            channel_switch_timeout,
            log,
        }
    }

    /// Registers a new session with a freshly generated key. Returns
    /// `false` if the account is already logged in.
    pub fn lobby_login(&self, account_uuid: Uuid, username: &str) -> bool {
        let key = normalize(username);
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(&key) {
            return false;
        }
        let mut login = AccountLogin::new(account_uuid, key.clone());
        login.state = LoginState::Lobby;
        inner.accounts.insert(key, login);
        true
    }

    /// Called when a client completes encryption on a channel. First login
    /// of the day actions are left to the caller (login-point increments,
    /// daily counters, clan level recompute) since they touch persistent
    /// character data this registry does not own; this just advances the
    /// session state and records which channel/character it is bound to.
    pub fn channel_login(&self, username: &str, channel_id: i8, character_cid: i32) -> Result<()> {
        let key = normalize(username);
        let mut inner = self.inner.lock();
        let login = inner
            .accounts
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("account {key} not logged in")))?;
        login.state = LoginState::Channel;
        login.channel_id = channel_id;
        login.character_cid = Some(character_cid);
        inner.pending_switches.remove(&key);
        Ok(())
    }

    /// Only valid from state `Channel`. Stores a pending target, re-
    /// generates the session key, and schedules a timeout that logs the
    /// account out if `channel_login` does not complete on the new channel
    /// first.
    pub fn switch_channel(
        self: &Arc<Self>,
        username: &str,
        target_channel: i8,
        timeout_queue: Arc<MessageQueue>,
        hooks: Arc<dyn LogoutHooks + Send + Sync>,
    ) -> Result<u32> {
        let key = normalize(username);
        let new_key = {
            let mut inner = self.inner.lock();
            let login = inner
                .accounts
                .get_mut(&key)
                .ok_or_else(|| Error::NotFound(format!("account {key} not logged in")))?;
            if login.state != LoginState::Channel {
                return Err(Error::State("switch_channel requires state Channel".into()));
            }
            login.state = LoginState::ChannelToChannel;
            login.session_key = generate_session_key();
            login.session_key
        };

        let this = self.clone();
        let owned_key = key.clone();
        let handle = self.timers.register(
            Instant::now() + self.channel_switch_timeout,
            timeout_queue,
            move || {
                this.on_channel_switch_timeout(&owned_key, &hooks);
            },
        );

        let mut inner = self.inner.lock();
        inner.pending_switches.insert(
            key,
            PendingSwitch {
                target_channel,
                timeout_handle: handle,
            },
        );
        Ok(new_key)
    }

    fn on_channel_switch_timeout(&self, username: &str, hooks: &Arc<dyn LogoutHooks + Send + Sync>) {
        let still_pending = {
            let inner = self.inner.lock();
            inner.pending_switches.contains_key(username)
        };
        if still_pending {
            slog::warn!(self.log, "channel switch timed out, logging out"; "username" => username);
            self.logout(username, None, hooks.as_ref());
        }
    }

    /// Idempotent: only expires if the stored key matches and the account
    /// is not already in state `Channel`.
    pub fn expire_session(&self, username: &str, key: u32) {
        let norm = normalize(username);
        let mut inner = self.inner.lock();
        if let Some(login) = inner.accounts.get(&norm) {
            if login.session_key == key && login.state != LoginState::Channel {
                inner.accounts.remove(&norm);
                inner.pending_switches.remove(&norm);
            }
        }
    }

    /// If `channel` is given, only logs out when the login's current
    /// channel matches — this prevents a stale logout racing a reconnect.
    pub fn logout(&self, username: &str, channel: Option<i8>, hooks: &dyn LogoutHooks) {
        let key = normalize(username);
        let removed = {
            let mut inner = self.inner.lock();
            match inner.accounts.get(&key) {
                Some(login) if channel.map_or(true, |c| login.channel_id == c) => {
                    let login = inner.accounts.remove(&key).unwrap();
                    if let Some(p) = inner.pending_switches.remove(&key) {
                        self.timers.cancel(p.timeout_handle);
                    }
                    Some(login)
                }
                _ => None,
            }
        };
        let Some(login) = removed else {
            return;
        };
        if let Some(cid) = login.character_cid {
            hooks.leave_party(cid);
            hooks.clear_sync_for_cid(cid);
            hooks.notify_related(cid);
        }
        hooks.notify_lobby_logout(&login.username);
    }

    /// Invoked when a channel connection closes; returns the logins that
    /// need the same cleanup as an explicit logout.
    pub fn logout_users_on_channel(&self, channel: i8, hooks: &dyn LogoutHooks) -> Vec<AccountLogin> {
        let usernames: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .accounts
                .values()
                .filter(|l| l.channel_id == channel)
                .map(|l| l.username.clone())
                .collect()
        };
        let mut affected = Vec::with_capacity(usernames.len());
        for username in usernames {
            let snapshot = {
                let inner = self.inner.lock();
                inner.accounts.get(&username).cloned()
            };
            if let Some(login) = snapshot {
                self.logout(&username, Some(channel), hooks);
                affected.push(login);
            }
        }
        affected
    }

    /// Read-only channel lookup, used by character-list/friend-list packet
    /// handlers without going through a full login snapshot.
    pub fn logged_in_channel(&self, username: &str) -> Option<i8> {
        let key = normalize(username);
        let inner = self.inner.lock();
        inner.accounts.get(&key).map(|l| l.channel_id)
    }

    pub fn channel_switch_pending(&self, username: &str) -> Option<i8> {
        let key = normalize(username);
        self.inner.lock().pending_switches.get(&key).map(|p| p.target_channel)
    }

    pub fn pop_channel_switch(&self, username: &str) -> Option<i8> {
        let key = normalize(username);
        let mut inner = self.inner.lock();
        inner.pending_switches.remove(&key).map(|p| {
            self.timers.cancel(p.timeout_handle);
            p.target_channel
        })
    }

    pub fn start_web_game_session(&self, username: &str, world_cid: i32) -> Result<WebGameSession> {
        let key = normalize(username);
        let mut inner = self.inner.lock();
        if !inner.accounts.contains_key(&key) {
            return Err(Error::State("account is not logged in".into()));
        }
        if inner.web_sessions.contains_key(&key) {
            return Err(Error::Conflict("web game session already active".into()));
        }
        let session = WebGameSession {
            account_username: key.clone(),
            session_id: generate_web_session_id(),
            world_cid,
        };
        inner.web_sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Removes the session if one exists; never reports an error for a
    /// missing session. `notify_lobby`/`notify_channel` are caller-driven
    /// side effects left to whoever owns those connections.
    pub fn end_web_game_session(&self, username: &str) -> Option<WebGameSession> {
        let key = normalize(username);
        self.inner.lock().web_sessions.remove(&key)
    }

    pub fn snapshot(&self, username: &str) -> Option<AccountLogin> {
        let key = normalize(username);
        self.inner.lock().accounts.get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn registry() -> Arc<AccountRegistry> {
        Arc::new(AccountRegistry::new(Arc::new(TimerManager::start()), Duration::from_millis(50), log()))
    }

    #[derive(Default)]
    struct CountingHooks {
        party_leaves: AtomicUsize,
        lobby_logouts: AtomicUsize,
    }

    impl LogoutHooks for CountingHooks {
        fn leave_party(&self, _cid: i32) {
            self.party_leaves.fetch_add(1, Ordering::SeqCst);
        }
        fn clear_sync_for_cid(&self, _cid: i32) {}
        fn notify_related(&self, _cid: i32) {}
        fn notify_lobby_logout(&self, _username: &str) {
            self.lobby_logouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lobby_login_rejects_a_second_concurrent_session() {
        let registry = registry();
        assert!(registry.lobby_login(Uuid::new_v4(), "Alice"));
        assert!(!registry.lobby_login(Uuid::new_v4(), "alice"));
    }

    #[test]
    fn channel_login_promotes_state_and_clears_any_pending_switch() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        registry.channel_login("alice", 1, 1001).unwrap();
        let login = registry.snapshot("alice").unwrap();
        assert_eq!(login.state, LoginState::Channel);
        assert_eq!(login.channel_id, 1);
        assert_eq!(login.character_cid, Some(1001));
    }

    #[test]
    fn channel_login_for_an_unknown_account_errors() {
        let registry = registry();
        assert!(registry.channel_login("ghost", 1, 1001).is_err());
    }

    #[test]
    fn switch_channel_requires_state_channel() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        let queue = MessageQueue::new();
        let hooks: Arc<dyn LogoutHooks + Send + Sync> = Arc::new(CountingHooks::default());
        assert!(registry.switch_channel("alice", 2, queue, hooks).is_err());
    }

    #[test]
    fn switch_channel_regenerates_the_session_key_and_schedules_a_timeout() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        registry.channel_login("alice", 1, 1001).unwrap();
        let original_key = registry.snapshot("alice").unwrap().session_key;

        let queue = MessageQueue::new();
        let hooks: Arc<dyn LogoutHooks + Send + Sync> = Arc::new(CountingHooks::default());
        let new_key = registry.switch_channel("alice", 2, queue, hooks).unwrap();

        assert_ne!(new_key, original_key);
        assert_eq!(registry.snapshot("alice").unwrap().state, LoginState::ChannelToChannel);
        assert_eq!(registry.channel_switch_pending("alice"), Some(2));
    }

    #[test]
    fn logout_with_a_channel_mismatch_is_a_no_op() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        registry.channel_login("alice", 1, 1001).unwrap();
        let hooks = CountingHooks::default();
        registry.logout("alice", Some(2), &hooks);
        assert!(registry.snapshot("alice").is_some());
        assert_eq!(hooks.lobby_logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn logout_removes_the_session_and_fans_out_hooks() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        registry.channel_login("alice", 1, 1001).unwrap();
        let hooks = CountingHooks::default();
        registry.logout("alice", Some(1), &hooks);
        assert!(registry.snapshot("alice").is_none());
        assert_eq!(hooks.party_leaves.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.lobby_logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn logout_users_on_channel_only_affects_matching_channel() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        registry.channel_login("alice", 1, 1001).unwrap();
        registry.lobby_login(Uuid::new_v4(), "bob");
        registry.channel_login("bob", 2, 1002).unwrap();

        let hooks = CountingHooks::default();
        let affected = registry.logout_users_on_channel(1, &hooks);

        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].username, "alice");
        assert!(registry.snapshot("alice").is_none());
        assert!(registry.snapshot("bob").is_some());
    }

    #[test]
    fn expire_session_is_idempotent_on_a_stale_key() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        let key = registry.snapshot("alice").unwrap().session_key;
        registry.expire_session("alice", key.wrapping_add(1));
        assert!(registry.snapshot("alice").is_some());
        registry.expire_session("alice", key);
        assert!(registry.snapshot("alice").is_none());
        registry.expire_session("alice", key);
    }

    #[test]
    fn web_game_session_cannot_start_twice() {
        let registry = registry();
        registry.lobby_login(Uuid::new_v4(), "alice");
        registry.start_web_game_session("alice", 1001).unwrap();
        assert!(registry.start_web_game_session("alice", 1001).is_err());
        let ended = registry.end_web_game_session("alice");
        assert!(ended.is_some());
        assert!(registry.end_web_game_session("alice").is_none());
    }
}
