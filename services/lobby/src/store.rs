use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// The record Lobby is authoritative for (spec §3's Account). Password
/// hashing is its own concern this crate does not prescribe — `password_hash`
/// is compared directly by the in-memory store, a stand-in the way
/// `concord::object::InMemoryDatabase` stands in for a real database.
#[derive(Debug, Clone)]
pub struct Account {
    pub uuid: Uuid,
    pub username: String,
    pub password_hash: String,
    pub last_login: Option<u64>,
    pub banned: bool,
}

pub trait AccountStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> Option<Account>;
    fn touch_last_login(&self, uuid: Uuid);
}

pub struct InMemoryAccountStore {
    accounts: Mutex<HashMap<String, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryAccountStore {
            accounts: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, username: &str, password_hash: &str) -> Uuid {
        let key = username.to_lowercase();
        let uuid = Uuid::new_v4();
        self.accounts.lock().insert(
            key.clone(),
            Account {
                uuid,
                username: key,
                password_hash: password_hash.to_string(),
                last_login: None,
                banned: false,
            },
        );
        uuid
    }
}

impl AccountStore for InMemoryAccountStore {
    fn find_by_username(&self, username: &str) -> Option<Account> {
        self.accounts.lock().get(&username.to_lowercase()).cloned()
    }

    fn touch_last_login(&self, uuid: Uuid) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let mut accounts = self.accounts.lock();
        if let Some(account) = accounts.values_mut().find(|a| a.uuid == uuid) {
            account.last_login = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let store = InMemoryAccountStore::new();
        store.register("Alice", "hunter2");
        assert!(store.find_by_username("alice").is_some());
        assert!(store.find_by_username("ALICE").is_some());
    }

    #[test]
    fn unknown_username_returns_none() {
        let store = InMemoryAccountStore::new();
        assert!(store.find_by_username("nobody").is_none());
    }
}
