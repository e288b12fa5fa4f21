use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One of the two database roles the core consumes but never implements: a
/// lobby/world split over the same small set of engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite3,
    Mariadb,
}

impl Default for DatabaseType {
    fn default() -> Self {
        DatabaseType::Sqlite3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub database_type: DatabaseType,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            database_type: DatabaseType::default(),
            address: String::new(),
            name: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Fields shared by every process's config file. Each binary wraps this in
/// its own `Config` with process-specific additions (see the `services/*`
/// crates) the way `game::core::config::GameConfig` wraps its own `Server`
/// section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub port: u16,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default)]
    pub multithread_mode: bool,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Optional precomputed DH prime, hex-encoded. Generated at boot if
    /// absent, per the open question in the design notes.
    #[serde(default)]
    pub diffie_hellman_key_pair: Option<String>,
    #[serde(default = "default_pvp_queue_wait")]
    pub pvp_queue_wait_secs: u64,
    #[serde(default)]
    pub pvp_ghosts: std::collections::HashMap<u8, u8>,
    #[serde(default = "default_channel_connection_timeout")]
    pub channel_connection_timeout_secs: u64,
    #[serde(default)]
    pub data_store: Vec<String>,
    #[serde(default)]
    pub server_constants_path: Option<String>,
}

fn default_listen_address() -> String {
    "any".to_string()
}

fn default_pvp_queue_wait() -> u64 {
    10
}

fn default_channel_connection_timeout() -> u64 {
    30
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            port: 18666,
            listen_address: default_listen_address(),
            multithread_mode: true,
            database: DatabaseConfig::default(),
            diffie_hellman_key_pair: None,
            pvp_queue_wait_secs: default_pvp_queue_wait(),
            pvp_ghosts: std::collections::HashMap::new(),
            channel_connection_timeout_secs: default_channel_connection_timeout(),
            data_store: Vec::new(),
            server_constants_path: None,
        }
    }
}

impl CoreConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serdeconv::from_toml_file(path)?)
    }
}
