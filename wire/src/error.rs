use std::io;

/// Crate-wide error type. Variants line up with the error kinds catalogued
/// for the core: connection failures stay local to one connection, sync
/// failures drop a record and keep going, everything else is handled by the
/// caller's own recovery path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid operation for current state: {0}")]
    State(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serdeconv::Error> for Error {
    fn from(e: serdeconv::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Per-connection errors never tear down the owning worker; this marks
    /// which variants are expected to just close the one connection.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Protocol(_) | Error::Auth(_) | Error::State(_)
        )
    }
}
