//! Shared wire-level types used by every process in the cluster: the byte-level
//! packet codec, the DH/Blowfish transport crypto, process bootstrap helpers
//! (logging, config loading) and the crate-wide error type.

pub mod codes;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod packet;
pub mod time;

pub use error::{Error, Result};

/// Protocol identifier exchanged during the extension handshake. Bumped
/// whenever the framing in [`packet`] changes incompatibly.
pub const PROTOCOL_ID: u16 = 0x1000;

/// Hard cap on a single packet's real payload size, per spec.
pub const MAX_PACKET_SIZE: usize = 16 * 1024;
