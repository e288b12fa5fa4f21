//! Transport crypto: a classic (non-ECC) Diffie-Hellman key exchange that
//! derives a 64-bit Blowfish key, used to bring up the encrypted
//! server-to-server and client-to-server connection described by the core.
//! The DH primitive itself is treated as a library dependency, not something
//! this crate specifies from scratch — `num-bigint`'s modexp is the
//! idiomatic stand-in for the OpenSSL `DH` the original server used.

pub mod blowfish;
pub mod dh;

pub use blowfish::BlowfishCipher;
pub use dh::{DiffieHellman, DH_KEY_PAIR_DATA_SIZE, DH_SHARED_DATA_SIZE};
