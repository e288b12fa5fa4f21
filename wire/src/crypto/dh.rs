use num_bigint::BigUint;
use num_traits::{Num, One};
use rand::RngCore;

use crate::error::{Error, Result};

/// Size in bytes of the 1024-bit DH prime/public-key wire representation.
pub const DH_KEY_PAIR_DATA_SIZE: usize = 128;
/// Size in bytes of the shared-data transport frame sent during the
/// handshake (prime + public key together, per spec §6).
pub const DH_SHARED_DATA_SIZE: usize = 128;

const GENERATOR: u32 = 2;

/// RFC 3526 Group 2, 1024-bit MODP prime. Used as the default when a
/// process has no `diffie_hellman_key_pair` configured and generates one at
/// boot, matching the open question in the design notes (stability across
/// restarts is left to config, not hardcoded).
const DEFAULT_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD",
    "129024E088A67CC74020BBEA63B139B22514A08798E3404",
    "DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C",
    "245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406",
    "B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE",
    "45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD",
    "24CF5F83655D23DCA3AD961C62F356208552BB9ED529077",
    "096966D670C354E4ABC9804F1746C08CA18217C32905E46",
    "2E36CE3BE39E772C180E86039B2783A2EC07A28FB5C55DF",
    "06F4C52C9DE2BCBF6955817183995497CEA956AE515D225",
    "6378A0DE1C8A34344DD5E1C0B1B7E8B2FFFFFFFFFFFFFFFF",
);

/// One side's state in a Diffie-Hellman key exchange. Holds the private
/// exponent, which never travels on the wire, and the prime/public key,
/// which do.
pub struct DiffieHellman {
    prime: BigUint,
    private: BigUint,
    public: BigUint,
}

impl DiffieHellman {
    /// Generates a fresh private exponent against a prime, either the one
    /// supplied (from config) or the built-in default.
    pub fn generate(prime_hex: Option<&str>) -> Result<Self> {
        let prime = match prime_hex {
            Some(hex) => BigUint::from_str_radix(hex.trim(), 16)
                .map_err(|e| Error::Config(format!("invalid diffie_hellman_key_pair: {e}")))?,
            None => BigUint::from_str_radix(DEFAULT_PRIME_HEX, 16).expect("static prime is valid hex"),
        };

        let mut rng = rand::thread_rng();
        let mut priv_bytes = [0u8; DH_KEY_PAIR_DATA_SIZE];
        rng.fill_bytes(&mut priv_bytes);
        let private = BigUint::from_bytes_be(&priv_bytes) % (&prime - BigUint::one());
        let generator = BigUint::from(GENERATOR);
        let public = generator.modpow(&private, &prime);

        Ok(DiffieHellman {
            prime,
            private,
            public,
        })
    }

    pub fn prime_hex(&self) -> String {
        self.prime.to_str_radix(16)
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        pad_be(&self.public, DH_KEY_PAIR_DATA_SIZE)
    }

    pub fn prime_bytes(&self) -> Vec<u8> {
        pad_be(&self.prime, DH_KEY_PAIR_DATA_SIZE)
    }

    /// Computes `their_public ^ private mod prime` and returns the full
    /// shared secret. Callers derive the Blowfish key from its low 8 bytes.
    pub fn shared_secret(&self, their_public: &[u8]) -> Result<Vec<u8>> {
        if their_public.len() > DH_KEY_PAIR_DATA_SIZE {
            return Err(Error::Protocol("oversized DH public key".into()));
        }
        let their_public = BigUint::from_bytes_be(their_public);
        let secret = their_public.modpow(&self.private, &self.prime);
        Ok(pad_be(&secret, DH_KEY_PAIR_DATA_SIZE))
    }

    /// The low 8 bytes of the shared secret, used directly as the Blowfish
    /// key per spec §4.4/§6.
    pub fn blowfish_key(their_public: &[u8], dh: &DiffieHellman) -> Result<[u8; 8]> {
        let secret = dh.shared_secret(their_public)?;
        let mut key = [0u8; 8];
        let start = secret.len() - 8;
        key.copy_from_slice(&secret[start..]);
        Ok(key)
    }
}

fn pad_be(n: &BigUint, size: usize) -> Vec<u8> {
    let raw = n.to_bytes_be();
    if raw.len() >= size {
        return raw[raw.len() - size..].to_vec();
    }
    let mut out = vec![0u8; size - raw.len()];
    out.extend_from_slice(&raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_blowfish_key() {
        let server = DiffieHellman::generate(None).unwrap();
        let client = DiffieHellman::generate(Some(&server.prime_hex())).unwrap();

        let server_key = DiffieHellman::blowfish_key(&client.public_key_bytes(), &server).unwrap();
        let client_key = DiffieHellman::blowfish_key(&server.public_key_bytes(), &client).unwrap();

        assert_eq!(server_key, client_key);
    }
}
