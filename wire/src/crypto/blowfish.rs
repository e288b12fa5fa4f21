use blowfish::Blowfish;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};

use crate::error::{Error, Result};

type Encryptor = ecb::Encryptor<Blowfish>;
type Decryptor = ecb::Decryptor<Blowfish>;

/// Wraps the 64-bit Blowfish key derived from the DH handshake. Every
/// encrypted frame after the handshake is ECB-Blowfish with PKCS7 padding —
/// the "Blowfish-padded garbage" trailing the real-size header in spec §4.4.
pub struct BlowfishCipher {
    key: [u8; 8],
}

impl BlowfishCipher {
    pub fn new(key: [u8; 8]) -> Self {
        BlowfishCipher { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Encryptor::new_from_slice(&self.key)
            .expect("8-byte key is a valid Blowfish key length")
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Decryptor::new_from_slice(&self.key)
            .expect("8-byte key is a valid Blowfish key length")
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| Error::Protocol(format!("blowfish padding error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_length_payloads() {
        let cipher = BlowfishCipher::new([1, 2, 3, 4, 5, 6, 7, 8]);
        for payload in [&b""[..], b"a", b"hello world", &[0u8; 257]] {
            let ct = cipher.encrypt(payload);
            let pt = cipher.decrypt(&ct).unwrap();
            assert_eq!(pt, payload);
        }
    }
}
