use byteorder::{BigEndian, ByteOrder, LittleEndian};

use wire::crypto::BlowfishCipher;
use wire::{Error, Result, MAX_PACKET_SIZE};

/// 8-byte magic opening the server's half of the DH handshake, ahead of the
/// prime and the server's public key.
pub const HANDSHAKE_MAGIC: [u8; 8] = *b"CRHSHAKE";

/// `(2, 8)` extension magic: ping/pong, permitted before encryption.
pub const EXTENSION_PING_MAGIC: u32 = 2;
/// `3 | port << 16` extension magic: world-up notification.
pub const EXTENSION_WORLD_UP_TAG: u32 = 3;
pub const EXTENSION_FRAME_SIZE: usize = 8;

/// A frame permitted on the wire before the Blowfish key is established:
/// a liveness ping/pong, or a World announcing its listening port to the
/// Lobby without bringing up a full encrypted channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionFrame {
    Ping,
    WorldUp { port: u16 },
}

impl ExtensionFrame {
    pub fn encode(self) -> [u8; EXTENSION_FRAME_SIZE] {
        let magic = match self {
            ExtensionFrame::Ping => EXTENSION_PING_MAGIC,
            ExtensionFrame::WorldUp { port } => EXTENSION_WORLD_UP_TAG | ((port as u32) << 16),
        };
        let mut buf = [0u8; EXTENSION_FRAME_SIZE];
        BigEndian::write_u32(&mut buf[0..4], magic);
        BigEndian::write_u32(&mut buf[4..8], EXTENSION_FRAME_SIZE as u32);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < EXTENSION_FRAME_SIZE {
            return None;
        }
        let magic = BigEndian::read_u32(&bytes[0..4]);
        let size = BigEndian::read_u32(&bytes[4..8]);
        if size as usize != EXTENSION_FRAME_SIZE {
            return None;
        }
        if magic == EXTENSION_PING_MAGIC {
            return Some(ExtensionFrame::Ping);
        }
        if magic & 0xFFFF == EXTENSION_WORLD_UP_TAG {
            let port = (magic >> 16) as u16;
            return Some(ExtensionFrame::WorldUp { port });
        }
        None
    }
}

/// Length of the length-prefix header: two little-endian u16 copies of the
/// same padded size.
pub const FRAME_HEADER_SIZE: usize = 4;
/// Length of the real-size field opening the plaintext payload.
pub const REAL_SIZE_FIELD: usize = 4;

/// Reads the 4-byte length header if enough bytes are buffered. Both copies
/// of the padded size must agree.
pub fn read_header(bytes: &[u8]) -> Result<Option<u16>> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let a = LittleEndian::read_u16(&bytes[0..2]);
    let b = LittleEndian::read_u16(&bytes[2..4]);
    if a != b {
        return Err(Error::Protocol("mismatched padded-size header".into()));
    }
    Ok(Some(a))
}

/// Encrypts and frames a plaintext payload for the wire: `real-size` header
/// plus payload, Blowfish-encrypted (ECB/PKCS7 padding supplies the
/// trailing garbage), prefixed with the doubled padded-size header.
pub fn encode_packet(cipher: &BlowfishCipher, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() + REAL_SIZE_FIELD > MAX_PACKET_SIZE {
        return Err(Error::Protocol("packet exceeds MAX_PACKET_SIZE".into()));
    }
    let mut plain = Vec::with_capacity(REAL_SIZE_FIELD + payload.len());
    let mut real_size = [0u8; 4];
    LittleEndian::write_u32(&mut real_size, payload.len() as u32);
    plain.extend_from_slice(&real_size);
    plain.extend_from_slice(payload);

    let encrypted = cipher.encrypt(&plain);
    if encrypted.len() > u16::MAX as usize {
        return Err(Error::Protocol("encrypted packet too large to frame".into()));
    }
    let padded_size = encrypted.len() as u16;

    let mut framed = Vec::with_capacity(FRAME_HEADER_SIZE + encrypted.len());
    let mut header = [0u8; 2];
    LittleEndian::write_u16(&mut header, padded_size);
    framed.extend_from_slice(&header);
    framed.extend_from_slice(&header);
    framed.extend_from_slice(&encrypted);
    Ok(framed)
}

/// Decrypts a padded ciphertext body (everything after the 4-byte header)
/// and strips the real-size field, returning the command-code-prefixed
/// payload.
pub fn decode_packet(cipher: &BlowfishCipher, encrypted: &[u8]) -> Result<Vec<u8>> {
    let plain = cipher.decrypt(encrypted)?;
    if plain.len() < REAL_SIZE_FIELD {
        return Err(Error::Protocol("decrypted packet missing real-size header".into()));
    }
    let real_size = LittleEndian::read_u32(&plain[0..4]) as usize;
    if real_size > plain.len() - REAL_SIZE_FIELD {
        return Err(Error::Protocol("real-size exceeds decrypted payload".into()));
    }
    if real_size + REAL_SIZE_FIELD > MAX_PACKET_SIZE {
        return Err(Error::Protocol("packet exceeds MAX_PACKET_SIZE".into()));
    }
    Ok(plain[REAL_SIZE_FIELD..REAL_SIZE_FIELD + real_size].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_frame_round_trips() {
        let ping = ExtensionFrame::Ping;
        assert_eq!(ExtensionFrame::decode(&ping.encode()), Some(ping));

        let up = ExtensionFrame::WorldUp { port: 18667 };
        assert_eq!(ExtensionFrame::decode(&up.encode()), Some(up));
    }

    #[test]
    fn packet_framing_round_trips() {
        let cipher = BlowfishCipher::new([9, 8, 7, 6, 5, 4, 3, 2]);
        let payload = b"\x01\x02hello world";
        let framed = encode_packet(&cipher, payload).unwrap();
        let padded_size = read_header(&framed).unwrap().unwrap();
        assert_eq!(padded_size as usize, framed.len() - FRAME_HEADER_SIZE);
        let decoded = decode_packet(&cipher, &framed[FRAME_HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let cipher = BlowfishCipher::new([0; 8]);
        let big = vec![0u8; MAX_PACKET_SIZE];
        assert!(encode_packet(&cipher, &big).is_err());
    }
}
