use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::MAX_PACKET_SIZE;

/// Append/read byte buffer with a movable cursor. Every command-code packet
/// that crosses the wire is built and parsed through this type; the relay
/// envelope and the data-sync payload both lean on its LE/BE readers.
///
/// Invariant: `cursor <= size <= capacity`. `capacity` is fixed at
/// construction and exceeding it is a protocol error, not a panic.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    buf: Vec<u8>,
    cursor: usize,
    capacity: usize,
}

impl Packet {
    pub fn new() -> Self {
        Packet {
            buf: Vec::new(),
            cursor: 0,
            capacity: MAX_PACKET_SIZE,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Packet {
            buf: Vec::with_capacity(capacity.min(MAX_PACKET_SIZE)),
            cursor: 0,
            capacity,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let capacity = bytes.len().max(MAX_PACKET_SIZE);
        Packet {
            buf: bytes,
            cursor: 0,
            capacity,
        }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.cursor)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.cursor = 0;
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(Error::Protocol("seek past end of packet".into()));
        }
        self.cursor = pos;
        Ok(())
    }

    fn ensure_capacity(&self, additional: usize) -> Result<()> {
        if self.buf.len() + additional > self.capacity {
            return Err(Error::Protocol("packet exceeds capacity".into()));
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.ensure_capacity(1)?;
        self.buf.push(v);
        Ok(())
    }

    pub fn write_u16_le(&mut self, v: u16) -> Result<()> {
        self.ensure_capacity(2)?;
        let mut tmp = [0u8; 2];
        LittleEndian::write_u16(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u16_be(&mut self, v: u16) -> Result<()> {
        self.ensure_capacity(2)?;
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.ensure_capacity(4)?;
        let mut tmp = [0u8; 4];
        LittleEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u32_be(&mut self, v: u32) -> Result<()> {
        self.ensure_capacity(4)?;
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_i32_le(&mut self, v: i32) -> Result<()> {
        self.write_u32_le(v as u32)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Length-prefixed (u16 LE) UTF-8 string, the shape every `*-name`
    /// field on the wire uses.
    pub fn write_string16(&mut self, s: &str) -> Result<()> {
        if s.len() > u16::MAX as usize {
            return Err(Error::Protocol("string too long for u16 length prefix".into()));
        }
        self.write_u16_le(s.len() as u16)?;
        self.write_bytes(s.as_bytes())
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.cursor + n > self.buf.len() {
            return Err(Error::Protocol("read past end of packet".into()));
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.buf[start..start + n])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn read_string16(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut p = Packet::new();
        p.write_u16_le(0xbeef).unwrap();
        p.write_i32_le(-7).unwrap();
        p.write_string16("hello").unwrap();
        p.rewind();
        assert_eq!(p.read_u16_le().unwrap(), 0xbeef);
        assert_eq!(p.read_i32_le().unwrap(), -7);
        assert_eq!(p.read_string16().unwrap(), "hello");
    }

    #[test]
    fn read_past_end_is_protocol_error() {
        let mut p = Packet::new();
        p.write_u8(1).unwrap();
        p.rewind();
        p.read_u8().unwrap();
        assert!(p.read_u8().is_err());
    }

    #[test]
    fn oversize_write_is_rejected() {
        let mut p = Packet::with_capacity(4);
        assert!(p.write_bytes(&[0u8; 5]).is_err());
    }
}
