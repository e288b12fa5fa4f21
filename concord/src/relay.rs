use wire::packet::Packet;
use wire::{Error, Result};

/// Mode tag for a relay envelope: what shape the mode-dependent payload
/// takes, and (for FAILURE) that this is a bounce rather than a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Failure,
    Account,
    Character,
    Cids,
    Party,
    Clan,
    Team,
}

impl RelayMode {
    fn to_u8(self) -> u8 {
        match self {
            RelayMode::Failure => 0,
            RelayMode::Account => 1,
            RelayMode::Character => 2,
            RelayMode::Cids => 3,
            RelayMode::Party => 4,
            RelayMode::Clan => 5,
            RelayMode::Team => 6,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RelayMode::Failure,
            1 => RelayMode::Account,
            2 => RelayMode::Character,
            3 => RelayMode::Cids,
            4 => RelayMode::Party,
            5 => RelayMode::Clan,
            6 => RelayMode::Team,
            other => return Err(Error::Protocol(format!("unknown relay mode {other}"))),
        })
    }
}

/// Mode-dependent addressing payload carried between the source world-cid
/// field and the original packet bytes.
#[derive(Debug, Clone)]
pub enum RelayTarget {
    /// FAILURE bounce: names of targets that could not be reached.
    Names(Vec<String>),
    Account(String),
    Character(String),
    Cids(Vec<i32>),
    Party(u32),
    Clan(i32),
    Team(i32),
}

/// Internal relay packet: world-mediated forwarding of a channel-to-channel
/// or channel-to-client message, with an optional bounce on failure.
#[derive(Debug, Clone)]
pub struct RelayEnvelope {
    pub source_world_cid: i32,
    pub target: RelayTarget,
    pub original_packet: Vec<u8>,
}

impl RelayEnvelope {
    pub fn mode(&self) -> RelayMode {
        match &self.target {
            RelayTarget::Names(_) => RelayMode::Failure,
            RelayTarget::Account(_) => RelayMode::Account,
            RelayTarget::Character(_) => RelayMode::Character,
            RelayTarget::Cids(_) => RelayMode::Cids,
            RelayTarget::Party(_) => RelayMode::Party,
            RelayTarget::Clan(_) => RelayMode::Clan,
            RelayTarget::Team(_) => RelayMode::Team,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut packet = Packet::new();
        packet.write_i32_le(self.source_world_cid)?;
        packet.write_u8(self.mode().to_u8())?;
        match &self.target {
            RelayTarget::Names(names) => {
                packet.write_u16_le(names.len() as u16)?;
                for name in names {
                    packet.write_string16(name)?;
                }
            }
            RelayTarget::Account(name) | RelayTarget::Character(name) => {
                packet.write_string16(name)?;
            }
            RelayTarget::Cids(cids) => {
                packet.write_u16_le(cids.len() as u16)?;
                for cid in cids {
                    packet.write_i32_le(*cid)?;
                }
            }
            RelayTarget::Party(id) => packet.write_u32_le(*id)?,
            RelayTarget::Clan(id) => packet.write_i32_le(*id)?,
            RelayTarget::Team(id) => packet.write_i32_le(*id)?,
        }
        packet.write_bytes(&self.original_packet)?;
        Ok(packet.into_bytes())
    }

    pub fn decode(bytes: Vec<u8>) -> Result<Self> {
        let mut packet = Packet::from_bytes(bytes);
        let source_world_cid = packet.read_i32_le()?;
        let mode = RelayMode::from_u8(packet.read_u8()?)?;
        let target = match mode {
            RelayMode::Failure => {
                let count = packet.read_u16_le()?;
                let mut names = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    names.push(packet.read_string16()?);
                }
                RelayTarget::Names(names)
            }
            RelayMode::Account => RelayTarget::Account(packet.read_string16()?),
            RelayMode::Character => RelayTarget::Character(packet.read_string16()?),
            RelayMode::Cids => {
                let count = packet.read_u16_le()?;
                let mut cids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    cids.push(packet.read_i32_le()?);
                }
                RelayTarget::Cids(cids)
            }
            RelayMode::Party => RelayTarget::Party(packet.read_u32_le()?),
            RelayMode::Clan => RelayTarget::Clan(packet.read_i32_le()?),
            RelayMode::Team => RelayTarget::Team(packet.read_i32_le()?),
        };
        let original_packet = packet.read_bytes(packet.remaining())?;
        Ok(RelayEnvelope {
            source_world_cid,
            target,
            original_packet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cids_relay_round_trips() {
        let envelope = RelayEnvelope {
            source_world_cid: 7,
            target: RelayTarget::Cids(vec![42, 43]),
            original_packet: vec![1, 2, 3, 4],
        };
        let bytes = envelope.encode().unwrap();
        let decoded = RelayEnvelope::decode(bytes).unwrap();
        assert_eq!(decoded.source_world_cid, 7);
        assert!(matches!(decoded.target, RelayTarget::Cids(ref v) if v == &vec![42, 43]));
        assert_eq!(decoded.original_packet, vec![1, 2, 3, 4]);
    }

    #[test]
    fn failure_bounce_round_trips() {
        let envelope = RelayEnvelope {
            source_world_cid: 1,
            target: RelayTarget::Names(vec!["alice".into(), "bob".into()]),
            original_packet: vec![9, 9],
        };
        let bytes = envelope.encode().unwrap();
        let decoded = RelayEnvelope::decode(bytes).unwrap();
        assert!(matches!(decoded.target, RelayTarget::Names(ref v) if v.len() == 2));
    }
}
