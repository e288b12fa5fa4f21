//! Server-to-server command codes. Only the internal, cluster-coordination
//! codes the core dispatches on are named here — the client-facing opcode
//! catalog (skills, movement, chat) is an external identifier space this
//! crate never enumerates.

pub const PACKET_GET_WORLD_INFO: u16 = 0x1001;
pub const PACKET_SET_WORLD_INFO: u16 = 0x1002;
pub const PACKET_SET_CHANNEL_INFO: u16 = 0x1003;
pub const PACKET_ACCOUNT_LOGIN: u16 = 0x1004;
pub const PACKET_ACCOUNT_LOGOUT: u16 = 0x1005;
pub const PACKET_RELAY: u16 = 0x1006;
pub const PACKET_DATA_SYNC: u16 = 0x1007;
pub const PACKET_CHARACTER_LOGIN: u16 = 0x1008;
pub const PACKET_FRIENDS_UPDATE: u16 = 0x1009;
pub const PACKET_PARTY_UPDATE: u16 = 0x100A;
pub const PACKET_CLAN_UPDATE: u16 = 0x100B;
pub const PACKET_WEB_GAME: u16 = 0x100C;
pub const PACKET_TEAM_UPDATE: u16 = 0x100D;

/// Contextual action tag shared by the group-update command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Update,
    Remove,
    YnRequest,
    ResponseYes,
    ResponseNo,
    GroupList,
    GroupLeave,
    GroupDisband,
    GroupLeaderUpdate,
    GroupKick,
    ClanEmblemUpdate,
    PartyDropRule,
}

impl Action {
    pub fn to_u8(self) -> u8 {
        match self {
            Action::Add => 1,
            Action::Update => 2,
            Action::Remove => 3,
            Action::YnRequest => 4,
            Action::ResponseYes => 5,
            Action::ResponseNo => 6,
            Action::GroupList => 7,
            Action::GroupLeave => 8,
            Action::GroupDisband => 9,
            Action::GroupLeaderUpdate => 10,
            Action::GroupKick => 11,
            Action::ClanEmblemUpdate => 12,
            Action::PartyDropRule => 13,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Action::Add,
            2 => Action::Update,
            3 => Action::Remove,
            4 => Action::YnRequest,
            5 => Action::ResponseYes,
            6 => Action::ResponseNo,
            7 => Action::GroupList,
            8 => Action::GroupLeave,
            9 => Action::GroupDisband,
            10 => Action::GroupLeaderUpdate,
            11 => Action::GroupKick,
            12 => Action::ClanEmblemUpdate,
            13 => Action::PartyDropRule,
            _ => return None,
        })
    }
}

/// Bitmask for `PACKET_CHARACTER_LOGIN`; fields present in a given packet
/// are written from lowest to highest value listed here.
pub mod character_login_flag {
    pub const STATUS: u8 = 0x01;
    pub const ZONE: u8 = 0x02;
    pub const CHANNEL: u8 = 0x04;
    pub const BASIC: u8 = 0x07;
    pub const MESSAGE: u8 = 0x08;
    pub const FRIEND_UNKNOWN: u8 = 0x10;
    pub const FRIEND_FLAGS: u8 = 0x1F;
    pub const PARTY_INFO: u8 = 0x20;
    pub const PARTY_DEMON_INFO: u8 = 0x40;
    pub const PARTY_ICON: u8 = 0x80;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips() {
        for raw in 1..=13u8 {
            let action = Action::from_u8(raw).unwrap();
            assert_eq!(action.to_u8(), raw);
        }
    }
}
