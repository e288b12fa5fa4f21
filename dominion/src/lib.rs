//! World-side registries and group subsystems (C8-C10): account and
//! character session tracking, party/clan/team membership, and the PvP
//! match queue.

pub mod account;
pub mod character;
pub mod clan;
pub mod match_queue;
pub mod party;
pub mod team;

pub use account::{AccountLogin, AccountRegistry, LoginState, LogoutHooks, WebGameSession};
pub use character::{CharacterLogin, CharacterRegistry, CharacterStatus, DeletionHooks, FriendSource, NoFriends, RELATED_CLAN, RELATED_FRIENDS, RELATED_PARTY, RELATED_TEAM};
pub use clan::{ClanHooks, ClanInfo, ClanMember, ClanMemberType, ClanRegistry, MAX_CLAN_COUNT};
pub use match_queue::{MatchChannelPolicy, MatchEntry, MatchQueueManager, PvpMatch, PvpTypeConfig, QueueKind};
pub use party::{AcceptOutcome, DepartureOutcome, DropRule, Party, PartyHooks, PartyRegistry, MAX_PARTY_MEMBERS};
pub use team::{Team, TeamCategory, TeamHooks, TeamRegistry, LARGE_ZIOTITE_CAP, SMALL_ZIOTITE_PER_MEMBER_CAP};
