//! Out-of-match data cached from server replies.
//!
//! Filled by the replies to the initial request sequence. Menus and the shop
//! read from here; nothing in the core makes decisions on it.

use arena_shared::protocol::{FriendInfo, GuildInfo, MiniInfo, ProfileInfo};

#[derive(Debug, Clone, Default)]
pub struct LobbyState {
    pub profile: Option<ProfileInfo>,
    pub minis: Vec<MiniInfo>,
    pub maps: Vec<String>,
    pub guild: Option<GuildInfo>,
    pub friends: Vec<FriendInfo>,
    /// Last error text the server reported.
    pub last_error: Option<String>,
}

impl LobbyState {
    pub fn online_friends(&self) -> impl Iterator<Item = &FriendInfo> {
        self.friends.iter().filter(|f| f.online)
    }
}
