//! Logical message contract.
//!
//! Every message is an [`Envelope`]: a type string plus an opaque JSON payload.
//! Requests are built from [`ClientRequest`]; inbound payload shapes live here
//! so tests and tools can produce them, while routing by type string is the
//! client dispatcher's job.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entity::{BaseId, PlayerId, ProjectileId, UnitId};

/// Typed, opaque-payload message unit exchanged with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Requests the client sends. Fire-and-forget: replies arrive later as
/// independent inbound envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    SetName { name: String },
    GetProfile,
    ListMinis,
    ListMaps,
    GetGuild,
    GetFriends,
    PauseGame,
    ResumeGame,
    RestartMatch,
    SurrenderMatch,
}

impl ClientRequest {
    /// Requests issued once after every successful (re)connection.
    pub fn initial_sequence(name: &str) -> Vec<ClientRequest> {
        vec![
            ClientRequest::SetName {
                name: name.to_string(),
            },
            ClientRequest::GetProfile,
            ClientRequest::ListMinis,
            ClientRequest::ListMaps,
            ClientRequest::GetGuild,
            ClientRequest::GetFriends,
        ]
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::SetName { .. } => "SetName",
            ClientRequest::GetProfile => "GetProfile",
            ClientRequest::ListMinis => "ListMinis",
            ClientRequest::ListMaps => "ListMaps",
            ClientRequest::GetGuild => "GetGuild",
            ClientRequest::GetFriends => "GetFriends",
            ClientRequest::PauseGame => "PauseGame",
            ClientRequest::ResumeGame => "ResumeGame",
            ClientRequest::RestartMatch => "RestartMatch",
            ClientRequest::SurrenderMatch => "SurrenderMatch",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            ClientRequest::SetName { name } => json!({ "name": name }),
            _ => json!({}),
        };
        Envelope::new(self.kind(), payload)
    }
}

/// Inbound envelope type strings understood by this client.
pub mod inbound {
    pub const ROOM_JOINED: &str = "RoomJoined";
    pub const STATE_UPDATE: &str = "StateUpdate";
    pub const UNIT_SPAWNED: &str = "UnitSpawned";
    pub const UNIT_REMOVED: &str = "UnitRemoved";
    pub const PROJECTILE_SPAWNED: &str = "ProjectileSpawned";
    pub const GAME_PAUSED: &str = "GamePaused";
    pub const GAME_RESUMED: &str = "GameResumed";
    pub const GAME_OVER: &str = "GameOver";
    pub const LEFT_ROOM: &str = "LeftRoom";
    pub const PROFILE: &str = "Profile";
    pub const MINI_LIST: &str = "MiniList";
    pub const MAP_LIST: &str = "MapList";
    pub const GUILD_INFO: &str = "GuildInfo";
    pub const FRIEND_LIST: &str = "FriendList";
    pub const ERROR: &str = "Error";
}

/// Authoritative state of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub id: UnitId,
    pub name: String,
    pub class: String,
    pub owner: PlayerId,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub max_hp: i32,
    /// Attack range in pixels; zero for units that never shoot.
    #[serde(default)]
    pub range: f32,
}

/// Authoritative state of one base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseSnapshot {
    pub id: BaseId,
    pub owner: PlayerId,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub hp: i32,
    pub max_hp: i32,
}

/// A projectile the server streams explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub id: ProjectileId,
    pub x: f32,
    pub y: f32,
    pub tx: f32,
    pub ty: f32,
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Periodic world state. `projectiles` is absent when the server does not
/// stream them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub units: Vec<UnitState>,
    #[serde(default)]
    pub bases: Vec<BaseSnapshot>,
    #[serde(default)]
    pub projectiles: Option<Vec<ProjectileState>>,
    /// Units that died since the previous update.
    #[serde(default)]
    pub removed: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoined {
    pub room_id: String,
    pub player_id: PlayerId,
}

/// A freshly deployed unit, animated in from `from_x, from_y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpawned {
    pub unit: UnitState,
    pub from_x: f32,
    pub from_y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRemoved {
    pub id: UnitId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOver {
    pub winner: PlayerId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub name: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub gold: u64,
    #[serde(default)]
    pub trophies: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniInfo {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub cost: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiniList {
    #[serde(default)]
    pub minis: Vec<MiniInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapList {
    #[serde(default)]
    pub maps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub name: String,
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FriendList {
    #[serde(default)]
    pub friends: Vec<FriendInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}
