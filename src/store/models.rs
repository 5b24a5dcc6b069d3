use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::payloads::GameKind;

/// Which account namespace a principal belongs to. Player and developer
/// usernames are independent; a collision across the two is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Player,
    Developer,
}

impl PrincipalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::Player => "player",
            PrincipalKind::Developer => "developer",
        }
    }

    pub(crate) fn account_table(self) -> &'static str {
        match self {
            PrincipalKind::Player => "players",
            PrincipalKind::Developer => "developers",
        }
    }

    pub(crate) fn session_table(self) -> &'static str {
        match self {
            PrincipalKind::Player => "player_sessions",
            PrincipalKind::Developer => "developer_sessions",
        }
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub kind: PrincipalKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Inactive,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Active => "active",
            GameStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(GameStatus::Active),
            "inactive" => Some(GameStatus::Inactive),
            _ => None,
        }
    }
}

/// A catalog entry. `download_count`, `average_rating`, and `rating_count`
/// are cached aggregates, refreshed whenever a download is recorded or a
/// review upserted.
#[derive(Debug, Clone)]
pub struct Game {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub developer_id: i64,
    pub current_version: String,
    pub min_players: u32,
    pub max_players: u32,
    pub game_type: GameKind,
    pub status: GameStatus,
    pub download_count: i64,
    pub average_rating: f64,
    pub rating_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }

    /// Rating as projected to clients: one decimal.
    pub fn rating_rounded(&self) -> f64 {
        (self.average_rating * 10.0).round() / 10.0
    }
}

/// Fields for a new catalog entry.
#[derive(Debug, Clone)]
pub struct NewGame {
    pub name: String,
    pub description: String,
    pub developer_id: i64,
    pub version: String,
    pub min_players: u32,
    pub max_players: u32,
    pub game_type: GameKind,
}

/// One published version of a game. Append-only.
#[derive(Debug, Clone)]
pub struct GameVersion {
    pub game_id: i64,
    pub version: String,
    pub changelog: String,
    pub file_path: String,
    pub file_size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A review joined with the reviewer's username.
#[derive(Debug, Clone)]
pub struct Review {
    pub game_id: i64,
    pub player_id: i64,
    pub username: String,
    pub rating: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Closed,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(RoomStatus::Waiting),
            "playing" => Some(RoomStatus::Playing),
            "closed" => Some(RoomStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: i64,
    pub game_id: i64,
    pub host_id: i64,
    pub name: String,
    pub room_code: String,
    pub max_players: u32,
    pub current_players: u32,
    pub status: RoomStatus,
    pub game_port: Option<u16>,
    pub created_at: DateTime<Utc>,
}

/// A room as shown in the lobby's room list, joined with game and host.
#[derive(Debug, Clone)]
pub struct RoomListing {
    pub room: Room,
    pub game_name: String,
    pub host_name: String,
}

/// A member of a room.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub player_id: i64,
    pub username: String,
}

/// One entry of a player's download history, joined with the game.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub game_id: i64,
    pub game_name: String,
    pub version: String,
    pub downloaded_at: DateTime<Utc>,
}
