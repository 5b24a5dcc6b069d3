//! Typed request payloads.
//!
//! Bodies arrive as generic JSON; each handler decodes the record it
//! expects with [`parse`], so a missing required field surfaces as a
//! protocol error for that one request instead of poisoning the connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decode a request body into its typed record.
pub fn parse<T: DeserializeOwned>(body: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(body)
}

/// `AUTH_REQUEST` / `REGISTER_REQUEST` for both principal namespaces.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
}

/// `GAME_DETAIL_REQUEST`.
#[derive(Debug, Deserialize)]
pub struct GameDetailRequest {
    pub game_id: i64,
}

/// `DOWNLOAD_REQUEST`; `version` defaults to the latest.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub game_id: i64,
    #[serde(default)]
    pub version: Option<String>,
}

/// `CHECK_UPDATE`.
#[derive(Debug, Deserialize)]
pub struct CheckUpdateRequest {
    pub game_id: i64,
    pub current_version: String,
}

/// `CREATE_ROOM`; name defaults to "<username>'s Room", capacity to 4.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub game_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub max_players: Option<u32>,
}

/// `JOIN_ROOM` / `LEAVE_ROOM` / `START_GAME_REQUEST`.
#[derive(Debug, Deserialize)]
pub struct RoomRequest {
    pub room_id: i64,
}

/// `SUBMIT_REVIEW`.
#[derive(Debug, Deserialize)]
pub struct SubmitReviewRequest {
    pub game_id: i64,
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

/// `GET_REVIEWS`.
#[derive(Debug, Deserialize)]
pub struct GetReviewsRequest {
    pub game_id: i64,
    #[serde(default = "default_review_limit")]
    pub limit: u32,
}

fn default_review_limit() -> u32 {
    20
}

/// Whether a game ships a terminal or a windowed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Cli,
    Gui,
}

impl GameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GameKind::Cli => "cli",
            GameKind::Gui => "gui",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cli" => Some(GameKind::Cli),
            "gui" => Some(GameKind::Gui),
            _ => None,
        }
    }
}

/// `UPLOAD_START` for a brand-new game.
#[derive(Debug, Deserialize)]
pub struct UploadStartRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_player_bound")]
    pub min_players: u32,
    #[serde(default = "default_player_bound")]
    pub max_players: u32,
    #[serde(default = "default_game_kind")]
    pub game_type: GameKind,
    pub file_size: u64,
    pub checksum: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_player_bound() -> u32 {
    2
}

fn default_game_kind() -> GameKind {
    GameKind::Cli
}

/// `UPLOAD_CHUNK` (either direction of transfer uses hex-encoded data).
#[derive(Debug, Deserialize)]
pub struct UploadChunkRequest {
    #[serde(default)]
    pub offset: u64,
    pub data: String,
}

/// `UPDATE_GAME`: new version of an existing game, then the same chunk flow.
#[derive(Debug, Deserialize)]
pub struct UpdateGameRequest {
    pub game_id: i64,
    pub new_version: String,
    #[serde(default = "default_update_changelog")]
    pub changelog: String,
    pub file_size: u64,
    pub checksum: String,
}

fn default_update_changelog() -> String {
    "Update".to_string()
}

/// `REMOVE_GAME`.
#[derive(Debug, Deserialize)]
pub struct RemoveGameRequest {
    pub game_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_missing_password_is_error() {
        let result: Result<Credentials, _> = parse(json!({"username": "alice"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_upload_start_defaults() {
        let req: UploadStartRequest = parse(json!({
            "name": "Connect4",
            "file_size": 1024,
            "checksum": "ab"
        }))
        .unwrap();

        assert_eq!(req.version, "1.0.0");
        assert_eq!(req.min_players, 2);
        assert_eq!(req.max_players, 2);
        assert_eq!(req.game_type, GameKind::Cli);
        assert_eq!(req.description, "");
    }

    #[test]
    fn test_download_request_optional_version() {
        let req: DownloadRequest = parse(json!({"game_id": 3})).unwrap();
        assert!(req.version.is_none());

        let req: DownloadRequest = parse(json!({"game_id": 3, "version": "1.2.0"})).unwrap();
        assert_eq!(req.version.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_game_kind_round_trip() {
        assert_eq!(GameKind::from_str("cli"), Some(GameKind::Cli));
        assert_eq!(GameKind::from_str("gui"), Some(GameKind::Gui));
        assert_eq!(GameKind::from_str("vr"), None);
        assert_eq!(GameKind::Gui.as_str(), "gui");
    }
}
