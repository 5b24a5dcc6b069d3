/// The closed set of message tags, grouped by domain.
///
/// Wire values are stable: clients and game artifacts are built against
/// them, so variants are never renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    // Authentication (0x00XX)
    AuthRequest = 0x0001,
    AuthResponse = 0x0002,
    RegisterRequest = 0x0003,
    RegisterResponse = 0x0004,
    Logout = 0x0005,

    // Game store browsing (0x01XX)
    GameListRequest = 0x0101,
    GameListResponse = 0x0102,
    GameDetailRequest = 0x0103,
    GameDetailResponse = 0x0104,
    SearchGames = 0x0105,

    // Download management (0x02XX)
    DownloadRequest = 0x0201,
    DownloadMeta = 0x0202,
    DownloadChunk = 0x0203,
    DownloadComplete = 0x0204,
    CheckUpdate = 0x0205,
    UpdateAvailable = 0x0206,

    // Room management (0x03XX)
    CreateRoom = 0x0301,
    RoomCreated = 0x0302,
    JoinRoom = 0x0303,
    RoomJoined = 0x0304,
    LeaveRoom = 0x0305,
    RoomListRequest = 0x0306,
    RoomListResponse = 0x0307,
    StartGameRequest = 0x0308,
    GameStarted = 0x0309,
    RoomUpdate = 0x030A,

    // Review system (0x04XX)
    SubmitReview = 0x0401,
    ReviewSubmitted = 0x0402,
    GetReviews = 0x0403,
    ReviewsResponse = 0x0404,

    // Developer operations (0x05XX)
    UploadStart = 0x0501,
    UploadReady = 0x0502,
    UploadChunk = 0x0503,
    UploadComplete = 0x0504,
    UploadSuccess = 0x0505,
    UpdateGame = 0x0506,
    UpdateSuccess = 0x0507,
    RemoveGame = 0x0508,
    RemoveSuccess = 0x0509,
    MyGamesRequest = 0x050A,
    MyGamesResponse = 0x050B,

    // Plugin system (0x06XX)
    PluginListRequest = 0x0601,
    PluginListResponse = 0x0602,
    PluginDownload = 0x0603,
    PluginMessage = 0x0604,

    // General
    Error = 0x00FF,
    Success = 0x00FE,
    Heartbeat = 0x00FD,
}

impl MessageType {
    /// Resolve a wire tag, or `None` for tags outside the closed set.
    pub fn from_tag(tag: u16) -> Option<Self> {
        Some(match tag {
            0x0001 => Self::AuthRequest,
            0x0002 => Self::AuthResponse,
            0x0003 => Self::RegisterRequest,
            0x0004 => Self::RegisterResponse,
            0x0005 => Self::Logout,
            0x0101 => Self::GameListRequest,
            0x0102 => Self::GameListResponse,
            0x0103 => Self::GameDetailRequest,
            0x0104 => Self::GameDetailResponse,
            0x0105 => Self::SearchGames,
            0x0201 => Self::DownloadRequest,
            0x0202 => Self::DownloadMeta,
            0x0203 => Self::DownloadChunk,
            0x0204 => Self::DownloadComplete,
            0x0205 => Self::CheckUpdate,
            0x0206 => Self::UpdateAvailable,
            0x0301 => Self::CreateRoom,
            0x0302 => Self::RoomCreated,
            0x0303 => Self::JoinRoom,
            0x0304 => Self::RoomJoined,
            0x0305 => Self::LeaveRoom,
            0x0306 => Self::RoomListRequest,
            0x0307 => Self::RoomListResponse,
            0x0308 => Self::StartGameRequest,
            0x0309 => Self::GameStarted,
            0x030A => Self::RoomUpdate,
            0x0401 => Self::SubmitReview,
            0x0402 => Self::ReviewSubmitted,
            0x0403 => Self::GetReviews,
            0x0404 => Self::ReviewsResponse,
            0x0501 => Self::UploadStart,
            0x0502 => Self::UploadReady,
            0x0503 => Self::UploadChunk,
            0x0504 => Self::UploadComplete,
            0x0505 => Self::UploadSuccess,
            0x0506 => Self::UpdateGame,
            0x0507 => Self::UpdateSuccess,
            0x0508 => Self::RemoveGame,
            0x0509 => Self::RemoveSuccess,
            0x050A => Self::MyGamesRequest,
            0x050B => Self::MyGamesResponse,
            0x0601 => Self::PluginListRequest,
            0x0602 => Self::PluginListResponse,
            0x0603 => Self::PluginDownload,
            0x0604 => Self::PluginMessage,
            0x00FF => Self::Error,
            0x00FE => Self::Success,
            0x00FD => Self::Heartbeat,
            _ => return None,
        })
    }

    /// The wire value of this tag.
    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Wire-level name, matching what clients log.
    pub fn name(self) -> &'static str {
        match self {
            Self::AuthRequest => "AUTH_REQUEST",
            Self::AuthResponse => "AUTH_RESPONSE",
            Self::RegisterRequest => "REGISTER_REQUEST",
            Self::RegisterResponse => "REGISTER_RESPONSE",
            Self::Logout => "LOGOUT",
            Self::GameListRequest => "GAME_LIST_REQUEST",
            Self::GameListResponse => "GAME_LIST_RESPONSE",
            Self::GameDetailRequest => "GAME_DETAIL_REQUEST",
            Self::GameDetailResponse => "GAME_DETAIL_RESPONSE",
            Self::SearchGames => "SEARCH_GAMES",
            Self::DownloadRequest => "DOWNLOAD_REQUEST",
            Self::DownloadMeta => "DOWNLOAD_META",
            Self::DownloadChunk => "DOWNLOAD_CHUNK",
            Self::DownloadComplete => "DOWNLOAD_COMPLETE",
            Self::CheckUpdate => "CHECK_UPDATE",
            Self::UpdateAvailable => "UPDATE_AVAILABLE",
            Self::CreateRoom => "CREATE_ROOM",
            Self::RoomCreated => "ROOM_CREATED",
            Self::JoinRoom => "JOIN_ROOM",
            Self::RoomJoined => "ROOM_JOINED",
            Self::LeaveRoom => "LEAVE_ROOM",
            Self::RoomListRequest => "ROOM_LIST_REQUEST",
            Self::RoomListResponse => "ROOM_LIST_RESPONSE",
            Self::StartGameRequest => "START_GAME_REQUEST",
            Self::GameStarted => "GAME_STARTED",
            Self::RoomUpdate => "ROOM_UPDATE",
            Self::SubmitReview => "SUBMIT_REVIEW",
            Self::ReviewSubmitted => "REVIEW_SUBMITTED",
            Self::GetReviews => "GET_REVIEWS",
            Self::ReviewsResponse => "REVIEWS_RESPONSE",
            Self::UploadStart => "UPLOAD_START",
            Self::UploadReady => "UPLOAD_READY",
            Self::UploadChunk => "UPLOAD_CHUNK",
            Self::UploadComplete => "UPLOAD_COMPLETE",
            Self::UploadSuccess => "UPLOAD_SUCCESS",
            Self::UpdateGame => "UPDATE_GAME",
            Self::UpdateSuccess => "UPDATE_SUCCESS",
            Self::RemoveGame => "REMOVE_GAME",
            Self::RemoveSuccess => "REMOVE_SUCCESS",
            Self::MyGamesRequest => "MY_GAMES_REQUEST",
            Self::MyGamesResponse => "MY_GAMES_RESPONSE",
            Self::PluginListRequest => "PLUGIN_LIST_REQUEST",
            Self::PluginListResponse => "PLUGIN_LIST_RESPONSE",
            Self::PluginDownload => "PLUGIN_DOWNLOAD",
            Self::PluginMessage => "PLUGIN_MESSAGE",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    /// The specific response tag a client waiting on this request expects.
    ///
    /// Clients correlate multiplexed traffic by this mapping: a received
    /// message completes the earliest pending request whose expectation it
    /// matches, with the generic `SUCCESS`/`ERROR` accepted as fallback for
    /// any pending request. The server therefore always replies with the
    /// specific tag where one exists, and uses `SUCCESS` only where the
    /// mapping itself says so.
    pub fn expected_response(self) -> Option<Self> {
        Some(match self {
            Self::AuthRequest => Self::AuthResponse,
            Self::RegisterRequest => Self::RegisterResponse,
            Self::Logout => Self::Success,
            Self::GameListRequest | Self::SearchGames => Self::GameListResponse,
            Self::GameDetailRequest => Self::GameDetailResponse,
            Self::DownloadRequest => Self::DownloadMeta,
            Self::CheckUpdate => Self::UpdateAvailable,
            Self::CreateRoom => Self::RoomCreated,
            Self::JoinRoom => Self::RoomJoined,
            Self::LeaveRoom => Self::Success,
            Self::RoomListRequest => Self::RoomListResponse,
            Self::StartGameRequest => Self::Success,
            Self::SubmitReview => Self::ReviewSubmitted,
            Self::GetReviews => Self::ReviewsResponse,
            Self::UploadStart | Self::UpdateGame => Self::UploadReady,
            Self::UploadChunk => Self::Success,
            Self::UploadComplete => Self::UploadSuccess,
            Self::RemoveGame => Self::RemoveSuccess,
            Self::MyGamesRequest => Self::MyGamesResponse,
            Self::PluginListRequest => Self::PluginListResponse,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in [
            0x0001u16, 0x0005, 0x0101, 0x0206, 0x0301, 0x030A, 0x0404, 0x0501, 0x050B, 0x0604,
            0x00FD, 0x00FE, 0x00FF,
        ] {
            let msg_type = MessageType::from_tag(tag).unwrap();
            assert_eq!(msg_type.tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert!(MessageType::from_tag(0x0000).is_none());
        assert!(MessageType::from_tag(0x0999).is_none());
        assert!(MessageType::from_tag(0xFFFF).is_none());
    }

    #[test]
    fn test_expected_response_specific_tags() {
        assert_eq!(
            MessageType::AuthRequest.expected_response(),
            Some(MessageType::AuthResponse)
        );
        assert_eq!(
            MessageType::JoinRoom.expected_response(),
            Some(MessageType::RoomJoined)
        );
        assert_eq!(
            MessageType::GameListRequest.expected_response(),
            Some(MessageType::GameListResponse)
        );
        assert_eq!(
            MessageType::UploadStart.expected_response(),
            Some(MessageType::UploadReady)
        );
    }

    #[test]
    fn test_responses_and_notifications_have_no_expectation() {
        assert_eq!(MessageType::AuthResponse.expected_response(), None);
        assert_eq!(MessageType::RoomUpdate.expected_response(), None);
        assert_eq!(MessageType::GameStarted.expected_response(), None);
        assert_eq!(MessageType::Error.expected_response(), None);
    }
}
