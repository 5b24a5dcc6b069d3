//! End-to-end developer scenarios: uploads, updates, removal.


use serde_json::json;

use game_store_server::artifact::SERVER_SENTINEL;
use game_store_server::protocol::MessageType;
use game_store_server::store::GameStatus;
use test_helpers::{spawn_test_server, zip_bytes, sha256_hex, TestClient, TestServer};

const CHUNK: usize = 8192;

async fn login_developer(server: &TestServer, username: &str) -> TestClient {
    let mut client = TestClient::connect(server.developer_addr).await;

    let body = client
        .request(
            MessageType::RegisterRequest,
            json!({"username": username, "password": "pw"}),
            MessageType::RegisterResponse,
        )
        .await;
    assert_eq!(body["success"], true);

    let body = client
        .request(
            MessageType::AuthRequest,
            json!({"username": username, "password": "pw"}),
            MessageType::AuthResponse,
        )
        .await;
    assert_eq!(body["success"], true);
    client
}

/// Stream an archive through the chunked upload flow, stopping at the
/// first non-SUCCESS ack. Returns the final ack body.
async fn stream_chunks(client: &mut TestClient, payload: &[u8]) {
    let mut offset = 0usize;
    for chunk in payload.chunks(CHUNK) {
        let ack = client
            .request(
                MessageType::UploadChunk,
                json!({"offset": offset, "data": hex::encode(chunk)}),
                MessageType::Success,
            )
            .await;
        offset += chunk.len();
        assert_eq!(ack["received"], offset as u64);
        assert!(ack["progress"].as_f64().unwrap() <= 100.0);
    }
}

#[tokio::test]
async fn test_full_upload_flow() {
    let server = spawn_test_server().await;
    let mut dev = login_developer(&server, "studio").await;

    let payload = zip_bytes(&[
        ("connect4/game_server.py", "print('serving connect4')"),
        ("connect4/rules.txt", "four in a row wins"),
    ]);
    let checksum = sha256_hex(&payload);

    let ready = dev
        .request(
            MessageType::UploadStart,
            json!({
                "name": "Connect4",
                "description": "Classic vertical four-in-a-row",
                "version": "1.0.0",
                "min_players": 2,
                "max_players": 2,
                "game_type": "cli",
                "file_size": payload.len(),
                "checksum": checksum,
            }),
            MessageType::UploadReady,
        )
        .await;
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["expected_size"], payload.len() as u64);

    stream_chunks(&mut dev, &payload).await;

    let done = dev
        .request(
            MessageType::UploadComplete,
            json!({}),
            MessageType::UploadSuccess,
        )
        .await;
    assert_eq!(done["success"], true);
    let game_id = done["game_id"].as_i64().unwrap();

    // The catalog row, the version row, and the extracted artifact all
    // exist; the changelog defaulted for a first release.
    let game = server.store.get_game(game_id).unwrap().unwrap();
    assert_eq!(game.name, "Connect4");
    assert_eq!(game.current_version, "1.0.0");
    assert_eq!(game.status, GameStatus::Active);

    let version = server.store.get_game_version(game_id, "1.0.0").unwrap().unwrap();
    assert_eq!(version.changelog, "Initial release");
    assert_eq!(version.checksum, checksum);
    assert_eq!(version.file_size, payload.len() as u64);

    let version_dir = server.artifacts.version_dir(game_id, "1.0.0");
    assert!(version_dir.join("game_package.zip").is_file());
    assert!(version_dir.join(SERVER_SENTINEL).is_file());
    assert!(version_dir.join("rules.txt").is_file());
    // Nested archive was flattened.
    assert!(!version_dir.join("connect4").exists());

    #[cfg(unix)]
    {
        let current = std::fs::read_link(server.artifacts.current_dir(game_id)).unwrap();
        assert_eq!(current, std::path::PathBuf::from("1.0.0"));
    }
}

#[tokio::test]
async fn test_upload_requires_auth() {
    let server = spawn_test_server().await;
    let mut client = TestClient::connect(server.developer_addr).await;

    let body = client
        .request(
            MessageType::UploadStart,
            json!({"name": "X", "file_size": 10, "checksum": "ab"}),
            MessageType::Error,
        )
        .await;
    assert_eq!(body["error"], "Not authenticated");
}

#[tokio::test]
async fn test_upload_duplicate_name_rejected() {
    let server = spawn_test_server().await;
    test_helpers::seed_game(&server, "Connect4", 2, 2);

    let mut dev = login_developer(&server, "studio").await;
    let body = dev
        .request(
            MessageType::UploadStart,
            json!({"name": "Connect4", "file_size": 10, "checksum": "ab"}),
            MessageType::Error,
        )
        .await;
    assert_eq!(body["error"], "Game name already exists");
}

#[tokio::test]
async fn test_upload_checksum_mismatch_cleans_up() {
    let server = spawn_test_server().await;
    let mut dev = login_developer(&server, "studio").await;

    let payload = zip_bytes(&[("game_server.py", "x")]);
    dev.request(
        MessageType::UploadStart,
        json!({
            "name": "Broken",
            "file_size": payload.len(),
            "checksum": "00".repeat(32),
        }),
        MessageType::UploadReady,
    )
    .await;

    stream_chunks(&mut dev, &payload).await;

    let body = dev
        .request(MessageType::UploadComplete, json!({}), MessageType::Error)
        .await;
    assert_eq!(body["error"], "Checksum mismatch - file corrupted");

    // No catalog row was created.
    assert!(server.store.get_game_by_name("Broken").unwrap().is_none());

    // A fresh upload still works on the same connection.
    let checksum = sha256_hex(&payload);
    dev.request(
        MessageType::UploadStart,
        json!({
            "name": "Fixed",
            "file_size": payload.len(),
            "checksum": checksum,
        }),
        MessageType::UploadReady,
    )
    .await;
    stream_chunks(&mut dev, &payload).await;
    let done = dev
        .request(MessageType::UploadComplete, json!({}), MessageType::UploadSuccess)
        .await;
    assert_eq!(done["success"], true);
}

#[tokio::test]
async fn test_chunk_overflow_aborts_upload() {
    let server = spawn_test_server().await;
    let mut dev = login_developer(&server, "studio").await;

    let payload = zip_bytes(&[("game_server.py", "x")]);
    let checksum = sha256_hex(&payload);
    dev.request(
        MessageType::UploadStart,
        json!({
            "name": "Overflow",
            "file_size": 4,
            "checksum": checksum,
        }),
        MessageType::UploadReady,
    )
    .await;

    let body = dev
        .request(
            MessageType::UploadChunk,
            json!({"offset": 0, "data": hex::encode(&payload)}),
            MessageType::Error,
        )
        .await;
    assert_eq!(body["error"], "Chunk exceeds expected file size");

    // The in-flight state is gone.
    let body = dev
        .request(
            MessageType::UploadChunk,
            json!({"offset": 0, "data": "00"}),
            MessageType::Error,
        )
        .await;
    assert_eq!(body["error"], "No upload in progress");
}

#[tokio::test]
async fn test_update_game_appends_version() {
    let server = spawn_test_server().await;
    let mut dev = login_developer(&server, "studio").await;

    // First release.
    let v1 = zip_bytes(&[("game_server.py", "v1")]);
    let checksum1 = sha256_hex(&v1);
    dev.request(
        MessageType::UploadStart,
        json!({
            "name": "Connect4",
            "version": "1.0.0",
            "file_size": v1.len(),
            "checksum": checksum1,
        }),
        MessageType::UploadReady,
    )
    .await;
    stream_chunks(&mut dev, &v1).await;
    let done = dev
        .request(MessageType::UploadComplete, json!({}), MessageType::UploadSuccess)
        .await;
    let game_id = done["game_id"].as_i64().unwrap();

    // Update to 1.1.0.
    let v2 = zip_bytes(&[("game_server.py", "v2 with fixes")]);
    let checksum2 = sha256_hex(&v2);
    dev.request(
        MessageType::UpdateGame,
        json!({
            "game_id": game_id,
            "new_version": "1.1.0",
            "changelog": "Bug fixes",
            "file_size": v2.len(),
            "checksum": checksum2,
        }),
        MessageType::UploadReady,
    )
    .await;
    stream_chunks(&mut dev, &v2).await;
    let done = dev
        .request(MessageType::UploadComplete, json!({}), MessageType::UploadSuccess)
        .await;
    assert_eq!(done["game_id"], game_id);

    let game = server.store.get_game(game_id).unwrap().unwrap();
    assert_eq!(game.current_version, "1.1.0");

    let version = server.store.get_game_version(game_id, "1.1.0").unwrap().unwrap();
    assert_eq!(version.changelog, "Bug fixes");

    // Both versions remain installed; current points at the newer one.
    assert!(server.artifacts.version_dir(game_id, "1.0.0").join(SERVER_SENTINEL).is_file());
    assert!(server.artifacts.version_dir(game_id, "1.1.0").join(SERVER_SENTINEL).is_file());
    #[cfg(unix)]
    {
        let current = std::fs::read_link(server.artifacts.current_dir(game_id)).unwrap();
        assert_eq!(current, std::path::PathBuf::from("1.1.0"));
    }

    // Re-publishing an existing version is refused before any transfer.
    let body = dev
        .request(
            MessageType::UpdateGame,
            json!({
                "game_id": game_id,
                "new_version": "1.1.0",
                "file_size": v2.len(),
                "checksum": checksum2,
            }),
            MessageType::Error,
        )
        .await;
    assert_eq!(body["error"], "Version already exists for this game");
}

#[tokio::test]
async fn test_update_requires_ownership() {
    let server = spawn_test_server().await;
    let game_id = test_helpers::seed_game(&server, "Connect4", 2, 2);

    let mut dev = login_developer(&server, "someone-else").await;
    let body = dev
        .request(
            MessageType::UpdateGame,
            json!({
                "game_id": game_id,
                "new_version": "2.0.0",
                "file_size": 10,
                "checksum": "ab",
            }),
            MessageType::Error,
        )
        .await;
    assert_eq!(body["error"], "Game not found or not owned by you");
}

#[tokio::test]
async fn test_remove_game_soft_deletes() {
    let server = spawn_test_server().await;
    let mut dev = login_developer(&server, "studio").await;

    let payload = zip_bytes(&[("game_server.py", "x")]);
    let checksum = sha256_hex(&payload);
    dev.request(
        MessageType::UploadStart,
        json!({
            "name": "Ephemeral",
            "file_size": payload.len(),
            "checksum": checksum,
        }),
        MessageType::UploadReady,
    )
    .await;
    stream_chunks(&mut dev, &payload).await;
    let done = dev
        .request(MessageType::UploadComplete, json!({}), MessageType::UploadSuccess)
        .await;
    let game_id = done["game_id"].as_i64().unwrap();

    let body = dev
        .request(
            MessageType::RemoveGame,
            json!({"game_id": game_id}),
            MessageType::RemoveSuccess,
        )
        .await;
    assert_eq!(body["success"], true);

    // Soft delete: the row flips inactive, artifacts stay on disk, and the
    // lobby listing no longer shows the game.
    let game = server.store.get_game(game_id).unwrap().unwrap();
    assert_eq!(game.status, GameStatus::Inactive);
    assert!(server
        .artifacts
        .version_dir(game_id, "1.0.0")
        .join(SERVER_SENTINEL)
        .is_file());
    assert!(server.store.list_active_games().unwrap().is_empty());

    let mut player = TestClient::connect(server.lobby_addr).await;
    let listing = player
        .request(
            MessageType::GameListRequest,
            json!({}),
            MessageType::GameListResponse,
        )
        .await;
    assert!(listing["games"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_my_games_lists_own_games_only() {
    let server = spawn_test_server().await;
    test_helpers::seed_game(&server, "SomeoneElses", 2, 4);

    let mut dev = login_developer(&server, "studio").await;

    let payload = zip_bytes(&[("game_server.py", "x")]);
    let checksum = sha256_hex(&payload);
    dev.request(
        MessageType::UploadStart,
        json!({
            "name": "Mine",
            "file_size": payload.len(),
            "checksum": checksum,
        }),
        MessageType::UploadReady,
    )
    .await;
    stream_chunks(&mut dev, &payload).await;
    dev.request(MessageType::UploadComplete, json!({}), MessageType::UploadSuccess)
        .await;

    let body = dev
        .request(
            MessageType::MyGamesRequest,
            json!({}),
            MessageType::MyGamesResponse,
        )
        .await;
    let games = body["games"].as_array().unwrap();
    assert_eq!(games.len(), 1);
    assert_eq!(games[0]["name"], "Mine");
    assert_eq!(games[0]["status"], "active");
}
