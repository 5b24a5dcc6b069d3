//! In-band game downloads.
//!
//! A download streams on the requesting connection in three phases:
//! one `DOWNLOAD_META`, then hex-encoded `DOWNLOAD_CHUNK`s of at most one
//! chunk size each, then one `DOWNLOAD_COMPLETE`. An `ERROR` after
//! `DOWNLOAD_META` tells the client the transfer failed. The download is
//! recorded (and the counter bumped) only after every byte went out.

use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::protocol::payloads::{self, DownloadRequest};
use crate::protocol::{CodecError, Message, MessageType};

use super::{store_error_reply, LobbySession};

impl LobbySession {
    pub(super) async fn handle_download(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let principal = match self.require_player() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: DownloadRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Game ID required")).await,
        };

        let game = match self.server.store.get_game(req.game_id) {
            Ok(Some(game)) if game.is_active() => game,
            Ok(_) => return self.send(&Message::error("Game not available")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let version_info = match &req.version {
            Some(version) => self.server.store.get_game_version(req.game_id, version),
            None => self.server.store.latest_version(req.game_id),
        };
        let version_info = match version_info {
            Ok(Some(info)) => info,
            Ok(None) => return self.send(&Message::error("Version not found")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let file_path = std::path::Path::new(&version_info.file_path);
        let mut file = match tokio::fs::File::open(file_path).await {
            Ok(file) => file,
            Err(_) => {
                return self
                    .send(&Message::error("Game file not found on server"))
                    .await
            }
        };

        self.send(&Message::new(
            MessageType::DownloadMeta,
            json!({
                "game_id": game.id,
                "game_name": game.name,
                "version": version_info.version,
                "file_size": version_info.file_size,
                "checksum": version_info.checksum,
            }),
        ))
        .await?;

        let mut buf = vec![0u8; self.server.chunk_size];
        let mut total_sent: u64 = 0;
        loop {
            let read = match file.read(&mut buf).await {
                Ok(read) => read,
                Err(e) => {
                    tracing::error!(game_id = game.id, error = %e, "Download read failed");
                    return self
                        .send(&Message::error(format!("Download failed: {e}")))
                        .await;
                }
            };
            if read == 0 {
                break;
            }

            self.send(&Message::new(
                MessageType::DownloadChunk,
                json!({
                    "offset": total_sent,
                    "data": hex::encode(&buf[..read]),
                }),
            ))
            .await?;
            total_sent += read as u64;
        }

        if let Err(e) =
            self.server
                .store
                .record_download(game.id, principal.id, &version_info.version)
        {
            tracing::error!(game_id = game.id, error = %e, "Failed to record download");
        }

        tracing::info!(
            username = %principal.username,
            game = %game.name,
            version = %version_info.version,
            bytes = total_sent,
            "Download complete"
        );

        self.send(&Message::new(
            MessageType::DownloadComplete,
            json!({ "success": true, "bytes_sent": total_sent }),
        ))
        .await
    }
}
