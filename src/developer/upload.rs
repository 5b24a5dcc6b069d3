//! Chunked upload flows: new games (`UPLOAD_START`) and version updates
//! (`UPDATE_GAME`), both followed by `UPLOAD_CHUNK`s and one
//! `UPLOAD_COMPLETE` that verifies, installs, and records the version.

use std::path::PathBuf;

use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::artifact::ArtifactError;
use crate::lobby::store_error_reply;
use crate::protocol::payloads::{self, UpdateGameRequest, UploadChunkRequest, UploadStartRequest};
use crate::protocol::{CodecError, Message, MessageType};
use crate::store::{NewGame, StoreError};

use super::DeveloperSession;

/// In-flight upload state for one connection. Exactly one can exist per
/// connection; it disappears on completion, on any error, and on
/// disconnect, taking its temporary sink with it.
pub struct UploadInFlight {
    mode: UploadMode,
    expected_size: u64,
    expected_checksum: String,
    received: u64,
    sink: tokio::fs::File,
    temp_path: PathBuf,
}

enum UploadMode {
    New(Box<UploadStartRequest>),
    Update {
        game_id: i64,
        game_name: String,
        version: String,
        changelog: String,
    },
}

impl UploadMode {
    fn version(&self) -> &str {
        match self {
            UploadMode::New(meta) => &meta.version,
            UploadMode::Update { version, .. } => version,
        }
    }
}

impl DeveloperSession {
    pub(super) async fn handle_upload_start(
        &mut self,
        body: serde_json::Value,
    ) -> Result<(), CodecError> {
        let principal = match self.require_developer() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: UploadStartRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Missing required fields")).await,
        };

        if req.file_size == 0 || req.file_size > self.server.max_file_size {
            return self
                .send(&Message::error(format!(
                    "File size must be between 1 and {} bytes",
                    self.server.max_file_size
                )))
                .await;
        }

        match self.server.store.get_game_by_name(&req.name) {
            Ok(None) => {}
            Ok(Some(_)) => {
                tracing::warn!(name = %req.name, "Upload rejected: game exists");
                return self.send(&Message::error("Game name already exists")).await;
            }
            Err(e) => return self.send(&store_error_reply(&e)).await,
        }

        tracing::info!(
            developer = %principal.username,
            name = %req.name,
            size = req.file_size,
            "Upload started"
        );

        let filename = format!("{}.zip", sanitize_filename(&req.name));
        let expected_size = req.file_size;
        let expected_checksum = req.checksum.clone();
        self.begin_upload(UploadMode::New(Box::new(req)), expected_size, expected_checksum, &filename)
            .await
    }

    pub(super) async fn handle_update_game(
        &mut self,
        body: serde_json::Value,
    ) -> Result<(), CodecError> {
        let principal = match self.require_developer() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: UpdateGameRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("File info required")).await,
        };

        let game = match self.server.store.get_game(req.game_id) {
            Ok(Some(game)) if game.developer_id == principal.id => game,
            Ok(_) => {
                return self
                    .send(&Message::error("Game not found or not owned by you"))
                    .await
            }
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        if req.file_size == 0 || req.file_size > self.server.max_file_size {
            return self
                .send(&Message::error(format!(
                    "File size must be between 1 and {} bytes",
                    self.server.max_file_size
                )))
                .await;
        }

        // Versions are append-only; refuse before any bytes move.
        match self.server.store.get_game_version(req.game_id, &req.new_version) {
            Ok(None) => {}
            Ok(Some(_)) => {
                return self
                    .send(&store_error_reply(&StoreError::DuplicateVersion))
                    .await
            }
            Err(e) => return self.send(&store_error_reply(&e)).await,
        }

        tracing::info!(
            developer = %principal.username,
            game = %game.name,
            version = %req.new_version,
            "Update started"
        );

        let filename = format!("update_{}_{}.zip", req.game_id, req.new_version);
        self.begin_upload(
            UploadMode::Update {
                game_id: req.game_id,
                game_name: game.name,
                version: req.new_version,
                changelog: req.changelog,
            },
            req.file_size,
            req.checksum,
            &filename,
        )
        .await
    }

    async fn begin_upload(
        &mut self,
        mode: UploadMode,
        expected_size: u64,
        expected_checksum: String,
        filename: &str,
    ) -> Result<(), CodecError> {
        // A dangling earlier upload on this connection is abandoned.
        self.abort_upload().await;

        let temp_path = self
            .server
            .artifacts
            .temp_sink_path(&self.conn_id.to_string(), filename);
        if let Some(parent) = temp_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::error!(error = %e, "Failed to create upload temp dir");
                return self.send(&Message::error("Upload start failed")).await;
            }
        }

        let sink = match tokio::fs::File::create(&temp_path).await {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open upload sink");
                return self.send(&Message::error("Upload start failed")).await;
            }
        };

        self.upload = Some(UploadInFlight {
            mode,
            expected_size,
            expected_checksum,
            received: 0,
            sink,
            temp_path,
        });

        self.send(&Message::new(
            MessageType::UploadReady,
            json!({ "ready": true, "expected_size": expected_size }),
        ))
        .await
    }

    pub(super) async fn handle_upload_chunk(
        &mut self,
        body: serde_json::Value,
    ) -> Result<(), CodecError> {
        if self.upload.is_none() {
            return self.send(&Message::error("No upload in progress")).await;
        }

        let req: UploadChunkRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => {
                self.abort_upload().await;
                return self.send(&Message::error("No data in chunk")).await;
            }
        };

        let data = match hex::decode(&req.data) {
            Ok(data) => data,
            Err(_) => {
                self.abort_upload().await;
                return self.send(&Message::error("Invalid chunk encoding")).await;
            }
        };

        let Some(upload) = self.upload.as_mut() else {
            return self.send(&Message::error("No upload in progress")).await;
        };

        if upload.received + data.len() as u64 > upload.expected_size {
            self.abort_upload().await;
            return self
                .send(&Message::error("Chunk exceeds expected file size"))
                .await;
        }

        if let Err(e) = upload.sink.write_all(&data).await {
            tracing::error!(error = %e, "Failed writing upload chunk");
            self.abort_upload().await;
            return self.send(&Message::error("Upload failed")).await;
        }
        upload.received += data.len() as u64;
        let (received, expected) = (upload.received, upload.expected_size);

        let progress = (received as f64 / expected as f64 * 1000.0).round() / 10.0;
        self.send(&Message::success(json!({
            "received": received,
            "progress": progress,
        })))
        .await
    }

    pub(super) async fn handle_upload_complete(&mut self) -> Result<(), CodecError> {
        let principal = match self.require_developer() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let Some(mut upload) = self.upload.take() else {
            return self.send(&Message::error("No upload in progress")).await;
        };

        if let Err(e) = upload.sink.flush().await {
            tracing::error!(error = %e, "Failed flushing upload sink");
            self.cleanup_temp();
            return self.send(&Message::error("Upload failed")).await;
        }
        // Close the sink before hashing the file.
        drop(upload.sink);

        let artifacts = self.server.artifacts.clone();
        let temp_path = upload.temp_path.clone();
        let expected_size = upload.expected_size;
        let expected_checksum = upload.expected_checksum.clone();
        let verify = tokio::task::spawn_blocking(move || {
            artifacts.verify_archive(&temp_path, expected_size, &expected_checksum)
        })
        .await;

        match verify {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.cleanup_temp();
                let reply = match e {
                    ArtifactError::ChecksumMismatch { .. } => {
                        Message::error("Checksum mismatch - file corrupted")
                    }
                    ArtifactError::SizeMismatch { .. } => {
                        Message::error("File size mismatch - upload incomplete")
                    }
                    other => {
                        tracing::error!(error = %other, "Upload verification failed");
                        Message::error("Upload failed")
                    }
                };
                return self.send(&reply).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Upload verification task failed");
                self.cleanup_temp();
                return self.send(&Message::error("Upload failed")).await;
            }
        }

        // Resolve the target game row.
        let (game_id, game_name, changelog, is_update) = match &upload.mode {
            UploadMode::New(meta) => {
                let new_game = NewGame {
                    name: meta.name.clone(),
                    description: meta.description.clone(),
                    developer_id: principal.id,
                    version: meta.version.clone(),
                    min_players: meta.min_players,
                    max_players: meta.max_players,
                    game_type: meta.game_type,
                };
                match self.server.store.create_game(&new_game) {
                    Ok(game_id) => (game_id, meta.name.clone(), "Initial release".to_string(), false),
                    Err(e) => {
                        self.cleanup_temp();
                        return self.send(&store_error_reply(&e)).await;
                    }
                }
            }
            UploadMode::Update {
                game_id,
                game_name,
                changelog,
                ..
            } => {
                // Re-check ownership: the game may have changed hands or
                // vanished while bytes were streaming.
                match self.server.store.get_game(*game_id) {
                    Ok(Some(game)) if game.developer_id == principal.id => {}
                    Ok(_) => {
                        self.cleanup_temp();
                        return self
                            .send(&Message::error("Game not found or not owned by you"))
                            .await;
                    }
                    Err(e) => {
                        self.cleanup_temp();
                        return self.send(&store_error_reply(&e)).await;
                    }
                }
                (*game_id, game_name.clone(), changelog.clone(), true)
            }
        };

        let version = upload.mode.version().to_string();
        let artifacts = self.server.artifacts.clone();
        let temp_path = upload.temp_path.clone();
        let install_version = version.clone();
        let installed = tokio::task::spawn_blocking(move || {
            artifacts.install_verified(game_id, &install_version, &temp_path)
        })
        .await;

        let package_path = match installed {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                tracing::error!(game_id, error = %e, "Package install failed");
                self.cleanup_temp();
                return self
                    .send(&Message::error(format!("Upload failed: {e}")))
                    .await;
            }
            Err(e) => {
                tracing::error!(game_id, error = %e, "Package install task failed");
                self.cleanup_temp();
                return self.send(&Message::error("Upload failed")).await;
            }
        };

        if let Err(e) = self.server.store.add_game_version(
            game_id,
            &version,
            &changelog,
            &package_path.to_string_lossy(),
            upload.expected_size,
            &upload.expected_checksum,
        ) {
            self.cleanup_temp();
            return self.send(&store_error_reply(&e)).await;
        }

        if is_update {
            if let Err(e) = self.server.store.update_game_version(game_id, &version) {
                self.cleanup_temp();
                return self.send(&store_error_reply(&e)).await;
            }
        }

        self.cleanup_temp();

        let message = if is_update {
            tracing::info!(game = %game_name, %version, developer = %principal.username, "Game updated");
            format!("Game '{game_name}' updated to version {version}!")
        } else {
            tracing::info!(game = %game_name, %version, developer = %principal.username, "Game uploaded");
            format!("Game '{game_name}' uploaded successfully!")
        };

        self.send(&Message::new(
            MessageType::UploadSuccess,
            json!({
                "success": true,
                "game_id": game_id,
                "message": message,
            }),
        ))
        .await
    }

    /// Drop any in-flight upload and delete its partial sink.
    pub(crate) async fn abort_upload(&mut self) {
        if let Some(upload) = self.upload.take() {
            tracing::info!(
                conn_id = %self.conn_id,
                received = upload.received,
                expected = upload.expected_size,
                "Upload aborted"
            );
            drop(upload.sink);
            self.cleanup_temp();
        }
    }

    fn cleanup_temp(&self) {
        self.server
            .artifacts
            .remove_temp_dir(&self.conn_id.to_string());
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
