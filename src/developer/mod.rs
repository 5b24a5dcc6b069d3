//! Developer session service.
//!
//! Developers authenticate against their own account namespace and manage
//! their catalog: chunked uploads of new games, version updates over the
//! same transfer flow, and soft-deletion. Upload state lives on the
//! connection and is torn down, partial sink included, the moment anything
//! goes wrong or the developer disconnects.

mod upload;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::lobby::store_error_reply;
use crate::protocol::payloads::{self, Credentials, RemoveGameRequest};
use crate::protocol::{CodecError, Frame, Message, MessageCodec, MessageType, MessageWriter};
use crate::store::{CatalogStore, Principal, PrincipalKind, StoreError};

pub use upload::UploadInFlight;

pub struct DeveloperServer {
    pub(crate) store: Arc<CatalogStore>,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) max_file_size: u64,
    pub(crate) max_frame_size: usize,
    pub(crate) session_ttl: chrono::Duration,
}

impl DeveloperServer {
    pub fn new(store: Arc<CatalogStore>, artifacts: ArtifactStore, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            store,
            artifacts,
            max_file_size: config.transfer.max_file_size,
            max_frame_size: config.transfer.max_frame_size,
            session_ttl: chrono::Duration::seconds(config.session.session_timeout as i64),
        })
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let conn_id = Uuid::new_v4();
        tracing::info!(%conn_id, %addr, "Developer connected");

        let (read_half, write_half) = stream.into_split();
        let writer = MessageWriter::new(write_half, self.max_frame_size);
        let mut session = DeveloperSession {
            server: self,
            conn_id,
            writer,
            principal: None,
            session_token: None,
            upload: None,
        };

        session.run(read_half).await;

        // A disconnect mid-upload frees the sink and the partial file.
        session.abort_upload().await;
        tracing::info!(%conn_id, "Developer disconnected");
    }
}

/// State of one developer connection.
pub(crate) struct DeveloperSession {
    pub(crate) server: Arc<DeveloperServer>,
    pub(crate) conn_id: Uuid,
    writer: MessageWriter,
    pub(crate) principal: Option<Principal>,
    session_token: Option<String>,
    pub(crate) upload: Option<UploadInFlight>,
}

impl DeveloperSession {
    async fn run(&mut self, read_half: OwnedReadHalf) {
        let codec = MessageCodec::new(self.server.max_frame_size);
        let mut frames = FramedRead::new(read_half, codec);

        while let Some(next) = frames.next().await {
            let result = match next {
                Ok(frame) => self.dispatch(frame).await,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(conn_id = %self.conn_id, error = %e, "Bad frame");
                    self.send(&Message::error(format!("Protocol error: {e}"))).await
                }
                Err(e) => {
                    if !matches!(e, CodecError::Io(_)) {
                        tracing::warn!(conn_id = %self.conn_id, error = %e, "Closing connection");
                    }
                    break;
                }
            };

            if result.is_err() {
                break;
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<(), CodecError> {
        let Some(msg_type) = frame.message_type() else {
            return self
                .send(&Message::error(format!(
                    "Unknown message type: 0x{:04X}",
                    frame.tag
                )))
                .await;
        };
        tracing::debug!(conn_id = %self.conn_id, msg = msg_type.name(), "Received");

        match msg_type {
            MessageType::AuthRequest => self.handle_auth(frame.body).await,
            MessageType::RegisterRequest => self.handle_register(frame.body).await,
            MessageType::Logout => self.handle_logout().await,
            MessageType::MyGamesRequest => self.handle_my_games().await,
            MessageType::UploadStart => self.handle_upload_start(frame.body).await,
            MessageType::UploadChunk => self.handle_upload_chunk(frame.body).await,
            MessageType::UploadComplete => self.handle_upload_complete().await,
            MessageType::UpdateGame => self.handle_update_game(frame.body).await,
            MessageType::RemoveGame => self.handle_remove_game(frame.body).await,
            other => {
                self.send(&Message::error(format!(
                    "Unknown message type: {}",
                    other.name()
                )))
                .await
            }
        }
    }

    pub(crate) async fn send(&self, message: &Message) -> Result<(), CodecError> {
        self.writer.send(message).await
    }

    /// The authenticated developer, or the `ERROR` to reply with.
    pub(crate) fn require_developer(&self) -> Result<Principal, Message> {
        self.principal
            .clone()
            .ok_or_else(|| Message::error("Not authenticated"))
    }

    async fn handle_auth(&mut self, body: serde_json::Value) -> Result<(), CodecError> {
        let creds: Credentials = match payloads::parse(body) {
            Ok(creds) => creds,
            Err(_) => {
                return self
                    .send(&Message::error("Username and password required"))
                    .await
            }
        };

        let authenticated = match self.server.store.authenticate(
            PrincipalKind::Developer,
            &creds.username,
            &creds.password,
        ) {
            Ok(found) => found,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let Some(principal) = authenticated else {
            return self
                .send(&Message::new(
                    MessageType::AuthResponse,
                    json!({ "success": false, "error": "Invalid credentials" }),
                ))
                .await;
        };

        let token = match self.server.store.create_session(
            PrincipalKind::Developer,
            principal.id,
            Some(self.server.session_ttl),
        ) {
            Ok(token) => token,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        tracing::info!(conn_id = %self.conn_id, username = %principal.username, "Developer authenticated");

        let response = Message::new(
            MessageType::AuthResponse,
            json!({
                "success": true,
                "user_id": principal.id,
                "username": principal.username.clone(),
                "session_token": token.clone(),
            }),
        );
        self.principal = Some(principal);
        self.session_token = Some(token);
        self.send(&response).await
    }

    async fn handle_register(&mut self, body: serde_json::Value) -> Result<(), CodecError> {
        let creds: Credentials = match payloads::parse(body) {
            Ok(creds) => creds,
            Err(_) => {
                return self
                    .send(&Message::error("Username and password required"))
                    .await
            }
        };

        let email = (!creds.email.is_empty()).then_some(creds.email.as_str());
        match self.server.store.create_account(
            PrincipalKind::Developer,
            &creds.username,
            &creds.password,
            email,
        ) {
            Ok(developer_id) => {
                tracing::info!(username = %creds.username, "New developer registered");
                self.send(&Message::new(
                    MessageType::RegisterResponse,
                    json!({ "success": true, "user_id": developer_id }),
                ))
                .await
            }
            Err(StoreError::DuplicateUsername) => {
                self.send(&Message::new(
                    MessageType::RegisterResponse,
                    json!({ "success": false, "error": "Username already exists" }),
                ))
                .await
            }
            Err(e) => self.send(&store_error_reply(&e)).await,
        }
    }

    async fn handle_logout(&mut self) -> Result<(), CodecError> {
        if let Some(token) = self.session_token.take() {
            if let Err(e) = self
                .server
                .store
                .delete_session(PrincipalKind::Developer, &token)
            {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Failed to delete session");
            }
        }
        self.principal = None;
        self.send(&Message::success_empty()).await
    }

    async fn handle_my_games(&self) -> Result<(), CodecError> {
        let principal = match self.require_developer() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let games = match self.server.store.list_games_by_developer(principal.id) {
            Ok(games) => games,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let game_list: Vec<_> = games
            .iter()
            .map(|game| {
                json!({
                    "id": game.id,
                    "name": game.name,
                    "description": game.description,
                    "version": game.current_version,
                    "status": game.status.as_str(),
                    "downloads": game.download_count,
                    "rating": game.rating_rounded(),
                })
            })
            .collect();

        self.send(&Message::new(
            MessageType::MyGamesResponse,
            json!({ "games": game_list }),
        ))
        .await
    }

    async fn handle_remove_game(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let principal = match self.require_developer() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: RemoveGameRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Game ID required")).await,
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

        // Soft delete only; artifacts stay on disk.
        match self
            .server
            .store
            .update_game_status(req.game_id, crate::store::GameStatus::Inactive)
        {
            Ok(true) => {
                tracing::info!(game = %game.name, developer = %principal.username, "Game removed");
                self.send(&Message::new(
                    MessageType::RemoveSuccess,
                    json!({
                        "success": true,
                        "message": format!("Game '{}' has been removed", game.name),
                    }),
                ))
                .await
            }
            Ok(false) => self.send(&Message::error("Failed to remove game")).await,
            Err(e) => self.send(&store_error_reply(&e)).await,
        }
    }
}
