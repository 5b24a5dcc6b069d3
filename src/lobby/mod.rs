//! Lobby session service.
//!
//! One task per accepted player connection, reading framed requests in
//! order and answering on the same stream. Responses and unsolicited room
//! notifications share the connection; the per-connection
//! [`MessageWriter`] serializes frames so they never interleave bytes.

mod download;
mod rooms;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use uuid::Uuid;

use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::protocol::payloads::{self, CheckUpdateRequest, Credentials, GameDetailRequest, GetReviewsRequest, SubmitReviewRequest};
use crate::protocol::{CodecError, Frame, Message, MessageCodec, MessageType, MessageWriter};
use crate::store::{CatalogStore, Game, PrincipalKind, Principal, StoreError};
use crate::supervisor::GameSupervisor;

pub struct LobbyServer {
    pub(crate) store: Arc<CatalogStore>,
    pub(crate) supervisor: Arc<GameSupervisor>,
    pub(crate) clients: Arc<ClientRegistry>,
    pub(crate) chunk_size: usize,
    pub(crate) max_frame_size: usize,
    pub(crate) session_ttl: chrono::Duration,
}

impl LobbyServer {
    pub fn new(
        store: Arc<CatalogStore>,
        supervisor: Arc<GameSupervisor>,
        clients: Arc<ClientRegistry>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            supervisor,
            clients,
            chunk_size: config.transfer.chunk_size,
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
        tracing::info!(%conn_id, %addr, "Player connected");

        let (read_half, write_half) = stream.into_split();
        let writer = MessageWriter::new(write_half, self.max_frame_size);
        let mut session = LobbySession {
            server: self,
            conn_id,
            writer: writer.clone(),
            principal: None,
            session_token: None,
        };

        session.run(read_half).await;

        if let Some(principal) = &session.principal {
            session.server.clients.deregister(principal.id, &writer);
            tracing::info!(%conn_id, username = %principal.username, "Player disconnected");
        } else {
            tracing::info!(%conn_id, "Client disconnected");
        }
    }
}

/// State of one player connection.
struct LobbySession {
    server: Arc<LobbyServer>,
    conn_id: Uuid,
    writer: MessageWriter,
    principal: Option<Principal>,
    session_token: Option<String>,
}

impl LobbySession {
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

            // A failed write means the peer is gone.
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
            MessageType::GameListRequest => self.handle_game_list().await,
            MessageType::GameDetailRequest => self.handle_game_detail(frame.body).await,
            MessageType::DownloadRequest => self.handle_download(frame.body).await,
            MessageType::CheckUpdate => self.handle_check_update(frame.body).await,
            MessageType::RoomListRequest => self.handle_room_list().await,
            MessageType::CreateRoom => self.handle_create_room(frame.body).await,
            MessageType::JoinRoom => self.handle_join_room(frame.body).await,
            MessageType::LeaveRoom => self.handle_leave_room(frame.body).await,
            MessageType::StartGameRequest => self.handle_start_game(frame.body).await,
            MessageType::SubmitReview => self.handle_submit_review(frame.body).await,
            MessageType::GetReviews => self.handle_get_reviews(frame.body).await,
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

    /// The authenticated player, or the `ERROR` to reply with.
    pub(crate) fn require_player(&self) -> Result<Principal, Message> {
        self.principal
            .clone()
            .ok_or_else(|| Message::error("Not authenticated"))
    }

    // Authentication

    async fn handle_auth(&mut self, body: serde_json::Value) -> Result<(), CodecError> {
        let creds: Credentials = match payloads::parse(body) {
            Ok(creds) => creds,
            Err(_) => {
                return self
                    .send(&Message::error("Username and password required"))
                    .await
            }
        };

        let authenticated = match self
            .server
            .store
            .authenticate(PrincipalKind::Player, &creds.username, &creds.password)
        {
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
            PrincipalKind::Player,
            principal.id,
            Some(self.server.session_ttl),
        ) {
            Ok(token) => token,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        // A relogin on the same connection drops the old identity first.
        if let Some(previous) = self.principal.take() {
            self.server.clients.deregister(previous.id, &self.writer);
        }
        self.server
            .clients
            .register(principal.id, self.writer.clone());
        tracing::info!(conn_id = %self.conn_id, username = %principal.username, "Player authenticated");

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
            PrincipalKind::Player,
            &creds.username,
            &creds.password,
            email,
        ) {
            Ok(player_id) => {
                tracing::info!(username = %creds.username, "New player registered");
                self.send(&Message::new(
                    MessageType::RegisterResponse,
                    json!({
                        "success": true,
                        "user_id": player_id,
                        "username": creds.username,
                    }),
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
            if let Err(e) = self.server.store.delete_session(PrincipalKind::Player, &token) {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Failed to delete session");
            }
        }
        if let Some(principal) = self.principal.take() {
            self.server.clients.deregister(principal.id, &self.writer);
            tracing::info!(conn_id = %self.conn_id, username = %principal.username, "Player logged out");
        }
        self.send(&Message::success_empty()).await
    }

    // Catalog

    async fn handle_game_list(&self) -> Result<(), CodecError> {
        let games = match self.server.store.list_active_games() {
            Ok(games) => games,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let game_list: Vec<_> = games.iter().map(game_summary).collect();
        self.send(&Message::new(
            MessageType::GameListResponse,
            json!({ "games": game_list }),
        ))
        .await
    }

    async fn handle_game_detail(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let req: GameDetailRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Game ID required")).await,
        };

        let game = match self.server.store.get_game(req.game_id) {
            Ok(Some(game)) => game,
            Ok(None) => return self.send(&Message::error("Game not found")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let reviews = match self.server.store.game_reviews(req.game_id, 10) {
            Ok(reviews) => reviews,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let mut detail = game_summary(&game);
        detail["created_at"] = json!(game.created_at.to_rfc3339());

        self.send(&Message::new(
            MessageType::GameDetailResponse,
            json!({
                "game": detail,
                "reviews": reviews.iter().map(review_json).collect::<Vec<_>>(),
            }),
        ))
        .await
    }

    async fn handle_get_reviews(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let req: GetReviewsRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Game ID required")).await,
        };

        match self.server.store.game_reviews(req.game_id, req.limit) {
            Ok(reviews) => {
                self.send(&Message::new(
                    MessageType::ReviewsResponse,
                    json!({ "reviews": reviews.iter().map(review_json).collect::<Vec<_>>() }),
                ))
                .await
            }
            Err(e) => self.send(&store_error_reply(&e)).await,
        }
    }

    async fn handle_check_update(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let req: CheckUpdateRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => {
                return self
                    .send(&Message::error("Game ID and current version required"))
                    .await
            }
        };

        let game = match self.server.store.get_game(req.game_id) {
            Ok(Some(game)) => game,
            Ok(None) => return self.send(&Message::error("Game not found")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        self.send(&Message::new(
            MessageType::UpdateAvailable,
            json!({
                "update_available": game.current_version != req.current_version,
                "current_version": req.current_version,
                "latest_version": game.current_version,
            }),
        ))
        .await
    }

    // Reviews

    async fn handle_submit_review(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let principal = match self.require_player() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: SubmitReviewRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => {
                return self
                    .send(&Message::error("Game ID and rating required"))
                    .await
            }
        };

        if !(1..=5).contains(&req.rating) {
            return self
                .send(&Message::error("Rating must be between 1 and 5"))
                .await;
        }

        match self
            .server
            .store
            .upsert_review(req.game_id, principal.id, req.rating, &req.comment)
        {
            Ok(()) => {
                tracing::info!(
                    username = %principal.username,
                    game_id = req.game_id,
                    rating = req.rating,
                    "Review submitted"
                );
                self.send(&Message::new(
                    MessageType::ReviewSubmitted,
                    json!({ "success": true }),
                ))
                .await
            }
            Err(e) => self.send(&store_error_reply(&e)).await,
        }
    }
}

/// Catalog projection shared by the list and detail responses.
fn game_summary(game: &Game) -> serde_json::Value {
    json!({
        "id": game.id,
        "name": game.name,
        "description": game.description,
        "version": game.current_version,
        "min_players": game.min_players,
        "max_players": game.max_players,
        "type": game.game_type.as_str(),
        "rating": game.rating_rounded(),
        "rating_count": game.rating_count,
        "downloads": game.download_count,
    })
}

fn review_json(review: &crate::store::Review) -> serde_json::Value {
    json!({
        "game_id": review.game_id,
        "player_id": review.player_id,
        "username": review.username,
        "rating": review.rating,
        "comment": review.comment,
        "created_at": review.created_at.to_rfc3339(),
        "updated_at": review.updated_at.to_rfc3339(),
    })
}

/// Map a store failure to its client-facing `ERROR`. Conflict and invariant
/// violations carry their message; internal failures are logged and masked.
pub(crate) fn store_error_reply(error: &StoreError) -> Message {
    match error {
        StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::RoomCodeCollision => {
            tracing::error!(error = %error, "Store failure");
            Message::error("Internal server error")
        }
        other => Message::error(other.to_string()),
    }
}
