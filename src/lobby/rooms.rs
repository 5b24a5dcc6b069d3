//! Room handlers: list, create, join, leave, start, and the membership
//! broadcasts that keep every open session in sync.

use serde_json::json;

use crate::protocol::payloads::{self, CreateRoomRequest, RoomRequest};
use crate::protocol::{CodecError, Message, MessageType};
use crate::store::{RoomStatus, StoreError};

use super::{store_error_reply, LobbySession};

const DEFAULT_ROOM_CAPACITY: u32 = 4;

impl LobbySession {
    pub(super) async fn handle_room_list(&self) -> Result<(), CodecError> {
        let listings = match self.server.store.list_active_rooms() {
            Ok(listings) => listings,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let rooms: Vec<_> = listings
            .iter()
            .map(|listing| {
                json!({
                    "id": listing.room.id,
                    "name": listing.room.name,
                    "room_code": listing.room.room_code,
                    "game_id": listing.room.game_id,
                    "game_name": listing.game_name,
                    "host_name": listing.host_name,
                    "current_players": listing.room.current_players,
                    "max_players": listing.room.max_players,
                    "status": listing.room.status.as_str(),
                })
            })
            .collect();

        self.send(&Message::new(
            MessageType::RoomListResponse,
            json!({ "rooms": rooms }),
        ))
        .await
    }

    pub(super) async fn handle_create_room(
        &self,
        body: serde_json::Value,
    ) -> Result<(), CodecError> {
        let principal = match self.require_player() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: CreateRoomRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Game ID required")).await,
        };

        match self.server.store.get_game(req.game_id) {
            Ok(Some(game)) if game.is_active() => {}
            Ok(_) => return self.send(&Message::error("Game not available")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        }

        let room_name = req
            .name
            .unwrap_or_else(|| format!("{}'s Room", principal.username));
        let max_players = req.max_players.unwrap_or(DEFAULT_ROOM_CAPACITY);

        let room = match self
            .server
            .store
            .create_room(req.game_id, principal.id, &room_name, max_players)
        {
            Ok(room) => room,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        tracing::info!(
            room_id = room.id,
            room_code = %room.room_code,
            host = %principal.username,
            game_id = req.game_id,
            "Room created"
        );

        self.send(&Message::new(
            MessageType::RoomCreated,
            json!({
                "success": true,
                "room_id": room.id,
                "room_code": room.room_code,
                "room_name": room_name,
            }),
        ))
        .await
    }

    pub(super) async fn handle_join_room(&self, body: serde_json::Value) -> Result<(), CodecError> {
        let principal = match self.require_player() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: RoomRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Room ID required")).await,
        };

        if let Err(e) = self.server.store.join_room(req.room_id, principal.id) {
            let reply = match e {
                StoreError::RoomNotFound
                | StoreError::RoomNotWaiting
                | StoreError::RoomFull
                | StoreError::AlreadyInRoom => Message::error(e.to_string()),
                other => store_error_reply(&other),
            };
            return self.send(&reply).await;
        }

        tracing::info!(username = %principal.username, room_id = req.room_id, "Player joined room");

        // Reply to the joiner before the broadcast begins; a slow member
        // must not stall the response, so the broadcast runs in its own
        // task.
        let response = Message::new(
            MessageType::RoomJoined,
            json!({ "success": true, "room_id": req.room_id }),
        );
        let sent = self.send(&response).await;

        let server = std::sync::Arc::clone(&self.server);
        let room_id = req.room_id;
        tokio::spawn(async move {
            broadcast_room_update(&server, room_id).await;
        });

        sent
    }

    pub(super) async fn handle_leave_room(
        &self,
        body: serde_json::Value,
    ) -> Result<(), CodecError> {
        let principal = match self.require_player() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: RoomRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Room ID required")).await,
        };

        let room = match self.server.store.get_room(req.room_id) {
            Ok(room) => room,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        match room {
            Some(room) if room.host_id == principal.id => {
                // The host leaving closes the room for everyone.
                if let Err(e) =
                    self.server
                        .store
                        .update_room_status(req.room_id, RoomStatus::Closed, None)
                {
                    return self.send(&store_error_reply(&e)).await;
                }
                tracing::info!(
                    host = %principal.username,
                    room_id = req.room_id,
                    "Host left, room closed"
                );
            }
            Some(_) => {
                if let Err(e) = self.server.store.leave_room(req.room_id, principal.id) {
                    return self.send(&store_error_reply(&e)).await;
                }
                tracing::info!(username = %principal.username, room_id = req.room_id, "Player left room");
            }
            // Leaving a vanished room is a no-op.
            None => {}
        }

        broadcast_room_update(&self.server, req.room_id).await;

        self.send(&Message::success(json!({ "left": true }))).await
    }

    pub(super) async fn handle_start_game(
        &self,
        body: serde_json::Value,
    ) -> Result<(), CodecError> {
        let principal = match self.require_player() {
            Ok(principal) => principal,
            Err(reply) => return self.send(&reply).await,
        };

        let req: RoomRequest = match payloads::parse(body) {
            Ok(req) => req,
            Err(_) => return self.send(&Message::error("Room ID required")).await,
        };

        let room = match self.server.store.get_room(req.room_id) {
            Ok(Some(room)) => room,
            Ok(None) => return self.send(&Message::error("Room not found")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        if room.host_id != principal.id {
            return self.send(&Message::error("Only host can start game")).await;
        }

        let game = match self.server.store.get_game(room.game_id) {
            Ok(Some(game)) => game,
            Ok(None) => return self.send(&Message::error("Game not found")).await,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };

        let members = match self.server.store.room_members(req.room_id) {
            Ok(members) => members,
            Err(e) => return self.send(&store_error_reply(&e)).await,
        };
        let usernames: Vec<String> = members.iter().map(|m| m.username.clone()).collect();

        let game_port = match self
            .server
            .supervisor
            .spawn_game_server(
                req.room_id,
                game.id,
                &game.name,
                usernames,
                Some(&game.current_version),
            )
            .await
        {
            Ok(port) => port,
            Err(e) => {
                tracing::error!(room_id = req.room_id, error = %e, "Failed to start game server");
                return self.send(&Message::error("Failed to start game server")).await;
            }
        };

        if let Err(e) =
            self.server
                .store
                .update_room_status(req.room_id, RoomStatus::Playing, Some(game_port))
        {
            return self.send(&store_error_reply(&e)).await;
        }

        // Every member with an open session learns the port before the host
        // gets its reply, so no client can act on a room the others have not
        // seen start.
        let started = Message::new(
            MessageType::GameStarted,
            json!({
                "room_id": req.room_id,
                "game_port": game_port,
                "game_name": game.name,
            }),
        );
        let member_ids: Vec<i64> = members.iter().map(|m| m.player_id).collect();
        self.server.clients.notify_all(&member_ids, &started).await;

        tracing::info!(room_id = req.room_id, game_port, "Game started");

        self.send(&Message::success(json!({
            "game_port": game_port,
            "room_id": req.room_id,
        })))
        .await
    }
}

/// Send `ROOM_UPDATE` to every member of the room with an open session.
pub(super) async fn broadcast_room_update(server: &super::LobbyServer, room_id: i64) {
    let room = match server.store.get_room(room_id) {
        Ok(Some(room)) => room,
        Ok(None) => return,
        Err(e) => {
            tracing::error!(room_id, error = %e, "Failed to load room for broadcast");
            return;
        }
    };
    let members = match server.store.room_members(room_id) {
        Ok(members) => members,
        Err(e) => {
            tracing::error!(room_id, error = %e, "Failed to load members for broadcast");
            return;
        }
    };

    let update = Message::new(
        MessageType::RoomUpdate,
        json!({
            "room_id": room_id,
            "current_players": room.current_players,
            "players": members.iter().map(|m| m.username.as_str()).collect::<Vec<_>>(),
        }),
    );
    let member_ids: Vec<i64> = members.iter().map(|m| m.player_id).collect();
    server.clients.notify_all(&member_ids, &update).await;
}
