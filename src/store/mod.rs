//! Durable catalog store.
//!
//! Accounts, sessions, games, versions, downloads, reviews, rooms, and
//! memberships live in a single SQLite file. Every access goes through one
//! mutex, which gives the at-most-one-writer guarantee the rest of the
//! server relies on; multi-statement operations run in transactions so
//! aggregates and membership counts can never be observed mid-update.

pub mod models;
pub mod password;
mod schema;

pub use models::{
    DownloadRecord, Game, GameStatus, GameVersion, NewGame, Principal, PrincipalKind, Review,
    Room, RoomListing, RoomMember, RoomStatus,
};
pub use password::hash_password;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::protocol::payloads::GameKind;

/// Rooms still `waiting` after this many minutes are expired.
pub const ROOM_WAIT_TIMEOUT_MINUTES: i64 = 10;

/// Session tokens default to this lifetime when the caller does not pass one.
const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Store failures. Display strings double as the client-facing error
/// messages for conflict and invariant violations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Username already exists")]
    DuplicateUsername,
    #[error("Game name already exists")]
    DuplicateGameName,
    #[error("Version already exists for this game")]
    DuplicateVersion,
    #[error("Game not found")]
    GameNotFound,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room is not accepting players")]
    RoomNotWaiting,
    #[error("Room is full")]
    RoomFull,
    #[error("Already in room")]
    AlreadyInRoom,
    #[error("could not allocate a unique room code")]
    RoomCodeCollision,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Thread-safe handle to the catalog database.
pub struct CatalogStore {
    conn: Mutex<Connection>,
    password_salt: String,
}

impl CatalogStore {
    /// Open (creating if needed) the database at `path` and run the schema.
    pub fn open(path: &Path, password_salt: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn, password_salt)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(password_salt: &str) -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?, password_salt)
    }

    fn initialize(conn: Connection, password_salt: &str) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            password_salt: password_salt.to_string(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Accounts

    /// Create an account in the given namespace. Fails on username conflict
    /// within that namespace only.
    pub fn create_account(
        &self,
        kind: PrincipalKind,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<i64, StoreError> {
        let hash = hash_password(password, &self.password_salt);
        let sql = format!(
            "INSERT INTO {} (username, password_hash, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            kind.account_table()
        );
        let conn = self.conn();
        match conn.execute(&sql, params![username, hash, email, Utc::now()]) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateUsername),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify credentials; on success updates `last_login` and returns the
    /// principal.
    pub fn authenticate(
        &self,
        kind: PrincipalKind,
        username: &str,
        password: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let hash = hash_password(password, &self.password_salt);
        let conn = self.conn();
        let sql = format!(
            "SELECT id, username FROM {} WHERE username = ?1 AND password_hash = ?2",
            kind.account_table()
        );
        let found = conn
            .query_row(&sql, params![username, hash], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;

        let Some((id, username)) = found else {
            return Ok(None);
        };

        let sql = format!(
            "UPDATE {} SET last_login = ?1 WHERE id = ?2",
            kind.account_table()
        );
        conn.execute(&sql, params![Utc::now(), id])?;

        Ok(Some(Principal { id, username, kind }))
    }

    // Sessions

    /// Issue a session token. Defaults to a 24-hour lifetime when `ttl` is
    /// not given.
    pub fn create_session(
        &self,
        kind: PrincipalKind,
        principal_id: i64,
        ttl: Option<Duration>,
    ) -> Result<String, StoreError> {
        let token = generate_token();
        let expires_at = Utc::now() + ttl.unwrap_or_else(|| Duration::hours(DEFAULT_SESSION_TTL_HOURS));
        let sql = format!(
            "INSERT INTO {} (session_token, {}, expires_at) VALUES (?1, ?2, ?3)",
            kind.session_table(),
            session_fk(kind)
        );
        self.conn().execute(&sql, params![token, principal_id, expires_at])?;
        Ok(token)
    }

    /// Resolve a token to its principal; `None` when unknown or expired.
    pub fn validate_session(
        &self,
        kind: PrincipalKind,
        token: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let sql = format!(
            "SELECT a.id, a.username FROM {} s JOIN {} a ON s.{} = a.id \
             WHERE s.session_token = ?1 AND datetime(s.expires_at) > datetime(?2)",
            kind.session_table(),
            kind.account_table(),
            session_fk(kind)
        );
        let found = self
            .conn()
            .query_row(&sql, params![token, Utc::now()], |row| {
                Ok(Principal {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    kind,
                })
            })
            .optional()?;
        Ok(found)
    }

    pub fn delete_session(&self, kind: PrincipalKind, token: &str) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE session_token = ?1",
            kind.session_table()
        );
        self.conn().execute(&sql, params![token])?;
        Ok(())
    }

    /// Drop expired session rows from both namespaces.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn();
        let mut purged = 0;
        for table in ["player_sessions", "developer_sessions"] {
            let sql = format!(
                "DELETE FROM {table} WHERE datetime(expires_at) <= datetime(?1)"
            );
            purged += conn.execute(&sql, params![now])?;
        }
        Ok(purged)
    }

    // Games

    pub fn create_game(&self, new_game: &NewGame) -> Result<i64, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        match conn.execute(
            "INSERT INTO games (name, description, developer_id, current_version, \
             min_players, max_players, game_type, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new_game.name,
                new_game.description,
                new_game.developer_id,
                new_game.version,
                new_game.min_players,
                new_game.max_players,
                new_game.game_type.as_str(),
                now,
            ],
        ) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateGameName),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_game(&self, game_id: i64) -> Result<Option<Game>, StoreError> {
        let found = self
            .conn()
            .query_row(
                &format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"),
                params![game_id],
                game_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn get_game_by_name(&self, name: &str) -> Result<Option<Game>, StoreError> {
        let found = self
            .conn()
            .query_row(
                &format!("SELECT {GAME_COLUMNS} FROM games WHERE name = ?1"),
                params![name],
                game_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Active games, most downloaded first.
    pub fn list_active_games(&self) -> Result<Vec<Game>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE status = 'active' ORDER BY download_count DESC"
        ))?;
        let games = stmt
            .query_map([], game_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(games)
    }

    pub fn list_games_by_developer(&self, developer_id: i64) -> Result<Vec<Game>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE developer_id = ?1 \
             ORDER BY datetime(created_at) DESC"
        ))?;
        let games = stmt
            .query_map(params![developer_id], game_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(games)
    }

    pub fn update_game_status(&self, game_id: i64, status: GameStatus) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE games SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), game_id],
        )?;
        Ok(changed > 0)
    }

    pub fn update_game_version(&self, game_id: i64, version: &str) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE games SET current_version = ?1, updated_at = ?2 WHERE id = ?3",
            params![version, Utc::now(), game_id],
        )?;
        Ok(changed > 0)
    }

    // Versions

    pub fn add_game_version(
        &self,
        game_id: i64,
        version: &str,
        changelog: &str,
        file_path: &str,
        file_size: u64,
        checksum: &str,
    ) -> Result<(), StoreError> {
        match self.conn().execute(
            "INSERT INTO game_versions (game_id, version, changelog, file_path, file_size, \
             checksum, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![game_id, version, changelog, file_path, file_size as i64, checksum, Utc::now()],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateVersion),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_game_version(
        &self,
        game_id: i64,
        version: &str,
    ) -> Result<Option<GameVersion>, StoreError> {
        let found = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM game_versions \
                     WHERE game_id = ?1 AND version = ?2"
                ),
                params![game_id, version],
                version_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn latest_version(&self, game_id: i64) -> Result<Option<GameVersion>, StoreError> {
        let found = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM game_versions WHERE game_id = ?1 \
                     ORDER BY datetime(created_at) DESC, rowid DESC LIMIT 1"
                ),
                params![game_id],
                version_from_row,
            )
            .optional()?;
        Ok(found)
    }

    // Downloads

    /// Append a download record and bump the game's counter in one
    /// transaction, so the aggregate always equals the row count.
    pub fn record_download(
        &self,
        game_id: i64,
        player_id: i64,
        version: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO downloads (game_id, player_id, version, downloaded_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![game_id, player_id, version, Utc::now()],
        )?;
        tx.execute(
            "UPDATE games SET download_count = download_count + 1 WHERE id = ?1",
            params![game_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn player_downloads(&self, player_id: i64) -> Result<Vec<DownloadRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT d.game_id, g.name, d.version, d.downloaded_at \
             FROM downloads d JOIN games g ON d.game_id = g.id \
             WHERE d.player_id = ?1 ORDER BY datetime(d.downloaded_at) DESC",
        )?;
        let records = stmt
            .query_map(params![player_id], |row| {
                Ok(DownloadRecord {
                    game_id: row.get(0)?,
                    game_name: row.get(1)?,
                    version: row.get(2)?,
                    downloaded_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // Reviews

    /// Insert or replace the player's review and recompute the game's
    /// cached aggregates in the same transaction. Idempotent per
    /// (game, player).
    pub fn upsert_review(
        &self,
        game_id: i64,
        player_id: i64,
        rating: i64,
        comment: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT id FROM games WHERE id = ?1", params![game_id], |_| Ok(()))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::GameNotFound);
        }

        tx.execute(
            "INSERT INTO reviews (game_id, player_id, rating, comment, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
             ON CONFLICT(game_id, player_id) DO UPDATE SET \
             rating = excluded.rating, comment = excluded.comment, \
             updated_at = excluded.updated_at",
            params![game_id, player_id, rating, comment, Utc::now()],
        )?;
        tx.execute(
            "UPDATE games SET \
             average_rating = COALESCE((SELECT AVG(rating) FROM reviews WHERE game_id = ?1), 0.0), \
             rating_count = (SELECT COUNT(*) FROM reviews WHERE game_id = ?1) \
             WHERE id = ?1",
            params![game_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recent reviews first, joined with reviewer usernames.
    pub fn game_reviews(&self, game_id: i64, limit: u32) -> Result<Vec<Review>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.game_id, r.player_id, p.username, r.rating, r.comment, \
             r.created_at, r.updated_at \
             FROM reviews r JOIN players p ON r.player_id = p.id \
             WHERE r.game_id = ?1 ORDER BY datetime(r.created_at) DESC LIMIT ?2",
        )?;
        let reviews = stmt
            .query_map(params![game_id, limit], |row| {
                Ok(Review {
                    game_id: row.get(0)?,
                    player_id: row.get(1)?,
                    username: row.get(2)?,
                    rating: row.get(3)?,
                    comment: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reviews)
    }

    // Rooms

    /// Create a room and enroll the host as its first member, atomically.
    /// The 8-hex-uppercase room code is retried on the (vanishingly rare)
    /// collision.
    pub fn create_room(
        &self,
        game_id: i64,
        host_id: i64,
        name: &str,
        max_players: u32,
    ) -> Result<Room, StoreError> {
        let now = Utc::now();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut created: Option<(i64, String)> = None;
        for _ in 0..4 {
            let code = generate_room_code();
            match tx.execute(
                "INSERT INTO rooms (game_id, host_id, name, room_code, max_players, \
                 current_players, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 'waiting', ?6)",
                params![game_id, host_id, name, code, max_players, now],
            ) {
                Ok(_) => {
                    created = Some((tx.last_insert_rowid(), code));
                    break;
                }
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let Some((room_id, room_code)) = created else {
            return Err(StoreError::RoomCodeCollision);
        };

        tx.execute(
            "INSERT INTO room_members (room_id, player_id, joined_at) VALUES (?1, ?2, ?3)",
            params![room_id, host_id, now],
        )?;
        tx.commit()?;

        Ok(Room {
            id: room_id,
            game_id,
            host_id,
            name: name.to_string(),
            room_code,
            max_players,
            current_players: 1,
            status: RoomStatus::Waiting,
            game_port: None,
            created_at: now,
        })
    }

    pub fn get_room(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        let found = self
            .conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                params![room_id],
                room_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Rooms worth showing in the lobby: `playing` rooms, and `waiting`
    /// rooms no older than the expiry window. Newest first.
    pub fn list_active_rooms(&self) -> Result<Vec<RoomListing>, StoreError> {
        self.list_active_rooms_at(Utc::now())
    }

    pub fn list_active_rooms_at(&self, now: DateTime<Utc>) -> Result<Vec<RoomListing>, StoreError> {
        let cutoff = now - Duration::minutes(ROOM_WAIT_TIMEOUT_MINUTES);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROOM_COLUMNS_PREFIXED}, g.name, p.username \
             FROM rooms r JOIN games g ON r.game_id = g.id \
             JOIN players p ON r.host_id = p.id \
             WHERE r.status IN ('waiting', 'playing') \
               AND (r.status = 'playing' OR datetime(r.created_at) > datetime(?1)) \
             ORDER BY datetime(r.created_at) DESC"
        ))?;
        let listings = stmt
            .query_map(params![cutoff], |row| {
                Ok(RoomListing {
                    room: room_from_row(row)?,
                    game_name: row.get(10)?,
                    host_name: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    /// Add a player to a room. All join preconditions are checked inside
    /// the transaction, so concurrent joins cannot overfill a room.
    pub fn join_room(&self, room_id: i64, player_id: i64) -> Result<Room, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let room = tx
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                params![room_id],
                room_from_row,
            )
            .optional()?
            .ok_or(StoreError::RoomNotFound)?;

        if room.status != RoomStatus::Waiting {
            return Err(StoreError::RoomNotWaiting);
        }
        if room.current_players >= room.max_players {
            return Err(StoreError::RoomFull);
        }

        match tx.execute(
            "INSERT INTO room_members (room_id, player_id, joined_at) VALUES (?1, ?2, ?3)",
            params![room_id, player_id, Utc::now()],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::AlreadyInRoom),
            Err(e) => return Err(e.into()),
        }

        tx.execute(
            "UPDATE rooms SET current_players = \
             (SELECT COUNT(*) FROM room_members WHERE room_id = ?1) WHERE id = ?1",
            params![room_id],
        )?;

        let updated = tx.query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
            params![room_id],
            room_from_row,
        )?;
        tx.commit()?;
        Ok(updated)
    }

    /// Remove a player from a room; a no-op for non-members.
    pub fn leave_room(&self, room_id: i64, player_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM room_members WHERE room_id = ?1 AND player_id = ?2",
            params![room_id, player_id],
        )?;
        tx.execute(
            "UPDATE rooms SET current_players = \
             (SELECT COUNT(*) FROM room_members WHERE room_id = ?1) WHERE id = ?1",
            params![room_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Update room status; a port is only written when given, so closing a
    /// room keeps the port it played on.
    pub fn update_room_status(
        &self,
        room_id: i64,
        status: RoomStatus,
        game_port: Option<u16>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = match game_port {
            Some(port) => conn.execute(
                "UPDATE rooms SET status = ?1, game_port = ?2 WHERE id = ?3",
                params![status.as_str(), port, room_id],
            )?,
            None => conn.execute(
                "UPDATE rooms SET status = ?1 WHERE id = ?2",
                params![status.as_str(), room_id],
            )?,
        };
        Ok(changed > 0)
    }

    pub fn room_members(&self, room_id: i64) -> Result<Vec<RoomMember>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.username FROM room_members rm \
             JOIN players p ON rm.player_id = p.id \
             WHERE rm.room_id = ?1 ORDER BY datetime(rm.joined_at)",
        )?;
        let members = stmt
            .query_map(params![room_id], |row| {
                Ok(RoomMember {
                    player_id: row.get(0)?,
                    username: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    /// Close `waiting` rooms older than the expiry window. Returns how many
    /// were closed.
    pub fn close_stale_rooms(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - Duration::minutes(ROOM_WAIT_TIMEOUT_MINUTES);
        let closed = self.conn().execute(
            "UPDATE rooms SET status = 'closed' \
             WHERE status = 'waiting' AND datetime(created_at) < datetime(?1)",
            params![cutoff],
        )?;
        Ok(closed)
    }
}

const GAME_COLUMNS: &str = "id, name, description, developer_id, current_version, min_players, \
                            max_players, game_type, status, download_count, average_rating, \
                            rating_count, created_at, updated_at";

const VERSION_COLUMNS: &str = "game_id, version, changelog, file_path, file_size, checksum, \
                               created_at";

const ROOM_COLUMNS: &str = "id, game_id, host_id, name, room_code, max_players, \
                            current_players, status, game_port, created_at";

const ROOM_COLUMNS_PREFIXED: &str = "r.id, r.game_id, r.host_id, r.name, r.room_code, \
                                     r.max_players, r.current_players, r.status, r.game_port, \
                                     r.created_at";

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    let game_type: String = row.get(7)?;
    let status: String = row.get(8)?;
    Ok(Game {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        developer_id: row.get(3)?,
        current_version: row.get(4)?,
        min_players: row.get(5)?,
        max_players: row.get(6)?,
        game_type: GameKind::from_str(&game_type).unwrap_or(GameKind::Cli),
        status: GameStatus::from_str(&status).unwrap_or(GameStatus::Inactive),
        download_count: row.get(9)?,
        average_rating: row.get(10)?,
        rating_count: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<GameVersion> {
    let file_size: i64 = row.get(4)?;
    Ok(GameVersion {
        game_id: row.get(0)?,
        version: row.get(1)?,
        changelog: row.get(2)?,
        file_path: row.get(3)?,
        file_size: file_size.max(0) as u64,
        checksum: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    let status: String = row.get(7)?;
    let game_port: Option<i64> = row.get(8)?;
    Ok(Room {
        id: row.get(0)?,
        game_id: row.get(1)?,
        host_id: row.get(2)?,
        name: row.get(3)?,
        room_code: row.get(4)?,
        max_players: row.get(5)?,
        current_players: row.get(6)?,
        status: RoomStatus::from_str(&status).unwrap_or(RoomStatus::Closed),
        game_port: game_port.and_then(|p| u16::try_from(p).ok()),
        created_at: row.get(9)?,
    })
}

fn session_fk(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::Player => "player_id",
        PrincipalKind::Developer => "developer_id",
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// 64-hex-char session token from 32 random bytes.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// 8-hex-uppercase room code from 4 random bytes.
fn generate_room_code() -> String {
    let bytes: [u8; 4] = rand::thread_rng().gen();
    hex::encode_upper(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> CatalogStore {
        CatalogStore::open_in_memory("test-salt").unwrap()
    }

    fn seed_game(store: &CatalogStore, developer_id: i64, name: &str) -> i64 {
        store
            .create_game(&NewGame {
                name: name.to_string(),
                description: "A test game".to_string(),
                developer_id,
                version: "1.0.0".to_string(),
                min_players: 2,
                max_players: 2,
                game_type: GameKind::Cli,
            })
            .unwrap()
    }

    fn seed_player(store: &CatalogStore, username: &str) -> i64 {
        store
            .create_account(PrincipalKind::Player, username, "pw", None)
            .unwrap()
    }

    fn seed_developer(store: &CatalogStore, username: &str) -> i64 {
        store
            .create_account(PrincipalKind::Developer, username, "pw", None)
            .unwrap()
    }

    #[test]
    fn test_duplicate_username_conflicts_within_namespace_only() {
        let store = test_store();
        seed_player(&store, "alice");

        let err = store
            .create_account(PrincipalKind::Player, "alice", "other", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername));

        // Same username in the developer namespace is fine.
        assert!(store
            .create_account(PrincipalKind::Developer, "alice", "pw", None)
            .is_ok());
    }

    #[test]
    fn test_authenticate_success_and_failure() {
        let store = test_store();
        let id = seed_player(&store, "alice");

        let principal = store
            .authenticate(PrincipalKind::Player, "alice", "pw")
            .unwrap()
            .unwrap();
        assert_eq!(principal.id, id);
        assert_eq!(principal.username, "alice");
        assert_eq!(principal.kind, PrincipalKind::Player);

        assert!(store
            .authenticate(PrincipalKind::Player, "alice", "wrong")
            .unwrap()
            .is_none());
        assert!(store
            .authenticate(PrincipalKind::Developer, "alice", "pw")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_session_validate_and_delete() {
        let store = test_store();
        let id = seed_player(&store, "alice");

        let token = store
            .create_session(PrincipalKind::Player, id, None)
            .unwrap();
        assert_eq!(token.len(), 64);

        let principal = store
            .validate_session(PrincipalKind::Player, &token)
            .unwrap()
            .unwrap();
        assert_eq!(principal.id, id);

        // Tokens are namespaced.
        assert!(store
            .validate_session(PrincipalKind::Developer, &token)
            .unwrap()
            .is_none());

        store.delete_session(PrincipalKind::Player, &token).unwrap();
        assert!(store
            .validate_session(PrincipalKind::Player, &token)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_expired_session_rejected_and_purged() {
        let store = test_store();
        let id = seed_player(&store, "alice");

        let token = store
            .create_session(PrincipalKind::Player, id, Some(Duration::seconds(-5)))
            .unwrap();
        assert!(store
            .validate_session(PrincipalKind::Player, &token)
            .unwrap()
            .is_none());

        let purged = store.purge_expired_sessions(Utc::now()).unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn test_duplicate_game_name() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        seed_game(&store, dev, "Connect4");

        let err = store
            .create_game(&NewGame {
                name: "Connect4".to_string(),
                description: String::new(),
                developer_id: dev,
                version: "2.0.0".to_string(),
                min_players: 2,
                max_players: 4,
                game_type: GameKind::Gui,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateGameName));
    }

    #[test]
    fn test_active_games_ordered_by_downloads() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let player = seed_player(&store, "alice");
        let quiet = seed_game(&store, dev, "Quiet");
        let popular = seed_game(&store, dev, "Popular");
        let hidden = seed_game(&store, dev, "Hidden");

        store.record_download(popular, player, "1.0.0").unwrap();
        store.record_download(popular, player, "1.0.0").unwrap();
        store.record_download(quiet, player, "1.0.0").unwrap();
        store
            .update_game_status(hidden, GameStatus::Inactive)
            .unwrap();

        let games = store.list_active_games().unwrap();
        let names: Vec<&str> = games.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Popular", "Quiet"]);
        assert_eq!(games[0].download_count, 2);
    }

    #[test]
    fn test_download_count_matches_records() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let a = seed_player(&store, "alice");
        let b = seed_player(&store, "bob");

        store.record_download(game, a, "1.0.0").unwrap();
        store.record_download(game, b, "1.0.0").unwrap();
        store.record_download(game, a, "1.0.0").unwrap();

        let stored = store.get_game(game).unwrap().unwrap();
        assert_eq!(stored.download_count, 3);
        assert_eq!(store.player_downloads(a).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");

        store
            .add_game_version(game, "1.0.0", "Initial release", "games/1/1.0.0/game_package.zip", 100, "abc")
            .unwrap();
        let err = store
            .add_game_version(game, "1.0.0", "again", "other", 200, "def")
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateVersion));
    }

    #[test]
    fn test_review_upsert_recomputes_aggregates() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let alice = seed_player(&store, "alice");
        let bob = seed_player(&store, "bob");

        store.upsert_review(game, alice, 4, "ok").unwrap();
        store.upsert_review(game, bob, 2, "meh").unwrap();

        let stored = store.get_game(game).unwrap().unwrap();
        assert_eq!(stored.rating_count, 2);
        assert!((stored.average_rating - 3.0).abs() < f64::EPSILON);

        // Second review by the same player replaces, not appends.
        store.upsert_review(game, alice, 5, "great").unwrap();
        let stored = store.get_game(game).unwrap().unwrap();
        assert_eq!(stored.rating_count, 2);
        assert!((stored.average_rating - 3.5).abs() < f64::EPSILON);

        let reviews = store.game_reviews(game, 10).unwrap();
        assert_eq!(reviews.len(), 2);
        let alices: Vec<_> = reviews.iter().filter(|r| r.player_id == alice).collect();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].rating, 5);
        assert_eq!(alices[0].comment, "great");
    }

    #[test]
    fn test_review_upsert_idempotent() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let alice = seed_player(&store, "alice");

        store.upsert_review(game, alice, 4, "ok").unwrap();
        store.upsert_review(game, alice, 4, "ok").unwrap();

        let stored = store.get_game(game).unwrap().unwrap();
        assert_eq!(stored.rating_count, 1);
        assert!((stored.average_rating - 4.0).abs() < f64::EPSILON);
        assert_eq!(store.game_reviews(game, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_review_for_missing_game() {
        let store = test_store();
        let alice = seed_player(&store, "alice");
        let err = store.upsert_review(999, alice, 4, "ok").unwrap_err();
        assert!(matches!(err, StoreError::GameNotFound));
    }

    #[test]
    fn test_create_room_enrolls_host() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");

        let room = store.create_room(game, host, "Alice's Room", 2).unwrap();
        assert_eq!(room.current_players, 1);
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.room_code.len(), 8);
        assert!(room
            .room_code
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        let members = store.room_members(room.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].player_id, host);
    }

    #[test]
    fn test_join_room_updates_count_and_rejects_overfill() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");
        let bob = seed_player(&store, "bob");
        let carol = seed_player(&store, "carol");

        let room = store.create_room(game, host, "Room", 2).unwrap();

        let updated = store.join_room(room.id, bob).unwrap();
        assert_eq!(updated.current_players, 2);

        let err = store.join_room(room.id, carol).unwrap_err();
        assert!(matches!(err, StoreError::RoomFull));
        assert_eq!(store.get_room(room.id).unwrap().unwrap().current_players, 2);

        let err = store.join_room(room.id, bob).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInRoom));

        let err = store.join_room(9999, bob).unwrap_err();
        assert!(matches!(err, StoreError::RoomNotFound));
    }

    #[test]
    fn test_join_rejected_when_not_waiting() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");
        let bob = seed_player(&store, "bob");

        let room = store.create_room(game, host, "Room", 4).unwrap();
        store
            .update_room_status(room.id, RoomStatus::Playing, Some(9000))
            .unwrap();

        let err = store.join_room(room.id, bob).unwrap_err();
        assert!(matches!(err, StoreError::RoomNotWaiting));
    }

    #[test]
    fn test_leave_room_nonmember_is_noop() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");
        let stranger = seed_player(&store, "bob");

        let room = store.create_room(game, host, "Room", 4).unwrap();
        store.leave_room(room.id, stranger).unwrap();
        assert_eq!(store.get_room(room.id).unwrap().unwrap().current_players, 1);
    }

    #[test]
    fn test_membership_count_invariant_after_mutations() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");
        let bob = seed_player(&store, "bob");
        let carol = seed_player(&store, "carol");

        let room = store.create_room(game, host, "Room", 4).unwrap();
        store.join_room(room.id, bob).unwrap();
        store.join_room(room.id, carol).unwrap();
        store.leave_room(room.id, bob).unwrap();

        let current = store.get_room(room.id).unwrap().unwrap().current_players;
        let members = store.room_members(room.id).unwrap();
        assert_eq!(current as usize, members.len());
        assert_eq!(current, 2);
    }

    #[test]
    fn test_stale_waiting_rooms_closed() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");

        let waiting = store.create_room(game, host, "Old", 4).unwrap();
        let playing = store.create_room(game, host, "Busy", 4).unwrap();
        store
            .update_room_status(playing.id, RoomStatus::Playing, Some(9001))
            .unwrap();

        // Seen from eleven minutes in the future, the waiting room is stale.
        let later = Utc::now() + Duration::minutes(11);
        let closed = store.close_stale_rooms(later).unwrap();
        assert_eq!(closed, 1);

        let room = store.get_room(waiting.id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Closed);

        let listings = store.list_active_rooms_at(later).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].room.id, playing.id);
    }

    #[test]
    fn test_active_rooms_hides_aged_waiting_rooms() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");
        let host = seed_player(&store, "alice");

        let room = store.create_room(game, host, "Room", 4).unwrap();

        let now = Utc::now();
        assert_eq!(store.list_active_rooms_at(now).unwrap().len(), 1);

        // Past the window the room no longer lists, even before the sweeper
        // has marked it closed.
        let later = now + Duration::minutes(11);
        assert!(store.list_active_rooms_at(later).unwrap().is_empty());
        let _ = room;
    }

    #[test]
    fn test_update_game_version_and_status() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");

        assert!(store.update_game_version(game, "1.1.0").unwrap());
        let stored = store.get_game(game).unwrap().unwrap();
        assert_eq!(stored.current_version, "1.1.0");

        assert!(store.update_game_status(game, GameStatus::Inactive).unwrap());
        assert!(store.list_active_games().unwrap().is_empty());

        assert!(!store.update_game_version(9999, "2.0.0").unwrap());
    }

    #[test]
    fn test_latest_version_and_lookup() {
        let store = test_store();
        let dev = seed_developer(&store, "dev");
        let game = seed_game(&store, dev, "Connect4");

        store
            .add_game_version(game, "1.0.0", "Initial release", "a", 10, "c1")
            .unwrap();
        store
            .add_game_version(game, "1.1.0", "Fixes", "b", 20, "c2")
            .unwrap();

        let latest = store.latest_version(game).unwrap().unwrap();
        assert_eq!(latest.version, "1.1.0");
        assert_eq!(latest.file_size, 20);

        let specific = store.get_game_version(game, "1.0.0").unwrap().unwrap();
        assert_eq!(specific.checksum, "c1");
        assert!(store.get_game_version(game, "9.9.9").unwrap().is_none());
    }
}
