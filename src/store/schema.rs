//! SQLite schema. Timestamps are bound from Rust as RFC 3339 text; every
//! comparison in queries goes through `datetime()` so the two layers agree.

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS developers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    email         TEXT,
    created_at    TEXT NOT NULL,
    last_login    TEXT
);

CREATE TABLE IF NOT EXISTS players (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    email         TEXT,
    created_at    TEXT NOT NULL,
    last_login    TEXT
);

CREATE TABLE IF NOT EXISTS developer_sessions (
    session_token TEXT PRIMARY KEY,
    developer_id  INTEGER NOT NULL REFERENCES developers(id),
    expires_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS player_sessions (
    session_token TEXT PRIMARY KEY,
    player_id     INTEGER NOT NULL REFERENCES players(id),
    expires_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS games (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT UNIQUE NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    developer_id    INTEGER NOT NULL REFERENCES developers(id),
    current_version TEXT NOT NULL,
    min_players     INTEGER NOT NULL,
    max_players     INTEGER NOT NULL,
    game_type       TEXT NOT NULL DEFAULT 'cli',
    status          TEXT NOT NULL DEFAULT 'active',
    download_count  INTEGER NOT NULL DEFAULT 0,
    average_rating  REAL NOT NULL DEFAULT 0.0,
    rating_count    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS game_versions (
    game_id    INTEGER NOT NULL REFERENCES games(id),
    version    TEXT NOT NULL,
    changelog  TEXT NOT NULL DEFAULT '',
    file_path  TEXT NOT NULL,
    file_size  INTEGER NOT NULL,
    checksum   TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(game_id, version)
);

CREATE TABLE IF NOT EXISTS downloads (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id       INTEGER NOT NULL REFERENCES games(id),
    player_id     INTEGER NOT NULL REFERENCES players(id),
    version       TEXT NOT NULL,
    downloaded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reviews (
    game_id    INTEGER NOT NULL REFERENCES games(id),
    player_id  INTEGER NOT NULL REFERENCES players(id),
    rating     INTEGER NOT NULL,
    comment    TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(game_id, player_id)
);

CREATE TABLE IF NOT EXISTS rooms (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id         INTEGER NOT NULL REFERENCES games(id),
    host_id         INTEGER NOT NULL REFERENCES players(id),
    name            TEXT NOT NULL,
    room_code       TEXT UNIQUE NOT NULL,
    max_players     INTEGER NOT NULL,
    current_players INTEGER NOT NULL DEFAULT 1,
    status          TEXT NOT NULL DEFAULT 'waiting',
    game_port       INTEGER,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS room_members (
    room_id   INTEGER NOT NULL REFERENCES rooms(id),
    player_id INTEGER NOT NULL REFERENCES players(id),
    joined_at TEXT NOT NULL,
    UNIQUE(room_id, player_id)
);

CREATE INDEX IF NOT EXISTS idx_games_status ON games(status);
CREATE INDEX IF NOT EXISTS idx_rooms_status ON rooms(status);
CREATE INDEX IF NOT EXISTS idx_downloads_player ON downloads(player_id);
CREATE INDEX IF NOT EXISTS idx_reviews_game ON reviews(game_id);
";
