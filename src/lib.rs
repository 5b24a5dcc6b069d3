#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_arguments,
    clippy::too_many_lines
)]

//! # Game Store Server
//!
//! Distribution and session core of a multi-user game store: developers
//! publish versioned game packages, players browse, download, rate, and form
//! rooms around them, and each started room gets its own supervised
//! game-server child process on a dynamically allocated TCP port.
//!
//! Two framed-TCP listeners (lobby and developer) share one wire protocol;
//! durable state lives in a single SQLite file plus an on-disk artifact tree.

/// On-disk layout for packaged game versions and extracted trees
pub mod artifact;

/// Connected-clients registry for unsolicited notifications
pub mod clients;

/// Server configuration loading and defaults
pub mod config;

/// Developer session service: uploads, updates, soft-delete
pub mod developer;

/// Lobby session service: auth, catalog, downloads, rooms, reviews
pub mod lobby;

/// Structured logging configuration
pub mod logging;

/// Listener binding with port probing
pub mod net;

/// Wire protocol: message tags, frame codec, typed payloads
pub mod protocol;

/// Durable catalog store over SQLite
pub mod store;

/// Game-server subprocess supervisor
pub mod supervisor;

/// Background closure of stale waiting rooms
pub mod sweeper;
