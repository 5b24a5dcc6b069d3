//! Supervisor for per-room game-server child processes.
//!
//! Each started room gets a child running the game's `game_server.py` on a
//! freshly allocated TCP port. Ports come from a monotonic counter and are
//! never reused within the process lifetime, so the room-to-port mapping
//! stays unambiguous. A monitor task per child logs its output, removes the
//! supervisor entry when it exits, and closes the room if it was still
//! playing.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

use crate::artifact::{ArtifactStore, SERVER_SENTINEL};
use crate::store::{CatalogStore, RoomStatus};

/// Grace period after spawn for the child to bind its socket.
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// How long a stopping child gets to exit before it is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("game server script not found: {}", .0.display())]
    ScriptMissing(PathBuf),
    #[error("failed to spawn game server: {0}")]
    Spawn(#[source] io::Error),
    #[error("game server exited during startup")]
    EarlyExit,
}

/// Public view of one running game server.
#[derive(Debug, Clone)]
pub struct RunningServer {
    pub room_id: i64,
    pub game_id: i64,
    pub port: u16,
    pub players: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone)]
struct SupervisorEntry {
    info: RunningServer,
    stop: Arc<Notify>,
    exited: Arc<Notify>,
}

pub struct GameSupervisor {
    store: Arc<CatalogStore>,
    artifacts: ArtifactStore,
    python_bin: String,
    next_port: StdMutex<u16>,
    children: Arc<Mutex<HashMap<i64, SupervisorEntry>>>,
}

impl GameSupervisor {
    pub fn new(
        store: Arc<CatalogStore>,
        artifacts: ArtifactStore,
        python_bin: String,
        start_port: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            artifacts,
            python_bin,
            next_port: StdMutex::new(start_port),
            children: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Next port from the counter. The counter only grows; bind conflicts
    /// surface as child-process failure rather than probing here.
    fn allocate_port(&self) -> u16 {
        let mut next = self
            .next_port
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let port = *next;
        *next = next.wrapping_add(1);
        port
    }

    /// Spawn the game server for a room and return its port.
    ///
    /// The child is `<python_bin> game_server.py --port P --room-id R
    /// --players U1,U2 --game-name N`, run from the game's version
    /// directory (or `current` when no version is given). Returns after a
    /// short grace period, failing if the child already exited.
    pub async fn spawn_game_server(
        self: &Arc<Self>,
        room_id: i64,
        game_id: i64,
        game_name: &str,
        players: Vec<String>,
        version: Option<&str>,
    ) -> Result<u16, SupervisorError> {
        let launch_dir = self.artifacts.launch_dir(game_id, version);
        let script = launch_dir.join(SERVER_SENTINEL);
        if !script.is_file() {
            return Err(SupervisorError::ScriptMissing(script));
        }

        let port = self.allocate_port();
        tracing::info!(room_id, game_id, port, "Spawning game server");

        let mut child = Command::new(&self.python_bin)
            .arg(&script)
            .arg("--port")
            .arg(port.to_string())
            .arg("--room-id")
            .arg(room_id.to_string())
            .arg("--players")
            .arg(players.join(","))
            .arg("--game-name")
            .arg(game_name)
            .current_dir(&launch_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        spawn_output_loggers(room_id, &mut child);

        let entry = SupervisorEntry {
            info: RunningServer {
                room_id,
                game_id,
                port,
                players,
                started_at: Utc::now(),
            },
            stop: Arc::new(Notify::new()),
            exited: Arc::new(Notify::new()),
        };
        self.children.lock().await.insert(room_id, entry.clone());

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.monitor(room_id, child, entry).await;
        });

        tokio::time::sleep(SPAWN_GRACE).await;

        if !self.children.lock().await.contains_key(&room_id) {
            return Err(SupervisorError::EarlyExit);
        }

        tracing::info!(room_id, port, "Game server started");
        Ok(port)
    }

    /// Await child exit (or a stop request), then clean up: drop the entry
    /// and close the room when it is still marked playing.
    async fn monitor(self: Arc<Self>, room_id: i64, mut child: Child, entry: SupervisorEntry) {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    tracing::info!(room_id, code = status.code(), "Game server exited");
                }
                Err(e) => {
                    tracing::error!(room_id, error = %e, "Failed waiting on game server");
                }
            },
            _ = entry.stop.notified() => {
                terminate(room_id, &mut child).await;
            }
        }

        self.children.lock().await.remove(&room_id);

        match self.store.get_room(room_id) {
            Ok(Some(room)) if room.status == RoomStatus::Playing => {
                if let Err(e) = self
                    .store
                    .update_room_status(room_id, RoomStatus::Closed, None)
                {
                    tracing::error!(room_id, error = %e, "Failed to close room after server exit");
                } else {
                    tracing::info!(room_id, "Room closed after game server exit");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(room_id, error = %e, "Failed to look up room after server exit");
            }
        }

        entry.exited.notify_one();
    }

    /// Stop one game server: graceful terminate, kill after five seconds.
    /// Returns false when no server is running for the room.
    pub async fn stop_game_server(&self, room_id: i64) -> bool {
        let Some(entry) = self.children.lock().await.get(&room_id).cloned() else {
            return false;
        };

        let exited = entry.exited.clone();
        entry.stop.notify_one();

        // The monitor owns the child and signals back once cleanup is done.
        let _ = tokio::time::timeout(STOP_TIMEOUT + Duration::from_secs(2), exited.notified()).await;
        tracing::info!(room_id, "Stopped game server");
        true
    }

    /// Stop all children concurrently; used at process shutdown.
    pub async fn shutdown_all(&self) {
        let room_ids: Vec<i64> = self.children.lock().await.keys().copied().collect();
        if room_ids.is_empty() {
            return;
        }
        tracing::info!(count = room_ids.len(), "Shutting down all game servers");
        let stops = room_ids.into_iter().map(|room_id| self.stop_game_server(room_id));
        futures_util::future::join_all(stops).await;
    }

    pub async fn server_info(&self, room_id: i64) -> Option<RunningServer> {
        self.children
            .lock()
            .await
            .get(&room_id)
            .map(|entry| entry.info.clone())
    }

    pub async fn is_server_running(&self, room_id: i64) -> bool {
        self.children.lock().await.contains_key(&room_id)
    }
}

/// Forward the child's stdout/stderr into the server log.
fn spawn_output_loggers(room_id: i64, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(room_id, "game server stdout: {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(room_id, "game server stderr: {line}");
            }
        });
    }
}

/// SIGTERM first where available, SIGKILL when the child does not exit in
/// time.
async fn terminate(room_id: i64, child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) with a known-live pid owned by us.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(room_id, code = status.code(), "Game server terminated");
        }
        Ok(Err(e)) => {
            tracing::error!(room_id, error = %e, "Failed waiting on terminating game server");
        }
        Err(_) => {
            tracing::warn!(room_id, "Game server did not terminate, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_fixture(root: &std::path::Path) -> (Arc<CatalogStore>, ArtifactStore) {
        let store = Arc::new(CatalogStore::open_in_memory("salt").unwrap());
        let artifacts = ArtifactStore::new(root.join("games"), root.join("temp"));
        artifacts.ensure_layout().unwrap();
        (store, artifacts)
    }

    #[tokio::test]
    async fn test_ports_allocated_monotonically() {
        let root = tempfile::tempdir().unwrap();
        let (store, artifacts) = test_fixture(root.path());
        let supervisor = GameSupervisor::new(store, artifacts, "python3".to_string(), 9000);

        assert_eq!(supervisor.allocate_port(), 9000);
        assert_eq!(supervisor.allocate_port(), 9001);
        assert_eq!(supervisor.allocate_port(), 9002);
    }

    #[tokio::test]
    async fn test_spawn_fails_without_script() {
        let root = tempfile::tempdir().unwrap();
        let (store, artifacts) = test_fixture(root.path());
        let supervisor = GameSupervisor::new(store, artifacts, "python3".to_string(), 9000);

        let err = supervisor
            .spawn_game_server(1, 1, "Connect4", vec!["alice".to_string()], Some("1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ScriptMissing(_)));
        assert!(!supervisor.is_server_running(1).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_monitor_and_stop() {
        let root = tempfile::tempdir().unwrap();
        let (store, artifacts) = test_fixture(root.path());

        // A shell script standing in for a long-running game server; the
        // interpreter is configurable precisely so tests can do this.
        let dir = artifacts.version_dir(1, "1.0.0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SERVER_SENTINEL), "sleep 30\n").unwrap();

        let supervisor = GameSupervisor::new(store, artifacts, "/bin/sh".to_string(), 9100);

        let port = supervisor
            .spawn_game_server(
                7,
                1,
                "Connect4",
                vec!["alice".to_string(), "bob".to_string()],
                Some("1.0.0"),
            )
            .await
            .unwrap();
        assert_eq!(port, 9100);
        assert!(supervisor.is_server_running(7).await);

        let info = supervisor.server_info(7).await.unwrap();
        assert_eq!(info.players, vec!["alice", "bob"]);
        assert_eq!(info.port, 9100);

        assert!(supervisor.stop_game_server(7).await);
        assert!(!supervisor.is_server_running(7).await);
        assert!(!supervisor.stop_game_server(7).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_detected_and_room_closed() {
        let root = tempfile::tempdir().unwrap();
        let (store, artifacts) = test_fixture(root.path());

        let dev = store
            .create_account(crate::store::PrincipalKind::Developer, "dev", "pw", None)
            .unwrap();
        let host = store
            .create_account(crate::store::PrincipalKind::Player, "alice", "pw", None)
            .unwrap();
        let game_id = store
            .create_game(&crate::store::NewGame {
                name: "Connect4".to_string(),
                description: String::new(),
                developer_id: dev,
                version: "1.0.0".to_string(),
                min_players: 2,
                max_players: 2,
                game_type: crate::protocol::payloads::GameKind::Cli,
            })
            .unwrap();
        let room = store.create_room(game_id, host, "Room", 2).unwrap();

        let dir = artifacts.version_dir(game_id, "1.0.0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SERVER_SENTINEL), "exit 1\n").unwrap();

        let supervisor =
            GameSupervisor::new(Arc::clone(&store), artifacts, "/bin/sh".to_string(), 9200);

        let err = supervisor
            .spawn_game_server(room.id, game_id, "Connect4", vec!["alice".to_string()], Some("1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::EarlyExit));

        // A room that never reached `playing` is left alone by the monitor.
        let room = store.get_room(room.id).unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
    }
}
