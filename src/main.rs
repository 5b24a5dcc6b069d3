#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use game_store_server::artifact::ArtifactStore;
use game_store_server::clients::ClientRegistry;
use game_store_server::config::{self, loader};
use game_store_server::developer::DeveloperServer;
use game_store_server::lobby::LobbyServer;
use game_store_server::net;
use game_store_server::store::CatalogStore;
use game_store_server::supervisor::GameSupervisor;
use game_store_server::{logging, sweeper};

/// Game Store Server -- distribution and session core for a multi-user
/// game store
#[derive(Parser, Debug)]
#[command(name = "game-store-server")]
#[command(about = "Game store server: catalog, downloads, rooms, and game-server supervision")]
#[command(version)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate configuration and exit without starting the server.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Arc::new(config::load(cli.config.as_deref()));

    if cli.print_config {
        let json = serde_json::to_string_pretty(&*cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = loader::validate(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Lobby port: {}", cfg.network.lobby_port);
                println!("  Developer port: {}", cfg.network.developer_port);
                println!("  Game server ports from: {}", cfg.game_server.start_port);
                println!("  Database: {}", cfg.storage.db_path.display());
                println!("  Games dir: {}", cfg.storage.games_dir.display());
                println!("  Chunk size: {} bytes", cfg.transfer.chunk_size);
                println!("  Max upload: {} bytes", cfg.transfer.max_file_size);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!("invalid configuration:\n{e}"))?;

    logging::init_with_config(&cfg.logging);
    tracing::info!("Starting game store server");

    // Durable state: catalog database plus the artifact tree.
    let store = Arc::new(CatalogStore::open(
        &cfg.storage.db_path,
        &cfg.session.password_salt,
    )?);
    let artifacts = ArtifactStore::new(&cfg.storage.games_dir, &cfg.storage.temp_dir);
    artifacts.ensure_layout()?;
    std::fs::create_dir_all(&cfg.storage.plugins_dir)?;

    let supervisor = GameSupervisor::new(
        Arc::clone(&store),
        artifacts.clone(),
        cfg.game_server.python_bin.clone(),
        cfg.game_server.start_port,
    );
    let clients = Arc::new(ClientRegistry::new());

    // Bind both listeners before serving; the developer listener never
    // lands on the port the lobby took.
    let host = cfg.network.lobby_host.clone();
    let (lobby_listener, lobby_port) = net::bind_with_probe(
        &host,
        cfg.network.lobby_port,
        cfg.network.port_probe_limit,
        None,
    )
    .await?;
    let (developer_listener, developer_port) = net::bind_with_probe(
        &host,
        cfg.network.developer_port,
        cfg.network.port_probe_limit,
        Some(lobby_port),
    )
    .await?;

    tracing::info!(%host, lobby_port, "Lobby server listening");
    tracing::info!(%host, developer_port, "Developer server listening");
    tracing::info!(
        start_port = cfg.game_server.start_port,
        "Game servers will use ports from here"
    );

    let lobby = LobbyServer::new(
        Arc::clone(&store),
        Arc::clone(&supervisor),
        Arc::clone(&clients),
        &cfg,
    );
    let developer = DeveloperServer::new(Arc::clone(&store), artifacts, &cfg);

    tokio::spawn(sweeper::run(Arc::clone(&store)));

    let lobby_task = tokio::spawn(lobby.serve(lobby_listener));
    let developer_task = tokio::spawn(developer.serve(developer_listener));

    tokio::select! {
        result = lobby_task => {
            tracing::error!(?result, "Lobby server stopped");
        }
        result = developer_task => {
            tracing::error!(?result, "Developer server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Children do not outlive the store process.
    supervisor.shutdown_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_default_no_flags() {
        let cli = Cli::try_parse_from(["game-store-server"]).unwrap();
        assert!(!cli.validate_config);
        assert!(!cli.print_config);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_config_path() {
        let cli = Cli::try_parse_from(["game-store-server", "--config", "server.json"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("server.json")));
    }

    #[test]
    fn test_cli_validate_and_print_conflict() {
        let result =
            Cli::try_parse_from(["game-store-server", "--validate-config", "--print-config"]);
        assert!(result.is_err());
    }
}
