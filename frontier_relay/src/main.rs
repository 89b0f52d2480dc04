// CLI entry point for the Frontier relay.
//
// Starts a standalone relay for one game. Clients connect, join, and the
// game starts once `--players` of them are in. The relay orders intents into
// turns and compares the hashes clients report; it never runs the
// simulation. See `server.rs` for the networking architecture and
// `session.rs` for the game state.
//
// Usage:
//   relay [OPTIONS] --game-id <ID>
//     --host <HOST>           Interface to bind (default: 127.0.0.1)
//     --port <PORT>           Listen port (default: 7878)
//     --players <N>           Players needed to start (default: 2)
//     --max-players <N>       Lobby size (default: --players)
//     --turn-ms <MS>          Turn interval in milliseconds (default: 100)
//     --config <FILE>         Game config as JSON (default: built-in)

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use frontier_protocol::{GameConfig, GameId, SchemaError, Validate};
use frontier_relay::{RelayConfig, start_relay};
use thiserror::Error;
use tracing::{error, info};

/// Frontier turn relay
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game identifier clients must join (8 letters or digits)
    #[arg(short, long, env = "FRONTIER_GAME_ID")]
    game_id: String,

    /// Interface to bind
    #[arg(long, env = "FRONTIER_RELAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Listen port
    #[arg(short, long, env = "FRONTIER_RELAY_PORT", default_value = "7878")]
    port: u16,

    /// Players needed before the game starts
    #[arg(long, default_value = "2")]
    players: usize,

    /// Lobby size; defaults to the number of players
    #[arg(long)]
    max_players: Option<usize>,

    /// Turn interval in milliseconds
    #[arg(long, env = "FRONTIER_TURN_MS", default_value = "100")]
    turn_ms: u64,

    /// Game config as JSON; the built-in default when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum RelayError {
    #[error("invalid argument: {0}")]
    Schema(#[from] SchemaError),
    #[error("could not read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("--max-players ({max}) is below --players ({players})")]
    LobbyTooSmall { players: usize, max: usize },
    #[error("could not start relay: {0}")]
    Start(#[from] std::io::Error),
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

fn load_game_config(path: &Path) -> Result<GameConfig, RelayError> {
    let bytes = std::fs::read(path).map_err(|source| RelayError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let config: GameConfig =
        serde_json::from_slice(&bytes).map_err(|source| RelayError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

fn relay_config(args: Args) -> Result<RelayConfig, RelayError> {
    let max_players = args.max_players.unwrap_or(args.players);
    if max_players < args.players {
        return Err(RelayError::LobbyTooSmall {
            players: args.players,
            max: max_players,
        });
    }
    let game_config = match &args.config {
        Some(path) => load_game_config(path)?,
        None => GameConfig::default(),
    };
    Ok(RelayConfig {
        host: args.host,
        port: args.port,
        game_id: GameId::new(args.game_id)?,
        game_config,
        expected_players: args.players,
        max_players,
        turn_interval: Duration::from_millis(args.turn_ms.max(1)),
    })
}

fn run(args: Args) -> Result<(), RelayError> {
    let config = relay_config(args)?;
    let (handle, addr) = start_relay(config)?;
    info!(%addr, "relay running; stop with Ctrl+C");

    // Runs until the process is terminated; SIGINT and SIGTERM end it
    // directly.
    handle.wait();
    Ok(())
}

fn main() -> std::process::ExitCode {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = Args::parse();

    match run(args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay failed");
            std::process::ExitCode::FAILURE
        }
    }
}
