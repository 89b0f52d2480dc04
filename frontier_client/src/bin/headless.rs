// Headless Frontier client.
//
// Runs one session without a renderer and prints a JSON summary when it
// ends: a networked game against a relay, an offline singleplayer game, or
// the replay of an archived record. Useful for soak tests, for checking a
// record replays without desyncs, and as a scripted player.
//
// Usage:
//   headless [OPTIONS]
//     --server <ADDR>        Relay address (default: 127.0.0.1:7878)
//     --game-id <ID>         Game to join (8 letters or digits)
//     --singleplayer         Play offline against nobody
//     --replay <FILE>        Replay an archived game record
//     --records <DIR>        Write finished game records here
//     --max-seconds <N>      Leave after N seconds (0 = until the game ends)
//
// Timings come from `FRONTIER_*` environment variables, and a local `.env`
// file is loaded first.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;
use frontier_client::{
    ConfigError, DesyncNotice, ErrorReport, HostSurface, JsonFileRecordSink, LobbyConfig,
    LobbyError, LobbyOptions, RecordError, RecordSink, RunnerTimings, TickMetrics, UiEvent,
    join_lobby, load_record, open_transport,
};
use frontier_protocol::{ClientId, GameConfig, GameId, GameStartInfo, Player, SchemaError, Winner};
use frontier_sim::{GameUpdates, TerrainMap};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

/// Headless Frontier client
#[derive(Parser, Debug)]
#[command(name = "headless")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address
    #[arg(short, long, env = "FRONTIER_RELAY_ADDR", default_value = "127.0.0.1:7878")]
    server: String,

    /// Game to join; random when omitted
    #[arg(short, long, env = "FRONTIER_GAME_ID")]
    game_id: Option<String>,

    /// Client identifier; random when omitted
    #[arg(long, env = "FRONTIER_CLIENT_ID")]
    client_id: Option<String>,

    /// Display name
    #[arg(short, long, default_value = "Headless")]
    name: String,

    /// Auth token (UUID or JWT); a fresh UUID when omitted
    #[arg(long, env = "FRONTIER_TOKEN")]
    token: Option<String>,

    /// Play an offline singleplayer game
    #[arg(long, conflicts_with = "replay")]
    singleplayer: bool,

    /// Singleplayer game timer in minutes
    #[arg(long, requires = "singleplayer")]
    timer_minutes: Option<u32>,

    /// Replay an archived game record
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Directory for finished game records
    #[arg(long, env = "FRONTIER_RECORD_DIR")]
    records: Option<PathBuf>,

    /// Leave after this many seconds (0 = until the game ends)
    #[arg(long, default_value = "0")]
    max_seconds: u64,

    /// Do not spawn automatically once the game starts
    #[arg(long)]
    no_spawn: bool,
}

#[derive(Debug, Error)]
enum HeadlessError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Lobby(#[from] LobbyError),
    #[error("invalid argument: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    game_id: String,
    client_id: String,
    ticks: u64,
    last_hash: Option<i64>,
    desyncs: Vec<u64>,
    errors: Vec<String>,
    fatal: bool,
    winner: Option<Winner>,
    max_tick_execution_micros: u64,
}

/// Collects what the session reports into a `Summary`.
#[derive(Default)]
struct SummarySurface {
    summary: Mutex<Summary>,
    start_info: Mutex<Option<GameStartInfo>>,
}

impl SummarySurface {
    fn lock(&self) -> Option<std::sync::MutexGuard<'_, Summary>> {
        self.summary.lock().ok()
    }
}

impl HostSurface for SummarySurface {
    fn on_join(&self, start_info: &GameStartInfo) {
        info!(players = start_info.players.len(), "joined game");
        if let Ok(mut slot) = self.start_info.lock() {
            *slot = Some(start_info.clone());
        }
    }

    fn show_error(&self, report: &ErrorReport) {
        warn!(%report, fatal = report.fatal, "session error");
        if let Some(mut summary) = self.lock() {
            summary.errors.push(report.to_string());
            summary.fatal |= report.fatal;
        }
    }

    fn on_desync(&self, notice: &DesyncNotice) {
        if let Some(mut summary) = self.lock() {
            summary.desyncs.push(notice.turn);
        }
    }

    fn on_update(&self, updates: &GameUpdates, metrics: TickMetrics) {
        if let Some(mut summary) = self.lock() {
            summary.ticks = updates.tick + 1;
            if let Some(hash) = updates.hashes.last() {
                summary.last_hash = Some(hash.hash);
            }
            if let Some(win) = &updates.win {
                summary.winner = Some(win.winner.clone());
            }
            summary.max_tick_execution_micros = summary
                .max_tick_execution_micros
                .max(metrics.tick_execution_duration.as_micros() as u64);
        }
    }
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
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

fn random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn lobby_config(args: &Args) -> Result<LobbyConfig, HeadlessError> {
    let client_id = ClientId::new(args.client_id.clone().unwrap_or_else(random_id))?;
    let game_record = args.replay.as_deref().map(load_record).transpose()?;
    let game_id = match (&game_record, &args.game_id) {
        (Some(record), _) => record.info.game_id.clone(),
        (None, Some(id)) => GameId::new(id.clone())?,
        (None, None) => GameId::new(random_id())?,
    };
    let game_start_info = args.singleplayer.then(|| GameStartInfo {
        game_id: game_id.clone(),
        lobby_created_at: 0,
        config: GameConfig {
            max_timer_value: args.timer_minutes,
            ..GameConfig::default()
        },
        players: vec![Player {
            client_id: client_id.clone(),
            username: args.name.clone(),
            cosmetics: None,
            is_lobby_creator: Some(true),
        }],
    });
    Ok(LobbyConfig {
        server_addr: args.server.clone(),
        cosmetics: None,
        player_name: args.name.clone(),
        client_id,
        game_id,
        token: args
            .token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        turnstile_token: None,
        game_start_info,
        game_record,
    })
}

/// A land tile for this player, spread around the map by start-info order.
fn spawn_tile(start_info: &GameStartInfo, client_id: &ClientId) -> Option<u32> {
    let index = start_info
        .players
        .iter()
        .position(|p| &p.client_id == client_id)?;
    let map = TerrainMap::generate(start_info.config.game_map, start_info.config.game_map_size);
    let stride = map.tile_count() / start_info.players.len().max(1) as u32;
    map.land_tile_from(stride * index as u32 + stride / 2)
}

fn run(args: Args) -> Result<Summary, HeadlessError> {
    let timings = RunnerTimings::from_env()?;
    let lobby = lobby_config(&args)?;
    let replay = lobby.is_replay();
    let record_sink = args
        .records
        .clone()
        .map(|dir| Arc::new(JsonFileRecordSink::new(dir)) as Arc<dyn RecordSink>);
    let options = LobbyOptions {
        timings,
        record_sink,
    };
    let surface = Arc::new(SummarySurface::default());
    if let Some(mut summary) = surface.lock() {
        summary.game_id = lobby.game_id.to_string();
        summary.client_id = lobby.client_id.to_string();
    }

    info!(
        game_id = %lobby.game_id,
        client_id = %lobby.client_id,
        local = lobby.is_local(),
        replay,
        "starting session"
    );
    let client_id = lobby.client_id.clone();
    let transport = open_transport(&lobby, &options);
    let mut handle = join_lobby(lobby, transport, surface.clone(), options)?;

    let deadline =
        (args.max_seconds > 0).then(|| Instant::now() + Duration::from_secs(args.max_seconds));
    let mut spawned = replay || args.no_spawn;
    while !handle.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("time limit reached, leaving");
            break;
        }
        if !spawned {
            let start_info = surface.start_info.lock().ok().and_then(|s| s.clone());
            if let (Some(bus), Some(info)) = (handle.event_bus(), start_info) {
                if let Some(tile) = spawn_tile(&info, &client_id) {
                    info!(tile, "spawning");
                    bus.emit(UiEvent::Spawn { tile });
                }
                spawned = true;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    handle.leave(true);

    let summary = surface
        .summary
        .lock()
        .map(|mut s| std::mem::take(&mut *s))
        .unwrap_or_default();
    Ok(summary)
}

fn main() -> ExitCode {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = Args::parse();

    match run(args) {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "could not encode summary"),
            }
            if summary.fatal || !summary.desyncs.is_empty() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(error = %e, "headless client failed");
            ExitCode::FAILURE
        }
    }
}
