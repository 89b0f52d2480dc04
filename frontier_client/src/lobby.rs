// Lobby phase: from connecting to a running game.
//
// `join_lobby` connects the transport and hands it to a lobby thread that
// waits for the game to start:
// - The first `Connected` sends `join`; any later one (after a reconnect)
//   sends `rejoin(0)`.
// - `prestart` is passed to the host so it can begin loading the map.
// - `start` creates a `ClientGameRunner` with the `GameStartInfo` the relay
//   sent, moves the transport into it and starts it. The runner swaps the
//   transport callback for its own, so the lobby thread ends there.
// - `error` with `full-lobby` leaves quietly; any other error is shown and
//   the lobby keeps waiting.
//
// `LobbyHandle` is the embedder's view of the whole session, lobby and game
// alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use frontier_protocol::message::ERROR_FULL_LOBBY;
use frontier_protocol::{GameStartInfo, ServerMessage};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{LobbyConfig, RunnerTimings};
use crate::host::{ErrorReport, HostSurface};
use crate::local::{DEFAULT_TURN_INTERVAL, LocalTransport};
use crate::record::RecordSink;
use crate::runner::{ClientGameRunner, EventBus, RunnerContext};
use crate::transport::{Credentials, NetTransport, Transport, TransportCallback, TransportEvent};

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
    #[error("spawning lobby thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Clone, Default)]
pub struct LobbyOptions {
    pub timings: RunnerTimings,
    pub record_sink: Option<Arc<dyn RecordSink>>,
}

/// The transport a lobby config calls for: in-process for singleplayer and
/// replay, TCP to the relay otherwise.
pub fn open_transport(lobby: &LobbyConfig, options: &LobbyOptions) -> Box<dyn Transport> {
    match LocalTransport::for_lobby(lobby, DEFAULT_TURN_INTERVAL) {
        Some(local) => match &options.record_sink {
            Some(sink) => Box::new(local.with_record_sink(sink.clone())),
            None => Box::new(local),
        },
        None => Box::new(NetTransport::new(
            lobby.server_addr.clone(),
            Credentials::from_lobby(lobby),
        )),
    }
}

enum LobbyEvent {
    Transport(TransportEvent),
    Leave,
}

type RunnerSlot = Arc<Mutex<Option<ClientGameRunner>>>;

pub struct LobbyHandle {
    events: Sender<LobbyEvent>,
    thread: Option<JoinHandle<()>>,
    runner: RunnerSlot,
    lobby_done: Arc<AtomicBool>,
}

/// Connect and wait for the game in the background.
pub fn join_lobby(
    lobby: LobbyConfig,
    mut transport: Box<dyn Transport>,
    host: Arc<dyn HostSurface>,
    options: LobbyOptions,
) -> Result<LobbyHandle, LobbyError> {
    let (events, inbox) = mpsc::channel();
    let forward = events.clone();
    let callback: TransportCallback = Arc::new(move |event| {
        let _ = forward.send(LobbyEvent::Transport(event));
    });
    transport.connect(callback)?;

    let runner: RunnerSlot = Arc::new(Mutex::new(None));
    let lobby_done = Arc::new(AtomicBool::new(false));
    let phase = LobbyPhase {
        lobby,
        transport: Some(transport),
        host,
        options,
        runner: runner.clone(),
        connected_before: false,
    };
    let done = lobby_done.clone();
    let thread = thread::Builder::new()
        .name("frontier-lobby".into())
        .spawn(move || {
            phase.run(inbox);
            done.store(true, Ordering::SeqCst);
        })?;
    Ok(LobbyHandle {
        events,
        thread: Some(thread),
        runner,
        lobby_done,
    })
}

impl LobbyHandle {
    /// Leave the session. Refused (returns false) while the local player is
    /// still alive, unless `force` is set.
    pub fn leave(&mut self, force: bool) -> bool {
        if !force && self.should_prevent_window_close() {
            info!("leave refused while the player is alive");
            return false;
        }
        let _ = self.events.send(LobbyEvent::Leave);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let runner = self.runner.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut runner) = runner {
            runner.stop();
        }
        true
    }

    pub fn should_prevent_window_close(&self) -> bool {
        self.with_runner(|r| r.should_prevent_window_close())
            .unwrap_or(false)
    }

    /// The running game's UI channel, once the game has started.
    pub fn event_bus(&self) -> Option<EventBus> {
        self.with_runner(ClientGameRunner::event_bus)
    }

    pub fn game_started(&self) -> bool {
        self.with_runner(|_| ()).is_some()
    }

    /// True once the lobby gave up, or the game it started has stopped.
    pub fn is_finished(&self) -> bool {
        if !self.lobby_done.load(Ordering::SeqCst) {
            return false;
        }
        self.with_runner(|r| !r.is_active()).unwrap_or(true)
    }

    fn with_runner<T>(&self, f: impl FnOnce(&ClientGameRunner) -> T) -> Option<T> {
        let slot = self.runner.lock().ok()?;
        slot.as_ref().map(f)
    }
}

impl Drop for LobbyHandle {
    fn drop(&mut self) {
        self.leave(true);
    }
}

struct LobbyPhase {
    lobby: LobbyConfig,
    transport: Option<Box<dyn Transport>>,
    host: Arc<dyn HostSurface>,
    options: LobbyOptions,
    runner: RunnerSlot,
    connected_before: bool,
}

impl LobbyPhase {
    fn run(mut self, inbox: Receiver<LobbyEvent>) {
        while let Ok(event) = inbox.recv() {
            let keep_going = match event {
                LobbyEvent::Transport(event) => self.on_transport(event),
                LobbyEvent::Leave => false,
            };
            if !keep_going {
                break;
            }
        }
        if let Some(mut transport) = self.transport.take() {
            transport.leave_game();
        }
    }

    fn on_transport(&mut self, event: TransportEvent) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match event {
            TransportEvent::Connected => {
                let sent = if self.connected_before {
                    transport.rejoin_game(0)
                } else {
                    info!(game_id = %self.lobby.game_id, "joining game");
                    transport.join_game()
                };
                self.connected_before = true;
                if let Err(e) = sent {
                    self.fatal("could not join the game", e.to_string());
                    return false;
                }
                true
            }
            TransportEvent::Disconnected => {
                warn!("lost connection while in lobby, reconnecting");
                if let Err(e) = transport.reconnect() {
                    self.fatal("connection to the game server lost", e.to_string());
                    return false;
                }
                true
            }
            TransportEvent::Message(ServerMessage::Prestart {
                game_map,
                game_map_size,
            }) => {
                self.host.on_prestart(game_map, game_map_size);
                true
            }
            TransportEvent::Message(ServerMessage::Start {
                game_start_info, ..
            }) => {
                self.start_game(game_start_info);
                false
            }
            TransportEvent::Message(ServerMessage::Error { error, message }) => {
                if error == ERROR_FULL_LOBBY {
                    info!(game_id = %self.lobby.game_id, "lobby is full, leaving");
                    return false;
                }
                self.host.show_error(&ErrorReport {
                    message: error,
                    detail: message,
                    game_id: self.lobby.game_id.clone(),
                    client_id: self.lobby.client_id.clone(),
                    fatal: false,
                });
                true
            }
            TransportEvent::Message(_) => true,
        }
    }

    fn start_game(&mut self, start_info: GameStartInfo) {
        if start_info.game_id != self.lobby.game_id {
            self.fatal(
                "game start info is for another game",
                format!("expected {}, got {}", self.lobby.game_id, start_info.game_id),
            );
            return;
        }
        let Some(transport) = self.transport.take() else {
            return;
        };
        self.host
            .on_prestart(start_info.config.game_map, start_info.config.game_map_size);
        self.host.on_join(&start_info);
        info!(
            game_id = %start_info.game_id,
            players = start_info.players.len(),
            "game starting"
        );
        let context = RunnerContext {
            lobby: self.lobby.clone(),
            start_info,
            host: self.host.clone(),
            record_sink: self.options.record_sink.clone(),
            timings: self.options.timings,
        };
        let started = ClientGameRunner::create(context, transport).and_then(|mut runner| {
            runner.start()?;
            Ok(runner)
        });
        match started {
            Ok(runner) => {
                if let Ok(mut slot) = self.runner.lock() {
                    *slot = Some(runner);
                }
            }
            Err(e) => self.fatal("error creating client game", e.to_string()),
        }
    }

    fn fatal(&self, message: &str, detail: String) {
        error!(%message, %detail, "lobby failed");
        self.host.show_error(&ErrorReport {
            message: message.to_string(),
            detail: Some(detail),
            game_id: self.lobby.game_id.clone(),
            client_id: self.lobby.client_id.clone(),
            fatal: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use frontier_protocol::{
        AllPlayersStats, ClientId, GameConfig, GameId, GameMapSize, GameMapType, Intent,
        LogSeverity, Player, Winner,
    };
    use frontier_sim::GameUpdates;

    use super::*;
    use crate::host::TickMetrics;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct RecordingHost {
        prestarts: Mutex<u32>,
        joins: Mutex<Vec<GameStartInfo>>,
        ticks: Mutex<Vec<u64>>,
        errors: Mutex<Vec<ErrorReport>>,
    }

    impl HostSurface for RecordingHost {
        fn on_prestart(&self, _game_map: GameMapType, _game_map_size: GameMapSize) {
            *self.prestarts.lock().unwrap() += 1;
        }
        fn on_join(&self, start_info: &GameStartInfo) {
            self.joins.lock().unwrap().push(start_info.clone());
        }
        fn show_error(&self, report: &ErrorReport) {
            self.errors.lock().unwrap().push(report.clone());
        }
        fn on_update(&self, updates: &GameUpdates, _metrics: TickMetrics) {
            self.ticks.lock().unwrap().push(updates.tick);
        }
    }

    fn me() -> ClientId {
        ClientId::new("LOCAL001").unwrap()
    }

    fn start_info() -> GameStartInfo {
        GameStartInfo {
            game_id: GameId::new("LobbyGm1").unwrap(),
            lobby_created_at: 0,
            config: GameConfig::default(),
            players: vec![Player {
                client_id: me(),
                username: "Solo".into(),
                cosmetics: None,
                is_lobby_creator: Some(true),
            }],
        }
    }

    fn lobby(start: Option<GameStartInfo>) -> LobbyConfig {
        LobbyConfig {
            server_addr: "127.0.0.1:0".into(),
            cosmetics: None,
            player_name: "Solo".into(),
            client_id: me(),
            game_id: GameId::new("LobbyGm1").unwrap(),
            token: "0b9f3c1e-7a43-4d55-9a4e-3f2b8f7c6d10".into(),
            turnstile_token: None,
            game_start_info: start,
            game_record: None,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn singleplayer_lobby_starts_a_running_game() {
        let config = lobby(Some(start_info()));
        let host = Arc::new(RecordingHost::default());
        let options = LobbyOptions::default();
        let transport = Box::new(
            LocalTransport::for_lobby(&config, Duration::from_millis(5)).unwrap(),
        );
        let mut handle = join_lobby(config, transport, host.clone(), options).unwrap();

        wait_until(|| host.ticks.lock().unwrap().len() >= 5);
        assert!(handle.game_started());
        assert!(*host.prestarts.lock().unwrap() >= 1);
        assert_eq!(host.joins.lock().unwrap().len(), 1);
        let ticks = host.ticks.lock().unwrap().clone();
        assert_eq!(ticks[..5], [0, 1, 2, 3, 4]);

        // Not spawned yet, so nothing holds the window open.
        assert!(handle.leave(false));
        assert!(handle.is_finished());
        assert!(host.errors.lock().unwrap().is_empty());
    }

    /// Answers `join` with a canned server message.
    struct ScriptedTransport {
        callback: Option<TransportCallback>,
        reply: ServerMessage,
        left: Arc<AtomicBool>,
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self, callback: TransportCallback) -> Result<(), TransportError> {
            callback(TransportEvent::Connected);
            self.callback = Some(callback);
            Ok(())
        }
        fn update_callback(&mut self, callback: TransportCallback) {
            self.callback = Some(callback);
        }
        fn join_game(&mut self) -> Result<(), TransportError> {
            if let Some(callback) = &self.callback {
                callback(TransportEvent::Message(self.reply.clone()));
            }
            Ok(())
        }
        fn rejoin_game(&mut self, _last_turn: u64) -> Result<(), TransportError> {
            Ok(())
        }
        fn leave_game(&mut self) {
            self.left.store(true, Ordering::SeqCst);
        }
        fn reconnect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn turn_complete(&mut self) {}
        fn send_intent(&mut self, _intent: Intent) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_hash(&mut self, _turn_number: u64, _hash: i64) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_winner(
            &mut self,
            _winner: Option<Winner>,
            _all_players_stats: AllPlayersStats,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_log(&mut self, _severity: LogSeverity, _log: String) -> Result<(), TransportError> {
            Ok(())
        }
        fn is_local(&self) -> bool {
            false
        }
    }

    fn scripted(reply: ServerMessage) -> (Box<ScriptedTransport>, Arc<AtomicBool>) {
        let left = Arc::new(AtomicBool::new(false));
        (
            Box::new(ScriptedTransport {
                callback: None,
                reply,
                left: left.clone(),
            }),
            left,
        )
    }

    #[test]
    fn full_lobby_leaves_quietly() {
        let host = Arc::new(RecordingHost::default());
        let (transport, left) = scripted(ServerMessage::Error {
            error: ERROR_FULL_LOBBY.into(),
            message: None,
        });
        let handle = join_lobby(lobby(None), transport, host.clone(), LobbyOptions::default())
            .unwrap();
        wait_until(|| handle.is_finished());
        assert!(left.load(Ordering::SeqCst));
        assert!(!handle.game_started());
        assert!(host.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn start_for_another_game_is_fatal() {
        let host = Arc::new(RecordingHost::default());
        let mut other = start_info();
        other.game_id = GameId::new("OtherGm1").unwrap();
        let (transport, _left) = scripted(ServerMessage::Start {
            turns: vec![],
            game_start_info: other,
            lobby_created_at: 0,
        });
        let handle = join_lobby(lobby(None), transport, host.clone(), LobbyOptions::default())
            .unwrap();
        wait_until(|| handle.is_finished());
        let errors = host.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].fatal);
        assert!(host.joins.lock().unwrap().is_empty());
    }
}
