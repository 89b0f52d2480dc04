// In-process transport for singleplayer games and archived-game replay.
//
// `LocalTransport` plays the relay's part without a network. A small
// `LocalServer` behind a mutex holds the turn log; a timer thread flushes
// it on a fixed cadence, exactly like the relay's turn clock.
//
// Singleplayer: intents sent by the runner are batched into the next turn.
// While paused (the last `toggle_pause` seen asked for it) no turns are
// produced unless the batch contains another `toggle_pause`. Hashes
// reported by the runner are written into the turn log, and when a winner
// is reported the log becomes a `PartialGameRecord` handed to the record
// sink.
//
// Replay: turns come from the archived record instead of from intents, and
// flow control uses `turn_complete`: the next turn is released only after
// every earlier one has been applied, so a slow simulation never falls
// behind the replay clock. Hashes reported by the runner are compared with
// the ones stored in the record, and a mismatch produces a `desync`.
//
// Outbound events are collected while the server lock is held and
// delivered after it is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use frontier_protocol::{
    AllPlayersStats, GameRecord, GameStartInfo, Intent, LogSeverity, PartialGameRecord,
    ServerMessage, Turn, Winner,
};
use tracing::{debug, error, info, warn};

use crate::config::LobbyConfig;
use crate::record::{RecordSink, end_info, unix_millis};
use crate::transport::{CallbackSlot, Transport, TransportCallback, TransportError, TransportEvent};

/// Cadence of the relay's turn clock.
pub const DEFAULT_TURN_INTERVAL: Duration = Duration::from_millis(100);

struct LocalServer {
    start_info: GameStartInfo,
    /// Turns of the archived game, when replaying.
    replay: Option<Vec<Turn>>,
    /// Every turn released so far.
    turns: Vec<Turn>,
    pending: Vec<Intent>,
    paused: bool,
    started: bool,
    acknowledged: u64,
    started_at: u64,
}

impl LocalServer {
    /// Produce the next turn, if one is due.
    fn flush(&mut self) -> Option<ServerMessage> {
        if !self.started {
            return None;
        }
        let turn = match &self.replay {
            Some(record_turns) => {
                let next = self.turns.len();
                if self.acknowledged < next as u64 {
                    return None;
                }
                record_turns.get(next)?.clone()
            }
            None => {
                let unpause = self.pending.iter().any(Intent::is_toggle_pause);
                if self.paused && !unpause {
                    return None;
                }
                for intent in &self.pending {
                    if let Intent::TogglePause { paused, .. } = intent {
                        self.paused = *paused;
                    }
                }
                Turn {
                    turn_number: self.turns.len() as u64,
                    intents: std::mem::take(&mut self.pending),
                    hash: None,
                }
            }
        };
        self.turns.push(turn.clone());
        Some(ServerMessage::Turn { turn })
    }

    fn start_message(&mut self, from_turn: u64) -> ServerMessage {
        self.started = true;
        let from = usize::try_from(from_turn)
            .unwrap_or(usize::MAX)
            .min(self.turns.len());
        ServerMessage::Start {
            turns: self.turns[from..].to_vec(),
            game_start_info: self.start_info.clone(),
            lobby_created_at: self.start_info.lobby_created_at,
        }
    }

    fn check_hash(&mut self, turn_number: u64, hash: i64) -> Option<ServerMessage> {
        let index = usize::try_from(turn_number).ok()?;
        match &self.replay {
            Some(record_turns) => {
                let expected = record_turns.get(index)?.hash?;
                (expected != hash).then_some(ServerMessage::Desync {
                    turn: turn_number,
                    correct_hash: Some(expected),
                    clients_with_correct_hash: 0,
                    total_active_clients: 1,
                    your_hash: Some(hash),
                })
            }
            None => {
                if let Some(turn) = self.turns.get_mut(index) {
                    turn.hash = Some(hash);
                }
                None
            }
        }
    }
}

pub struct LocalTransport {
    server: Arc<Mutex<LocalServer>>,
    callback: CallbackSlot,
    running: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
    turn_interval: Duration,
    record_sink: Option<Arc<dyn RecordSink>>,
}

impl LocalTransport {
    fn with_server(server: LocalServer, turn_interval: Duration) -> Self {
        Self {
            server: Arc::new(Mutex::new(server)),
            callback: CallbackSlot::default(),
            running: Arc::new(AtomicBool::new(false)),
            timer: None,
            turn_interval,
            record_sink: None,
        }
    }

    /// A fresh offline game.
    pub fn singleplayer(start_info: GameStartInfo, turn_interval: Duration) -> Self {
        Self::with_server(
            LocalServer {
                start_info,
                replay: None,
                turns: Vec::new(),
                pending: Vec::new(),
                paused: false,
                started: false,
                acknowledged: 0,
                started_at: unix_millis(),
            },
            turn_interval,
        )
    }

    /// Replay an archived game turn by turn.
    pub fn replay(record: GameRecord, turn_interval: Duration) -> Self {
        Self::with_server(
            LocalServer {
                start_info: record.info.start_info(),
                replay: Some(record.turns),
                turns: Vec::new(),
                pending: Vec::new(),
                paused: false,
                started: false,
                acknowledged: 0,
                started_at: unix_millis(),
            },
            turn_interval,
        )
    }

    /// The local transport a lobby config calls for, if it is a local
    /// session at all.
    pub fn for_lobby(lobby: &LobbyConfig, turn_interval: Duration) -> Option<Self> {
        if let Some(record) = &lobby.game_record {
            return Some(Self::replay(record.clone(), turn_interval));
        }
        lobby
            .game_start_info
            .clone()
            .map(|info| Self::singleplayer(info, turn_interval))
    }

    /// Where finished singleplayer games are written.
    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.record_sink = Some(sink);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalServer>, TransportError> {
        self.server.lock().map_err(|_| TransportError::Closed)
    }

    fn start_timer(&mut self) -> Result<(), TransportError> {
        if self.timer.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let server = self.server.clone();
        let running = self.running.clone();
        let callback = self.callback.clone();
        let interval = self.turn_interval;
        let handle = thread::Builder::new()
            .name("frontier-local-turns".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let message = match server.lock() {
                        Ok(mut server) => server.flush(),
                        Err(_) => break,
                    };
                    if let Some(message) = message {
                        callback.emit(TransportEvent::Message(message));
                    }
                }
            })?;
        self.timer = Some(handle);
        Ok(())
    }

    fn stop_timer(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.timer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

impl Transport for LocalTransport {
    fn connect(&mut self, callback: TransportCallback) -> Result<(), TransportError> {
        self.callback.set(callback);
        self.start_timer()?;
        self.callback.emit(TransportEvent::Connected);
        Ok(())
    }

    fn update_callback(&mut self, callback: TransportCallback) {
        self.callback.set(callback);
    }

    fn join_game(&mut self) -> Result<(), TransportError> {
        let (prestart, start) = {
            let mut server = self.lock()?;
            let prestart = ServerMessage::Prestart {
                game_map: server.start_info.config.game_map,
                game_map_size: server.start_info.config.game_map_size,
            };
            (prestart, server.start_message(0))
        };
        self.callback.emit(TransportEvent::Message(prestart));
        self.callback.emit(TransportEvent::Message(start));
        Ok(())
    }

    fn rejoin_game(&mut self, last_turn: u64) -> Result<(), TransportError> {
        let start = self.lock()?.start_message(last_turn);
        self.callback.emit(TransportEvent::Message(start));
        Ok(())
    }

    fn leave_game(&mut self) {
        self.stop_timer();
        debug!("local game left");
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.start_timer()?;
        self.callback.emit(TransportEvent::Connected);
        Ok(())
    }

    fn turn_complete(&mut self) {
        if let Ok(mut server) = self.server.lock() {
            server.acknowledged += 1;
        }
    }

    fn send_intent(&mut self, intent: Intent) -> Result<(), TransportError> {
        let mut server = self.lock()?;
        if server.replay.is_some() {
            debug!(kind = intent.kind(), "ignoring intent during replay");
            return Ok(());
        }
        server.pending.push(intent);
        Ok(())
    }

    fn send_hash(&mut self, turn_number: u64, hash: i64) -> Result<(), TransportError> {
        let desync = self.lock()?.check_hash(turn_number, hash);
        if let Some(desync) = desync {
            warn!(turn = turn_number, hash, "replay hash does not match the record");
            self.callback.emit(TransportEvent::Message(desync));
        }
        Ok(())
    }

    fn send_winner(
        &mut self,
        winner: Option<Winner>,
        all_players_stats: AllPlayersStats,
    ) -> Result<(), TransportError> {
        let record = {
            let server = self.lock()?;
            if server.replay.is_some() {
                return Ok(());
            }
            let info = end_info(
                &server.start_info,
                &all_players_stats,
                winner,
                server.started_at,
                unix_millis(),
                server.turns.len() as u64,
            );
            PartialGameRecord::new(info, server.turns.clone())
        };
        info!(game_id = %record.info.game_id, turns = record.turns.len(), "local game finished");
        if let Some(sink) = &self.record_sink {
            if let Err(e) = sink.save(&record) {
                error!(error = %e, "saving local game record failed");
            }
        }
        Ok(())
    }

    fn send_log(&mut self, severity: LogSeverity, log: String) -> Result<(), TransportError> {
        match severity {
            LogSeverity::Error | LogSeverity::Fatal => error!(%log, "client log"),
            LogSeverity::Warn => warn!(%log, "client log"),
            LogSeverity::Info => info!(%log, "client log"),
            LogSeverity::Debug => debug!(%log, "client log"),
        }
        Ok(())
    }

    fn is_local(&self) -> bool {
        true
    }
}
