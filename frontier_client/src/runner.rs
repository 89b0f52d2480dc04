// Turn sequencer and game runner.
//
// `ClientGameRunner` drives one client's game after the lobby phase. It
// owns the transport and the simulation worker, and runs a single thread
// fed by an `mpsc` channel of `RunnerEvent`s: transport events, worker
// updates, UI events from the `EventBus`, and stop requests. The channel's
// `recv_timeout` doubles as the frame clock that drives worker heartbeats
// and the connection watchdog.
//
// All decisions live in `RunnerCore`, which takes the current `Instant` as
// an argument so tests can drive it with fake transports, fake workers and
// a synthetic clock.
//
// Turn ordering is the job of `TurnSequencer`:
// - `turns_seen` is the next turn number the worker expects, from 0.
// - A `start` backlog skips turns already seen and fills any gap with
//   empty turns, since a missing turn means nobody acted.
// - A live `turn` must carry exactly `turns_seen`; anything else is logged,
//   reported to the relay and dropped.
// - In replay, `toggle_pause` intents are removed before the worker sees
//   them.
//
// Connection handling: the runner always opens with `rejoin(0)` so it sees
// every turn from the start, and after each reconnect it asks for
// `rejoin(turns_seen)`. The sequencer makes repeated backlogs harmless.
// `Watchdog` reconnects after a stretch of silence from the relay; local
// transports skip it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frontier_protocol::message::is_session_lost;
use frontier_protocol::{
    ClientId, GameId, GameStartInfo, Intent, LogSeverity, PartialGameRecord, ServerMessage, Turn,
    UnitType,
};
use frontier_sim::WinUpdate;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::{LobbyConfig, RunnerTimings};
use crate::host::{DesyncNotice, ErrorReport, HostSurface, TickMetrics};
use crate::record::{RecordSink, end_info, unix_millis};
use crate::transport::{Transport, TransportCallback, TransportError, TransportEvent};
use crate::worker::{
    ErrorUpdate, GameUpdateViewData, SimWorker, WorkerClient, WorkerError, WorkerUpdate,
};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("spawning runner thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("runner already started")]
    AlreadyStarted,
}

/// A live turn that did not carry the expected number.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("got wrong turn: expected turn {expected}, received turn {got}")]
pub struct OrderViolation {
    pub expected: u64,
    pub got: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TurnSequencer {
    turns_seen: u64,
    replay: bool,
}

impl TurnSequencer {
    pub fn new(replay: bool) -> Self {
        Self {
            turns_seen: 0,
            replay,
        }
    }

    /// Next turn number the worker expects.
    pub fn turns_seen(&self) -> u64 {
        self.turns_seen
    }

    /// Turns to forward for a `start` backlog, gaps filled in.
    pub fn apply_backlog(&mut self, turns: &[Turn]) -> Vec<Turn> {
        let mut out = Vec::new();
        for turn in turns {
            if turn.turn_number < self.turns_seen {
                continue;
            }
            while self.turns_seen < turn.turn_number {
                out.push(Turn::empty(self.turns_seen));
                self.turns_seen += 1;
            }
            out.push(self.filter(turn.clone()));
            self.turns_seen += 1;
        }
        out
    }

    pub fn accept_live(&mut self, turn: Turn) -> Result<Turn, OrderViolation> {
        if turn.turn_number != self.turns_seen {
            return Err(OrderViolation {
                expected: self.turns_seen,
                got: turn.turn_number,
            });
        }
        self.turns_seen += 1;
        Ok(self.filter(turn))
    }

    fn filter(&self, mut turn: Turn) -> Turn {
        if self.replay {
            turn.intents.retain(|intent| !intent.is_toggle_pause());
        }
        turn
    }
}

/// Reconnects after the relay has been silent for too long.
#[derive(Clone, Debug)]
pub struct Watchdog {
    armed_at: Instant,
    interval: Duration,
    silence_threshold: Duration,
    last_check: Option<Instant>,
    last_message: Instant,
    failures: u32,
    max_failures: u32,
}

impl Watchdog {
    pub fn new(timings: &RunnerTimings, now: Instant) -> Self {
        Self {
            armed_at: now + timings.watchdog_delay,
            interval: timings.watchdog_interval,
            silence_threshold: timings.silence_threshold,
            last_check: None,
            last_message: now,
            failures: 0,
            max_failures: timings.max_reconnect_failures,
        }
    }

    pub fn message_received(&mut self, now: Instant) {
        self.last_message = now;
        self.failures = 0;
    }

    /// True when a reconnect is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.armed_at {
            return false;
        }
        if let Some(last) = self.last_check {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_check = Some(now);
        now.duration_since(self.last_message) > self.silence_threshold
    }

    /// Count a failed reconnect. True once the limit is reached.
    pub fn reconnect_failed(&mut self) -> bool {
        self.failures += 1;
        self.failures >= self.max_failures
    }

    pub fn reconnect_succeeded(&mut self) {
        self.failures = 0;
    }
}

/// Player actions raised by the UI, translated 1:1 into intents.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    Attack {
        target_id: Option<ClientId>,
        troops: Option<f64>,
    },
    BoatAttack {
        troops: f64,
        dst: u32,
    },
    Spawn {
        tile: u32,
    },
    UpgradeStructure {
        unit: UnitType,
        unit_id: u32,
    },
    /// Any other intent authored by the local player.
    Intent(Intent),
}

pub enum RunnerEvent {
    Transport(TransportEvent),
    Worker(WorkerUpdate),
    Ui(UiEvent),
    Stop,
}

/// Per-runner channel for UI events.
#[derive(Clone)]
pub struct EventBus {
    events: Sender<RunnerEvent>,
}

impl EventBus {
    /// False once the runner has gone away.
    pub fn emit(&self, event: UiEvent) -> bool {
        self.events.send(RunnerEvent::Ui(event)).is_ok()
    }
}

/// Everything a runner needs besides its transport and worker.
pub struct RunnerContext {
    pub lobby: LobbyConfig,
    pub start_info: GameStartInfo,
    pub host: Arc<dyn HostSurface>,
    /// Receives the record of networked games. Local transports keep their
    /// own, complete turn log.
    pub record_sink: Option<Arc<dyn RecordSink>>,
    pub timings: RunnerTimings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub(crate) struct RunnerCore {
    client_id: ClientId,
    game_id: GameId,
    start_info: GameStartInfo,
    host: Arc<dyn HostSurface>,
    record_sink: Option<Arc<dyn RecordSink>>,
    timings: RunnerTimings,
    transport: Box<dyn Transport>,
    worker: Box<dyn SimWorker>,
    sequencer: TurnSequencer,
    watchdog: Watchdog,
    replay: bool,
    is_active: bool,
    last_turn_received: Option<Instant>,
    current_tick_delay: Option<Duration>,
    prevent_close: Arc<AtomicBool>,
    started_at: u64,
    winner_reported: bool,
}

impl RunnerCore {
    pub(crate) fn new(
        context: RunnerContext,
        transport: Box<dyn Transport>,
        worker: Box<dyn SimWorker>,
        now: Instant,
    ) -> Self {
        let replay = context.lobby.is_replay();
        Self {
            client_id: context.lobby.client_id.clone(),
            game_id: context.start_info.game_id.clone(),
            start_info: context.start_info,
            host: context.host,
            record_sink: context.record_sink,
            watchdog: Watchdog::new(&context.timings, now),
            timings: context.timings,
            transport,
            worker,
            sequencer: TurnSequencer::new(replay),
            replay,
            is_active: false,
            last_turn_received: None,
            current_tick_delay: None,
            prevent_close: Arc::new(AtomicBool::new(false)),
            started_at: unix_millis(),
            winner_reported: false,
        }
    }

    /// Wire callbacks into `events` and ask for the whole game from turn 0.
    pub(crate) fn begin(&mut self, events: Sender<RunnerEvent>) -> Result<(), RunnerError> {
        let worker_events = events.clone();
        self.worker.start(Box::new(move |update| {
            let _ = worker_events.send(RunnerEvent::Worker(update));
        }))?;
        let callback: TransportCallback = Arc::new(move |event| {
            let _ = events.send(RunnerEvent::Transport(event));
        });
        self.transport.update_callback(callback);
        self.is_active = true;
        info!(game_id = %self.game_id, client_id = %self.client_id, "game runner started");
        self.transport.rejoin_game(0)?;
        Ok(())
    }

    pub(crate) fn handle(&mut self, event: RunnerEvent, now: Instant) -> Flow {
        match event {
            RunnerEvent::Transport(TransportEvent::Connected) => {
                info!(turns_seen = self.sequencer.turns_seen(), "connected, rejoining");
                if let Err(e) = self.transport.rejoin_game(self.sequencer.turns_seen()) {
                    warn!(error = %e, "rejoin failed");
                }
                Flow::Continue
            }
            RunnerEvent::Transport(TransportEvent::Disconnected) => {
                if self.transport.is_local() {
                    return Flow::Continue;
                }
                warn!("connection to relay lost");
                self.reconnect()
            }
            RunnerEvent::Transport(TransportEvent::Message(message)) => {
                self.watchdog.message_received(now);
                self.on_message(message, now)
            }
            RunnerEvent::Worker(WorkerUpdate::View(view)) => {
                self.on_view(*view);
                Flow::Continue
            }
            RunnerEvent::Worker(WorkerUpdate::Error(update)) => {
                self.on_worker_error(update);
                Flow::Stop
            }
            RunnerEvent::Ui(event) => {
                self.on_ui(event);
                Flow::Continue
            }
            RunnerEvent::Stop => Flow::Stop,
        }
    }

    /// Frame clock: heartbeat the worker and check on the connection.
    pub(crate) fn on_frame(&mut self, now: Instant) -> Flow {
        if !self.is_active {
            return Flow::Stop;
        }
        if let Err(e) = self.worker.send_heartbeat() {
            self.report_fatal("simulation worker stopped", Some(e.to_string()));
            return Flow::Stop;
        }
        if !self.transport.is_local() && self.watchdog.poll(now) {
            warn!(
                silence_ms = self.timings.silence_threshold.as_millis() as u64,
                "no message from relay, reconnecting"
            );
            return self.reconnect();
        }
        Flow::Continue
    }

    /// Stop the worker and leave. Idempotent.
    pub(crate) fn finish(&mut self) {
        if !self.is_active {
            return;
        }
        self.is_active = false;
        self.worker.cleanup();
        self.transport.leave_game();
        info!(game_id = %self.game_id, turns = self.sequencer.turns_seen(), "game runner stopped");
    }

    fn reconnect(&mut self) -> Flow {
        match self.transport.reconnect() {
            Ok(()) => {
                self.watchdog.reconnect_succeeded();
                Flow::Continue
            }
            Err(e) => {
                warn!(error = %e, "reconnect failed");
                if self.watchdog.reconnect_failed() {
                    self.report_fatal("connection to the game server lost", Some(e.to_string()));
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage, now: Instant) -> Flow {
        match message {
            ServerMessage::Prestart { .. } => {
                debug!("prestart after game start ignored");
                Flow::Continue
            }
            ServerMessage::Start { turns, .. } => {
                let forward = self.sequencer.apply_backlog(&turns);
                debug!(
                    backlog = turns.len(),
                    forwarded = forward.len(),
                    turns_seen = self.sequencer.turns_seen(),
                    "start received"
                );
                for turn in forward {
                    if self.forward(turn) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                Flow::Continue
            }
            ServerMessage::Turn { turn } => {
                if let Some(previous) = self.last_turn_received {
                    self.current_tick_delay = Some(now.duration_since(previous));
                }
                self.last_turn_received = Some(now);
                match self.sequencer.accept_live(turn) {
                    Ok(turn) => self.forward(turn),
                    Err(violation) => {
                        error!(
                            expected = violation.expected,
                            got = violation.got,
                            "dropping out-of-order turn"
                        );
                        let _ = self
                            .transport
                            .send_log(LogSeverity::Error, violation.to_string());
                        Flow::Continue
                    }
                }
            }
            ServerMessage::Desync {
                turn,
                correct_hash,
                clients_with_correct_hash,
                total_active_clients,
                your_hash,
            } => {
                warn!(turn, ?correct_hash, ?your_hash, "desync reported by relay");
                self.host.on_desync(&DesyncNotice {
                    turn,
                    correct_hash,
                    clients_with_correct_hash,
                    total_active_clients,
                    your_hash,
                });
                Flow::Continue
            }
            ServerMessage::Error { error, message } if is_session_lost(&error) => {
                self.report_fatal(&error, message);
                Flow::Stop
            }
            ServerMessage::Error { error, message } => {
                warn!(%error, ?message, "relay reported an error");
                self.host.show_error(&ErrorReport {
                    message: error,
                    detail: message,
                    game_id: self.game_id.clone(),
                    client_id: self.client_id.clone(),
                    fatal: false,
                });
                Flow::Continue
            }
            ServerMessage::Ping => {
                trace!("ping");
                Flow::Continue
            }
        }
    }

    fn forward(&mut self, turn: Turn) -> Flow {
        let number = turn.turn_number;
        match self.worker.send_turn(turn) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!(turn = number, error = %e, "could not hand turn to worker");
                self.report_fatal("simulation worker stopped", Some(e.to_string()));
                Flow::Stop
            }
        }
    }

    fn on_view(&mut self, view: GameUpdateViewData) {
        self.transport.turn_complete();
        for hash in &view.updates.hashes {
            if let Err(e) = self.transport.send_hash(hash.tick, hash.hash) {
                debug!(tick = hash.tick, error = %e, "hash not sent");
            }
        }
        if let Some(me) = view.updates.player(&self.client_id) {
            self.prevent_close.store(me.alive, Ordering::SeqCst);
        }
        let metrics = TickMetrics {
            tick_execution_duration: view.tick_execution_duration,
            current_tick_delay: self.current_tick_delay.take(),
        };
        self.host.on_update(&view.updates, metrics);
        if let Some(win) = &view.updates.win {
            self.save_game(win, view.tick + 1);
        }
    }

    fn save_game(&mut self, win: &WinUpdate, num_turns: u64) {
        if self.winner_reported {
            return;
        }
        self.winner_reported = true;
        info!(winner = ?win.winner, num_turns, "game decided");
        if !self.transport.is_local() {
            if let Some(sink) = &self.record_sink {
                let info = end_info(
                    &self.start_info,
                    &win.all_players_stats,
                    Some(win.winner.clone()),
                    self.started_at,
                    unix_millis(),
                    num_turns,
                );
                if let Err(e) = sink.save(&PartialGameRecord::new(info, Vec::new())) {
                    error!(error = %e, "saving game record failed");
                }
            }
        }
        if let Err(e) = self
            .transport
            .send_winner(Some(win.winner.clone()), win.all_players_stats.clone())
        {
            warn!(error = %e, "winner not reported");
        }
    }

    fn on_worker_error(&mut self, update: ErrorUpdate) {
        if let Some(stack) = &update.stack {
            error!(%stack, "simulation stack");
        }
        self.report_fatal(&update.err_msg, update.stack.clone());
    }

    fn on_ui(&mut self, event: UiEvent) {
        if self.replay {
            debug!(?event, "ignoring UI event during replay");
            return;
        }
        let client_id = self.client_id.clone();
        let intent = match event {
            UiEvent::Attack { target_id, troops } => Intent::Attack {
                client_id,
                target_id,
                troops,
            },
            UiEvent::BoatAttack { troops, dst } => Intent::Boat {
                client_id,
                troops,
                dst,
            },
            UiEvent::Spawn { tile } => Intent::Spawn { client_id, tile },
            UiEvent::UpgradeStructure { unit, unit_id } => Intent::UpgradeStructure {
                client_id,
                unit,
                unit_id,
            },
            UiEvent::Intent(intent) => {
                if intent.client_id() != &client_id {
                    warn!(%intent, "refusing to send an intent for another player");
                    return;
                }
                intent
            }
        };
        if let Err(e) = self.transport.send_intent(intent) {
            warn!(error = %e, "intent not sent");
        }
    }

    fn report_fatal(&self, message: &str, detail: Option<String>) {
        error!(%message, ?detail, "fatal game error");
        self.host.show_error(&ErrorReport {
            message: message.to_string(),
            detail,
            game_id: self.game_id.clone(),
            client_id: self.client_id.clone(),
            fatal: true,
        });
    }
}

/// Drives one game until it is stopped or fails.
pub struct ClientGameRunner {
    core: Option<RunnerCore>,
    events: Sender<RunnerEvent>,
    inbox: Option<Receiver<RunnerEvent>>,
    thread: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
    prevent_close: Arc<AtomicBool>,
}

impl ClientGameRunner {
    /// Spawn a simulation worker for `context.start_info` and build a runner
    /// around it and `transport`.
    pub fn create(
        context: RunnerContext,
        transport: Box<dyn Transport>,
    ) -> Result<Self, RunnerError> {
        let worker =
            WorkerClient::initialize(context.start_info.clone(), context.lobby.client_id.clone())?;
        Ok(Self::with_worker(context, transport, Box::new(worker)))
    }

    pub fn with_worker(
        context: RunnerContext,
        transport: Box<dyn Transport>,
        worker: Box<dyn SimWorker>,
    ) -> Self {
        let core = RunnerCore::new(context, transport, worker, Instant::now());
        let prevent_close = core.prevent_close.clone();
        let (events, inbox) = mpsc::channel();
        Self {
            core: Some(core),
            events,
            inbox: Some(inbox),
            thread: None,
            active: Arc::new(AtomicBool::new(false)),
            prevent_close,
        }
    }

    pub fn start(&mut self) -> Result<(), RunnerError> {
        let (mut core, inbox) = match (self.core.take(), self.inbox.take()) {
            (Some(core), Some(inbox)) => (core, inbox),
            _ => return Err(RunnerError::AlreadyStarted),
        };
        core.begin(self.events.clone())?;
        self.active.store(true, Ordering::SeqCst);
        let active = self.active.clone();
        let thread = thread::Builder::new()
            .name("frontier-runner".into())
            .spawn(move || run_loop(core, inbox, active))
            .map_err(RunnerError::Spawn)?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Stop the game and wait for the runner thread.
    pub fn stop(&mut self) {
        let _ = self.events.send(RunnerEvent::Stop);
        self.wait();
    }

    /// Block until the runner stops on its own.
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("runner thread panicked");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// True while the local player is still in the game.
    pub fn should_prevent_window_close(&self) -> bool {
        self.prevent_close.load(Ordering::SeqCst)
    }

    pub fn event_bus(&self) -> EventBus {
        EventBus {
            events: self.events.clone(),
        }
    }
}

impl Drop for ClientGameRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(mut core: RunnerCore, inbox: Receiver<RunnerEvent>, active: Arc<AtomicBool>) {
    let frame = core.timings.frame_interval;
    let mut next_frame = Instant::now() + frame;
    loop {
        let timeout = next_frame.saturating_duration_since(Instant::now());
        let flow = match inbox.recv_timeout(timeout) {
            Ok(event) => core.handle(event, Instant::now()),
            Err(RecvTimeoutError::Timeout) => Flow::Continue,
            Err(RecvTimeoutError::Disconnected) => Flow::Stop,
        };
        if flow == Flow::Stop {
            break;
        }
        let now = Instant::now();
        if now >= next_frame {
            next_frame = now + frame;
            if core.on_frame(now) == Flow::Stop {
                break;
            }
        }
    }
    core.finish();
    active.store(false, Ordering::SeqCst);
}
