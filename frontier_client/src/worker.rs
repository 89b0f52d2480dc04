// Simulation worker: the game state on its own thread.
//
// The worker is an actor. It exclusively owns the `GameState`; everything
// else talks to it through `WorkerClient`, which sends commands over an
// `mpsc` channel:
// - `Start(callback)`: begin reporting. Turns received earlier are queued
//   and applied as soon as the callback is installed.
// - `Turn(turn)`: apply exactly one turn, intents in array order.
// - `Heartbeat`: liveness ping from the runner's frame clock.
// - `Shutdown`: exit the loop.
//
// Each applied turn produces one `WorkerUpdate::View` with the simulation's
// `GameUpdates` and how long the tick took. A `SimError`, or a panic inside
// the simulation (caught with `catch_unwind`), produces one
// `WorkerUpdate::Error` and poisons the worker: later turns are dropped,
// since the state can no longer be trusted to match other clients. A panic
// hook chained in front of the process hook records the backtrace at the
// panic site on worker threads; the catch site only picks it up.
//
// `SimWorker` is the runner-facing trait, so runner tests can substitute a
// scripted worker.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frontier_protocol::{ClientId, GameStartInfo, Turn};
use frontier_sim::{GameState, GameUpdates, SimError};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("initializing game state: {0}")]
    Init(#[from] SimError),
    #[error("spawning worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("worker thread has stopped")]
    Stopped,
}

/// One applied tick, ready for the view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameUpdateViewData {
    pub tick: u64,
    pub updates: GameUpdates,
    pub tick_execution_duration: Duration,
}

/// The simulation failed; the game cannot continue on this client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorUpdate {
    pub err_msg: String,
    pub stack: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerUpdate {
    View(Box<GameUpdateViewData>),
    Error(ErrorUpdate),
}

pub type UpdateCallback = Box<dyn FnMut(WorkerUpdate) + Send>;

pub trait SimWorker: Send {
    fn start(&mut self, on_update: UpdateCallback) -> Result<(), WorkerError>;

    fn send_turn(&mut self, turn: Turn) -> Result<(), WorkerError>;

    fn send_heartbeat(&mut self) -> Result<(), WorkerError>;

    /// Stop the actor and wait for it. Idempotent.
    fn cleanup(&mut self);
}

enum Command {
    Start(UpdateCallback),
    Turn(Turn),
    Heartbeat,
    Shutdown,
}

/// Handle to a running worker thread.
pub struct WorkerClient {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerClient {
    /// Spawn the actor and build the initial state on it. Returns once the
    /// state exists, or with the reason it could not be built.
    pub fn initialize(start_info: GameStartInfo, client_id: ClientId) -> Result<Self, WorkerError> {
        let (commands, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("frontier-worker-{client_id}"))
            .spawn(move || {
                record_panics_on_this_thread();
                let state = match GameState::new(&start_info) {
                    Ok(state) => state,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                info!(
                    game_id = %start_info.game_id,
                    %client_id,
                    players = start_info.players.len(),
                    "simulation worker ready"
                );
                Actor::new(state).run(inbox);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(WorkerError::Init(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(WorkerError::Stopped)
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), WorkerError> {
        self.commands
            .send(command)
            .map_err(|_| WorkerError::Stopped)
    }
}

impl SimWorker for WorkerClient {
    fn start(&mut self, on_update: UpdateCallback) -> Result<(), WorkerError> {
        self.send(Command::Start(on_update))
    }

    fn send_turn(&mut self, turn: Turn) -> Result<(), WorkerError> {
        self.send(Command::Turn(turn))
    }

    fn send_heartbeat(&mut self) -> Result<(), WorkerError> {
        self.send(Command::Heartbeat)
    }

    fn cleanup(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Shutdown);
            if thread.join().is_err() {
                error!("worker thread panicked outside the simulation");
            }
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.cleanup();
    }
}

struct Actor {
    state: GameState,
    on_update: Option<UpdateCallback>,
    queued: VecDeque<Turn>,
    poisoned: bool,
    heartbeats: u64,
}

impl Actor {
    fn new(state: GameState) -> Self {
        Self {
            state,
            on_update: None,
            queued: VecDeque::new(),
            poisoned: false,
            heartbeats: 0,
        }
    }

    fn run(mut self, inbox: Receiver<Command>) {
        while let Ok(command) = inbox.recv() {
            match command {
                Command::Start(callback) => {
                    self.on_update = Some(callback);
                    while let Some(turn) = self.queued.pop_front() {
                        self.apply(turn);
                    }
                }
                Command::Turn(turn) => {
                    if self.on_update.is_some() {
                        self.apply(turn);
                    } else {
                        self.queued.push_back(turn);
                    }
                }
                Command::Heartbeat => {
                    self.heartbeats += 1;
                    trace!(heartbeats = self.heartbeats, tick = self.state.tick(), "heartbeat");
                }
                Command::Shutdown => break,
            }
        }
        debug!(tick = self.state.tick(), "simulation worker stopped");
    }

    fn apply(&mut self, turn: Turn) {
        if self.poisoned {
            warn!(turn = turn.turn_number, "worker is poisoned, dropping turn");
            return;
        }
        let started = Instant::now();
        let state = &mut self.state;
        take_panic_stack();
        let result = panic::catch_unwind(AssertUnwindSafe(|| state.execute_turn(&turn)));
        let update = match result {
            Ok(Ok(updates)) => WorkerUpdate::View(Box::new(GameUpdateViewData {
                tick: updates.tick,
                updates,
                tick_execution_duration: started.elapsed(),
            })),
            Ok(Err(e)) => {
                error!(turn = turn.turn_number, error = %e, "simulation rejected turn");
                self.poisoned = true;
                WorkerUpdate::Error(ErrorUpdate {
                    err_msg: e.to_string(),
                    stack: None,
                })
            }
            Err(payload) => {
                let err_msg = panic_message(payload.as_ref());
                error!(turn = turn.turn_number, %err_msg, "simulation panicked");
                self.poisoned = true;
                WorkerUpdate::Error(ErrorUpdate {
                    err_msg,
                    stack: take_panic_stack(),
                })
            }
        };
        if let Some(on_update) = self.on_update.as_mut() {
            on_update(update);
        }
    }
}

thread_local! {
    static RECORD_PANICS: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Keep the panic-site backtrace of any panic on the calling thread until
/// `take_panic_stack` collects it. The hook is installed once per process
/// and hands every panic on to the previously installed hook.
fn record_panics_on_this_thread() {
    RECORD_PANICS.with(|record| record.set(true));
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if RECORD_PANICS.with(Cell::get) {
                let stack = format!("{info}\n{}", Backtrace::force_capture());
                LAST_PANIC.with(|last| *last.borrow_mut() = Some(stack));
            }
            previous(info);
        }));
    });
}

fn take_panic_stack() -> Option<String> {
    LAST_PANIC.with(|last| last.borrow_mut().take())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "simulation panicked".to_string()
    }
}
