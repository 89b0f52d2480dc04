// frontier_client: the lockstep game client.
//
// A client keeps its own copy of the simulation in step with every other
// client by applying exactly the turns the relay sequences, in order, and
// reporting a state hash after each one. This crate holds everything
// between the wire and the simulation; it draws nothing itself and reports
// to the embedder through `HostSurface`.
//
// Module overview:
// - `config.rs`:    `LobbyConfig` (one session's identity and mode) and
//                   `RunnerTimings` (frame clock and watchdog constants,
//                   overridable from `FRONTIER_*` environment variables).
// - `transport.rs`: The `Transport` trait and `NetTransport`, a TCP
//                   connection to the relay with a reader thread.
// - `local.rs`:     `LocalTransport`, an in-process stand-in for the relay
//                   used by singleplayer games and replays.
// - `worker.rs`:    The simulation worker, an actor thread that owns the
//                   `GameState` and reports one update per applied turn.
// - `runner.rs`:    `TurnSequencer` (ordering, gap-fill, dedup), `Watchdog`
//                   and `ClientGameRunner`, which wires transport, worker
//                   and host together on a single event-loop thread.
// - `lobby.rs`:     The pre-game phase: join, wait for `start`, then hand
//                   the transport to a new runner.
// - `host.rs`:      `HostSurface` and the reports passed to it.
// - `record.rs`:    `RecordSink` implementations and archived-record
//                   loading for replay.
//
// Threads: one runner thread per game, one worker thread, and one reader
// (network) or timer (local) thread per transport. They communicate only
// through `mpsc` channels and callbacks that forward into them; no game
// state is shared.

pub mod config;
pub mod host;
pub mod local;
pub mod lobby;
pub mod record;
pub mod runner;
pub mod transport;
pub mod worker;

pub use config::{ConfigError, LobbyConfig, RunnerTimings};
pub use host::{DesyncNotice, ErrorReport, HostSurface, TickMetrics};
pub use local::{DEFAULT_TURN_INTERVAL, LocalTransport};
pub use lobby::{LobbyError, LobbyHandle, LobbyOptions, join_lobby, open_transport};
pub use record::{JsonFileRecordSink, MemoryRecordSink, RecordError, RecordSink, load_record};
pub use runner::{
    ClientGameRunner, EventBus, OrderViolation, RunnerContext, RunnerError, RunnerEvent,
    TurnSequencer, UiEvent, Watchdog,
};
pub use transport::{
    Credentials, NetTransport, Transport, TransportCallback, TransportError, TransportEvent,
};
pub use worker::{
    ErrorUpdate, GameUpdateViewData, SimWorker, UpdateCallback, WorkerClient, WorkerError,
    WorkerUpdate,
};
