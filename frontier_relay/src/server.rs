// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts connections
//   and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per connection): call `read_frame()` in a loop,
//   decode and validate each `ClientMessage`, and send
//   `InternalEvent::MessageFrom` to the main thread. Undecodable frames are
//   logged and skipped; after `MAX_INVALID_FRAMES` of them the connection is
//   closed. On EOF or a read error the thread sends
//   `InternalEvent::Disconnected`.
// - **Main thread**: owns the `GameSession` and dispatches events to it. It
//   waits with `recv_timeout` until the next turn deadline, so turns flush
//   on a fixed cadence whether or not messages are arriving.
//
// The main thread is the only writer to client streams (through the
// session). Reader threads only read.
//
// Shutdown: `RelayHandle::stop` clears the `keep_running` flag; the main
// loop exits, shuts down every client stream (which unblocks their readers)
// and joins.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use frontier_protocol::{ClientMessage, GameConfig, GameId, decode_client_message, read_frame};
use tracing::{debug, error, info, warn};

use crate::policy::{DesyncPolicy, MajorityVote};
use crate::session::{ConnId, GameSession, SessionConfig};

/// Undecodable frames tolerated from one connection before it is closed.
const MAX_INVALID_FRAMES: u32 = 10;

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
        peer: SocketAddr,
    },
    MessageFrom {
        conn: ConnId,
        message: ClientMessage,
    },
    Disconnected {
        conn: ConnId,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Block until the relay thread exits on its own.
    pub fn wait(mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("relay thread panicked");
            }
        }
    }

    fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.join().is_err() {
            error!("relay thread panicked");
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Configuration for one relay game.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Interface to bind, e.g. `127.0.0.1` or `0.0.0.0`.
    pub host: String,
    /// Port to bind; 0 lets the OS pick.
    pub port: u16,
    pub game_id: GameId,
    pub game_config: GameConfig,
    pub expected_players: usize,
    pub max_players: usize,
    pub turn_interval: Duration,
}

impl RelayConfig {
    /// A two-player game on localhost with 100 ms turns.
    pub fn new(game_id: GameId) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7878,
            game_id,
            game_config: GameConfig::default(),
            expected_players: 2,
            max_players: 2,
            turn_interval: Duration::from_millis(100),
        }
    }
}

/// Start the relay on a background thread with the default desync policy.
/// Returns a handle for stopping it and the bound address (useful when port
/// 0 is used).
pub fn start_relay(config: RelayConfig) -> std::io::Result<(RelayHandle, SocketAddr)> {
    start_relay_with_policy(config, Box::new(MajorityVote))
}

pub fn start_relay_with_policy(
    config: RelayConfig,
    policy: Box<dyn DesyncPolicy>,
) -> std::io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept thread can check `keep_running`.
    listener.set_nonblocking(true)?;
    let keep_running = Arc::new(AtomicBool::new(true));

    let session = GameSession::new(
        SessionConfig {
            game_id: config.game_id.clone(),
            game_config: config.game_config.clone(),
            expected_players: config.expected_players,
            max_players: config.max_players,
            lobby_created_at: unix_millis(),
        },
        policy,
    );
    let turn_interval = config.turn_interval;
    info!(%addr, game_id = %config.game_id, expected = config.expected_players, "relay listening");

    let keep_running_main = keep_running.clone();
    let thread = thread::Builder::new()
        .name("frontier-relay".into())
        .spawn(move || run_relay(listener, session, turn_interval, keep_running_main))?;

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is cleared.
fn run_relay(
    listener: TcpListener,
    session: GameSession,
    turn_interval: Duration,
    keep_running: Arc<AtomicBool>,
) {
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    let spawned = thread::Builder::new()
        .name("frontier-relay-accept".into())
        .spawn(move || accept_loop(listener, tx_listener, keep_running_listener));
    if let Err(e) = spawned {
        error!(error = %e, "could not start the accept thread");
        return;
    }

    let mut server = Server {
        session,
        streams: BTreeMap::new(),
        next_conn: 0,
        tx,
        keep_running: keep_running.clone(),
    };

    let mut next_turn = Instant::now() + turn_interval;
    while keep_running.load(Ordering::SeqCst) {
        let wait = next_turn.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(event) => {
                server.handle_event(event);
                while let Ok(event) = rx.try_recv() {
                    server.handle_event(event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let now = Instant::now();
        if now >= next_turn {
            server.session.flush_turn();
            next_turn += turn_interval;
            // Never try to catch up on a backlog of missed deadlines.
            if next_turn < now {
                next_turn = now + turn_interval;
            }
        }
    }

    info!(
        turns = server.session.turns().len(),
        winner = ?server.session.winner(),
        "relay stopping"
    );
    for stream in server.streams.values() {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

struct Server {
    session: GameSession,
    /// Read halves, kept so shutdown can unblock their reader threads.
    streams: BTreeMap<ConnId, TcpStream>,
    next_conn: ConnId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
}

impl Server {
    fn handle_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::NewConnection { stream, peer } => self.accept(stream, peer),
            InternalEvent::MessageFrom { conn, message } => {
                debug!(conn, kind = message.kind(), "message");
                self.session.handle(conn, message);
            }
            InternalEvent::Disconnected { conn } => {
                if let Some(stream) = self.streams.remove(&conn) {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                self.session.remove_connection(conn);
            }
        }
    }

    /// Register a connection with the session and give it a reader thread.
    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let conn = self.next_conn;
        self.next_conn += 1;

        let _ = stream.set_nodelay(true);
        let (write_half, reader_half) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(w), Ok(r)) => (w, r),
            (Err(e), _) | (_, Err(e)) => {
                warn!(%peer, error = %e, "could not split connection");
                return;
            }
        };

        let tx = self.tx.clone();
        let keep_running = self.keep_running.clone();
        let spawned = thread::Builder::new()
            .name(format!("frontier-relay-conn-{conn}"))
            .spawn(move || reader_loop(BufReader::new(reader_half), conn, tx, keep_running));
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "could not start reader thread");
            return;
        }

        info!(%peer, conn, "connection accepted");
        self.session
            .add_connection(conn, Box::new(BufWriter::new(write_half)));
        self.streams.insert(conn, stream);
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(%peer, error = %e, "could not configure connection");
                    continue;
                }
                if tx.send(InternalEvent::NewConnection { stream, peer }).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                break;
            }
        }
    }
}

/// Reader loop for a single connection. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    conn: ConnId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let mut invalid = 0u32;
    while keep_running.load(Ordering::SeqCst) {
        match read_frame(&mut reader) {
            Ok(Some(bytes)) => match decode_client_message(&bytes) {
                Ok(message) => {
                    if tx.send(InternalEvent::MessageFrom { conn, message }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    invalid += 1;
                    warn!(conn, invalid, error = %e, "dropping invalid frame");
                    if invalid >= MAX_INVALID_FRAMES {
                        warn!(conn, "too many invalid frames, closing connection");
                        break;
                    }
                }
            },
            Ok(None) => {
                debug!(conn, "connection closed by peer");
                break;
            }
            Err(e) => {
                debug!(conn, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { conn });
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
