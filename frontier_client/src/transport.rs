// Transport: one logical connection to the relay per game session.
//
// The `Transport` trait is the seam between the runner and the outside
// world. Two implementations exist:
// - `NetTransport` (this file): TCP to a relay, length-delimited JSON.
// - `LocalTransport` (`local.rs`): an in-process server for singleplayer
//   games and archived-game replay.
//
// Inbound traffic is delivered through a `TransportCallback`, invoked with
// `Connected` once the connection is live, `Message` for every inbound
// message that passed schema validation, and `Disconnected` when the
// connection drops. Invalid frames are logged and dropped here and never
// reach the runner. The callback can be swapped with `update_callback`
// without reconnecting; the lobby uses this to hand the connection to the
// game runner.
//
// `NetTransport` architecture (adapted from the relay's original TCP
// client): the caller's thread owns the `BufWriter` and sends
// synchronously; a reader thread per connection blocks on `read_frame`,
// decodes, and invokes the callback. Each connection gets a generation
// number, and a reader only reports while its generation is current, so a
// torn-down reader can never leak events into its replacement.
//
// Transports never touch game state.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use frontier_protocol::{
    AllPlayersStats, ClientId, ClientMessage, GameId, Intent, LogSeverity, PlayerCosmetics,
    SchemaError, ServerMessage, Winner, decode_server_message, encode_client_message, read_frame,
    write_frame,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LobbyConfig;

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message(ServerMessage),
    Disconnected,
}

pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connection I/O: {0}")]
    Io(#[from] io::Error),
    #[error("refusing to send invalid message: {0}")]
    Schema(#[from] SchemaError),
    #[error("transport closed")]
    Closed,
}

pub trait Transport: Send {
    /// Establish the connection. `callback` receives `Connected` once live.
    fn connect(&mut self, callback: TransportCallback) -> Result<(), TransportError>;

    /// Replace the event handler without reconnecting.
    fn update_callback(&mut self, callback: TransportCallback);

    /// First-time entry into the lobby.
    fn join_game(&mut self) -> Result<(), TransportError>;

    /// Ask for every turn from `last_turn` onwards.
    fn rejoin_game(&mut self, last_turn: u64) -> Result<(), TransportError>;

    fn leave_game(&mut self);

    /// Tear down and re-establish; `Connected` is delivered again on
    /// success.
    fn reconnect(&mut self) -> Result<(), TransportError>;

    /// The most recent turn was applied locally.
    fn turn_complete(&mut self);

    fn send_intent(&mut self, intent: Intent) -> Result<(), TransportError>;

    fn send_hash(&mut self, turn_number: u64, hash: i64) -> Result<(), TransportError>;

    fn send_winner(
        &mut self,
        winner: Option<Winner>,
        all_players_stats: AllPlayersStats,
    ) -> Result<(), TransportError>;

    fn send_log(&mut self, severity: LogSeverity, log: String) -> Result<(), TransportError>;

    /// Purely local sessions have no relay to lose contact with.
    fn is_local(&self) -> bool;
}

/// Who we are to the relay.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_id: ClientId,
    pub game_id: GameId,
    pub token: String,
    pub username: String,
    pub cosmetics: Option<PlayerCosmetics>,
    pub turnstile_token: Option<String>,
}

impl Credentials {
    pub fn from_lobby(lobby: &LobbyConfig) -> Self {
        Self {
            client_id: lobby.client_id.clone(),
            game_id: lobby.game_id.clone(),
            token: lobby.token.clone(),
            username: lobby.player_name.clone(),
            cosmetics: lobby.cosmetics.clone(),
            turnstile_token: lobby.turnstile_token.clone(),
        }
    }
}

/// Shared, swappable handler slot.
#[derive(Clone, Default)]
pub(crate) struct CallbackSlot(Arc<Mutex<Option<TransportCallback>>>);

impl CallbackSlot {
    pub(crate) fn set(&self, callback: TransportCallback) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(callback);
        }
    }

    /// Invoke the current handler. The lock is released before the call so
    /// handlers may swap the slot.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let callback = self.0.lock().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

struct Connection {
    writer: BufWriter<TcpStream>,
    reader_thread: Option<JoinHandle<()>>,
}

/// TCP transport to a relay.
pub struct NetTransport {
    addr: String,
    credentials: Credentials,
    callback: CallbackSlot,
    generation: Arc<AtomicU64>,
    connection: Option<Connection>,
}

impl NetTransport {
    pub fn new(addr: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            addr: addr.into(),
            credentials,
            callback: CallbackSlot::default(),
            generation: Arc::new(AtomicU64::new(0)),
            connection: None,
        }
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.addr).map_err(|source| TransportError::Connect {
            addr: self.addr.clone(),
            source,
        })?;
        stream.set_nodelay(true).ok();
        let reader = BufReader::new(stream.try_clone()?);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let current = self.generation.clone();
        let callback = self.callback.clone();
        let reader_thread = thread::Builder::new()
            .name(format!("frontier-net-reader-{generation}"))
            .spawn(move || reader_loop(reader, generation, current, callback))?;

        self.connection = Some(Connection {
            writer: BufWriter::new(stream),
            reader_thread: Some(reader_thread),
        });
        info!(addr = %self.addr, generation, "connected to relay");
        self.callback.emit(TransportEvent::Connected);
        Ok(())
    }

    fn close(&mut self) {
        // Retire the reader before it notices the shutdown.
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.writer.get_ref().shutdown(Shutdown::Both);
            if let Some(handle) = connection.reader_thread.take() {
                let _ = handle.join();
            }
        }
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let bytes = encode_client_message(message)?;
        let connection = self
            .connection
            .as_mut()
            .ok_or(TransportError::NotConnected)?;
        write_frame(&mut connection.writer, &bytes)?;
        debug!(kind = message.kind(), bytes = bytes.len(), "sent");
        Ok(())
    }
}

impl Drop for NetTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for NetTransport {
    fn connect(&mut self, callback: TransportCallback) -> Result<(), TransportError> {
        self.callback.set(callback);
        self.open()
    }

    fn update_callback(&mut self, callback: TransportCallback) {
        self.callback.set(callback);
    }

    fn join_game(&mut self) -> Result<(), TransportError> {
        let c = &self.credentials;
        let message = ClientMessage::Join {
            client_id: c.client_id.clone(),
            token: c.token.clone(),
            game_id: c.game_id.clone(),
            username: c.username.clone(),
            cosmetics: c.cosmetics.clone(),
            turnstile_token: c.turnstile_token.clone(),
        };
        self.send(&message)
    }

    fn rejoin_game(&mut self, last_turn: u64) -> Result<(), TransportError> {
        let message = ClientMessage::Rejoin {
            game_id: self.credentials.game_id.clone(),
            client_id: self.credentials.client_id.clone(),
            last_turn,
            token: self.credentials.token.clone(),
        };
        self.send(&message)
    }

    fn leave_game(&mut self) {
        info!(game_id = %self.credentials.game_id, "leaving game");
        self.close();
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.close();
        self.open()
    }

    fn turn_complete(&mut self) {}

    fn send_intent(&mut self, intent: Intent) -> Result<(), TransportError> {
        self.send(&ClientMessage::Intent { intent })
    }

    fn send_hash(&mut self, turn_number: u64, hash: i64) -> Result<(), TransportError> {
        self.send(&ClientMessage::Hash { hash, turn_number })
    }

    fn send_winner(
        &mut self,
        winner: Option<Winner>,
        all_players_stats: AllPlayersStats,
    ) -> Result<(), TransportError> {
        self.send(&ClientMessage::Winner {
            winner,
            all_players_stats,
        })
    }

    fn send_log(&mut self, severity: LogSeverity, log: String) -> Result<(), TransportError> {
        self.send(&ClientMessage::Log { severity, log })
    }

    fn is_local(&self) -> bool {
        false
    }
}

/// Reader thread: decode frames and hand them to the current callback while
/// this connection is still the current generation.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    generation: u64,
    current: Arc<AtomicU64>,
    callback: CallbackSlot,
) {
    let is_current = || current.load(Ordering::SeqCst) == generation;
    loop {
        match read_frame(&mut reader) {
            Ok(Some(bytes)) => match decode_server_message(&bytes) {
                Ok(message) => {
                    if !is_current() {
                        break;
                    }
                    callback.emit(TransportEvent::Message(message));
                }
                Err(e) => warn!(generation, error = %e, "dropping invalid server message"),
            },
            Ok(None) => break,
            Err(e) => {
                if is_current() {
                    warn!(generation, error = %e, "relay connection failed");
                }
                break;
            }
        }
    }
    if is_current() {
        callback.emit(TransportEvent::Disconnected);
    }
}
