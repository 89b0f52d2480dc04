// Test-only game clients for multiplayer integration tests.
//
// `TestGameClient` is a real client: the lobby, `NetTransport`, runner and
// simulation worker from `frontier_client`, reporting into a
// `RecordingSurface` instead of a UI. `ScriptedPeer` is a bare socket that
// joins like a client but sends only what a test tells it to, which is how
// the tests fake a client with a diverging simulation.
//
// The only test-specific code here is the blocking wait helpers. Everything
// between the relay and the simulation runs on the same code paths as a
// real game.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use frontier_client::{
    DesyncNotice, ErrorReport, HostSurface, LobbyConfig, LobbyHandle, LobbyOptions, TickMetrics,
    UiEvent, join_lobby, open_transport,
};
use frontier_protocol::{
    ClientId, ClientMessage, GameId, GameStartInfo, ServerMessage, decode_server_message,
    encode_client_message, read_frame, write_frame,
};
use frontier_sim::{GameUpdates, TerrainMap};

/// Default timeout for blocking waits.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Sleep between polls of a `RecordingSurface`.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the client stack reports to its host.
#[derive(Default)]
pub struct RecordingSurface {
    pub start_info: Mutex<Option<GameStartInfo>>,
    /// State hash per tick, as computed by this client's worker.
    pub hashes: Mutex<BTreeMap<u64, i64>>,
    pub desyncs: Mutex<Vec<DesyncNotice>>,
    pub errors: Mutex<Vec<ErrorReport>>,
}

impl HostSurface for RecordingSurface {
    fn on_join(&self, start_info: &GameStartInfo) {
        *self.start_info.lock().unwrap() = Some(start_info.clone());
    }

    fn show_error(&self, report: &ErrorReport) {
        self.errors.lock().unwrap().push(report.clone());
    }

    fn on_desync(&self, notice: &DesyncNotice) {
        self.desyncs.lock().unwrap().push(notice.clone());
    }

    fn on_update(&self, updates: &GameUpdates, _metrics: TickMetrics) {
        let mut hashes = self.hashes.lock().unwrap();
        for h in &updates.hashes {
            hashes.insert(h.tick, h.hash);
        }
    }
}

/// A full client stack connected to a relay.
pub struct TestGameClient {
    pub client_id: ClientId,
    pub token: String,
    pub surface: Arc<RecordingSurface>,
    handle: LobbyHandle,
}

impl TestGameClient {
    /// Join `game_id` on the relay at `addr` with a fresh token.
    pub fn join(addr: SocketAddr, game_id: &GameId, client_id: &str) -> Self {
        Self::join_with_token(addr, game_id, client_id, uuid::Uuid::new_v4().to_string())
    }

    /// Join with a given token; the relay binds a client id to the first
    /// token it sees, so reusing it is how a client comes back.
    pub fn join_with_token(
        addr: SocketAddr,
        game_id: &GameId,
        client_id: &str,
        token: String,
    ) -> Self {
        let client_id = ClientId::new(client_id).unwrap();
        let lobby = LobbyConfig {
            server_addr: addr.to_string(),
            cosmetics: None,
            player_name: format!("Tester {client_id}"),
            client_id: client_id.clone(),
            game_id: game_id.clone(),
            token: token.clone(),
            turnstile_token: None,
            game_start_info: None,
            game_record: None,
        };
        let surface = Arc::new(RecordingSurface::default());
        let options = LobbyOptions::default();
        let transport = open_transport(&lobby, &options);
        let handle = join_lobby(lobby, transport, surface.clone(), options).unwrap();
        Self {
            client_id,
            token,
            surface,
            handle,
        }
    }

    /// Block until `pred` holds for the surface, panicking after
    /// `WAIT_TIMEOUT`.
    pub fn wait_until(&self, what: &str, pred: impl Fn(&RecordingSurface) -> bool) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while !pred(&self.surface) {
            assert!(
                Instant::now() < deadline,
                "{}: timed out waiting for {what}",
                self.client_id
            );
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Block until ticks `0..n` have all been applied.
    pub fn wait_for_ticks(&self, n: u64) {
        self.wait_until(&format!("{n} ticks"), |s| {
            let hashes = s.hashes.lock().unwrap();
            (0..n).all(|t| hashes.contains_key(&t))
        });
    }

    pub fn hashes(&self) -> BTreeMap<u64, i64> {
        self.surface.hashes.lock().unwrap().clone()
    }

    pub fn desyncs(&self) -> Vec<DesyncNotice> {
        self.surface.desyncs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.surface.errors.lock().unwrap().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Hand a UI action to the running game, waiting for it to start.
    pub fn send(&self, event: UiEvent) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            if let Some(bus) = self.handle.event_bus() {
                assert!(bus.emit(event), "runner refused a UI event");
                return;
            }
            assert!(Instant::now() < deadline, "game never started");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Spawn on a land tile chosen by this client's seat in the start info.
    pub fn spawn(&self) {
        self.wait_until("start info", |s| s.start_info.lock().unwrap().is_some());
        let info = self.surface.start_info.lock().unwrap().clone().unwrap();
        let seat = info
            .players
            .iter()
            .position(|p| p.client_id == self.client_id)
            .unwrap() as u32;
        let map = TerrainMap::generate(info.config.game_map, info.config.game_map_size);
        let stride = map.tile_count() / info.players.len() as u32;
        let tile = map.land_tile_from(stride * seat + stride / 2).unwrap();
        self.send(UiEvent::Spawn { tile });
    }

    /// Leave the game and close the connection.
    pub fn leave(mut self) {
        self.handle.leave(true);
    }
}

/// A raw protocol peer with full control over what it reports.
pub struct ScriptedPeer {
    pub client_id: ClientId,
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
}

impl ScriptedPeer {
    /// Connect and send `join`. A background thread collects everything
    /// the relay sends.
    pub fn join(addr: SocketAddr, game_id: &GameId, client_id: &str) -> Self {
        let client_id = ClientId::new(client_id).unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let (tx, inbox) = mpsc::channel();
        thread::spawn(move || {
            while let Ok(Some(bytes)) = read_frame(&mut reader) {
                let Ok(msg) = decode_server_message(&bytes) else {
                    continue;
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });

        let mut peer = Self {
            client_id: client_id.clone(),
            writer: BufWriter::new(stream),
            inbox,
        };
        peer.send(&ClientMessage::Join {
            client_id,
            token: uuid::Uuid::new_v4().to_string(),
            game_id: game_id.clone(),
            username: "Scripted".into(),
            cosmetics: None,
            turnstile_token: None,
        });
        peer
    }

    pub fn send(&mut self, msg: &ClientMessage) {
        let json = encode_client_message(msg).unwrap();
        write_frame(&mut self.writer, &json).unwrap();
    }

    /// Receive until a message matches, discarding the rest.
    pub fn wait_for(&self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let msg = self
                .inbox
                .recv_timeout(left)
                .unwrap_or_else(|e| panic!("{}: no matching message: {e}", self.client_id));
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Block until the relay has broadcast turn `n`.
    pub fn wait_for_turn(&self, n: u64) {
        self.wait_for(|m| matches!(m, ServerMessage::Turn { turn } if turn.turn_number >= n));
    }
}
