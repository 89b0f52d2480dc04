// Session state for the relay.
//
// `GameSession` is the central data structure that `server.rs` drives. It
// owns the lobby roster, the authoritative turn log, the intents waiting for
// the next flush and the per-turn hash reports. All mutation happens through
// methods called from the server's single-threaded main loop, so there is
// no internal locking.
//
// Key responsibilities:
// - Admission: `join` checks the game id, binds the client's token on first
//   contact and refuses newcomers once the lobby is full or the game has
//   started. The game starts (`prestart` then `start`) as soon as the
//   expected number of players has joined.
// - Reconnects: a client may come back on a new connection with `rejoin`
//   (or `join` again). The new connection replaces the old one, and once
//   the game is running the client receives `start` with the turn log from
//   its `lastTurn` onwards.
// - Turns: intents queue in arrival order and `flush_turn` packages them
//   into the next numbered turn. An intent must be authored by the client
//   whose connection sent it. Drops and returns are announced to everyone
//   through relay-authored `mark_disconnected` intents.
// - Desync detection: hashes are collected per turn; once every active
//   client has reported, the `DesyncPolicy` judges them and the clients it
//   names receive a `desync` notice.
//
// Writing to clients: each connection holds a boxed writer (the write half
// of its `TcpStream` in production). Write errors are logged and otherwise
// ignored; the connection's reader thread notices the broken pipe and
// reports the disconnect.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use frontier_protocol::message::{
    ERROR_FULL_LOBBY, ERROR_UNAUTHORIZED, ERROR_UNKNOWN_CLIENT, ERROR_WRONG_GAME,
};
use frontier_protocol::{
    AllPlayersStats, ClientId, ClientMessage, GameConfig, GameId, GameStartInfo, Intent,
    LogSeverity, Player, PlayerCosmetics, ServerMessage, Turn, Winner, encode_server_message,
    write_frame,
};
use tracing::{debug, error, info, warn};

use crate::policy::DesyncPolicy;

/// Identifies one TCP connection for its whole lifetime.
pub type ConnId = u64;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub game_id: GameId,
    pub game_config: GameConfig,
    /// The game starts once this many players have joined.
    pub expected_players: usize,
    pub max_players: usize,
    pub lobby_created_at: u64,
}

struct Seat {
    player: Player,
    token: String,
    conn: Option<ConnId>,
    disconnected: bool,
}

/// The judgement on a turn whose hashes are all in. Reports arriving later
/// (a client catching up after a rejoin) are checked against it directly.
#[derive(Clone, Copy, Debug)]
struct SettledTurn {
    correct_hash: Option<i64>,
    clients_with_correct_hash: u32,
    total_active_clients: u32,
}

struct Connection {
    writer: Box<dyn Write + Send>,
    client: Option<ClientId>,
}

/// One game on the relay, from lobby to the last turn.
pub struct GameSession {
    config: SessionConfig,
    policy: Box<dyn DesyncPolicy>,
    seats: Vec<Seat>,
    connections: BTreeMap<ConnId, Connection>,
    start_info: Option<GameStartInfo>,
    turns: Vec<Turn>,
    pending: Vec<Intent>,
    hashes: BTreeMap<u64, BTreeMap<ClientId, i64>>,
    settled: BTreeMap<u64, SettledTurn>,
    winner: Option<Winner>,
}

impl GameSession {
    pub fn new(config: SessionConfig, policy: Box<dyn DesyncPolicy>) -> Self {
        Self {
            config,
            policy,
            seats: Vec::new(),
            connections: BTreeMap::new(),
            start_info: None,
            turns: Vec::new(),
            pending: Vec::new(),
            hashes: BTreeMap::new(),
            settled: BTreeMap::new(),
            winner: None,
        }
    }

    /// Register a freshly accepted connection. It stays anonymous until it
    /// sends `join` or `rejoin`.
    pub fn add_connection(&mut self, conn: ConnId, writer: Box<dyn Write + Send>) {
        self.connections.insert(
            conn,
            Connection {
                writer,
                client: None,
            },
        );
    }

    /// Forget a connection. If it was the client's current one, the client
    /// is marked disconnected for everybody else.
    pub fn remove_connection(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        let Some(client_id) = connection.client else {
            return;
        };
        let started = self.is_started();
        let Some(seat) = self
            .seats
            .iter_mut()
            .find(|s| s.player.client_id == client_id)
        else {
            return;
        };
        if seat.conn != Some(conn) {
            return;
        }
        seat.conn = None;
        info!(client_id = %client_id, conn, "client disconnected");
        if started && !seat.disconnected {
            seat.disconnected = true;
            self.pending.push(Intent::MarkDisconnected {
                client_id,
                is_disconnected: true,
            });
        }
        // The client no longer counts towards pending hash comparisons.
        self.settle_hashes();
    }

    /// Dispatch one message from a connection.
    pub fn handle(&mut self, conn: ConnId, message: ClientMessage) {
        match message {
            ClientMessage::Join {
                client_id,
                token,
                game_id,
                username,
                cosmetics,
                turnstile_token: _,
            } => self.join(conn, client_id, token, game_id, username, cosmetics),
            ClientMessage::Rejoin {
                game_id,
                client_id,
                last_turn,
                token,
            } => self.rejoin(conn, game_id, client_id, last_turn, token),
            ClientMessage::Intent { intent } => self.enqueue_intent(conn, intent),
            ClientMessage::Hash { hash, turn_number } => self.record_hash(conn, turn_number, hash),
            ClientMessage::Winner {
                winner,
                all_players_stats,
            } => self.record_winner(conn, winner, &all_players_stats),
            ClientMessage::Log { severity, log } => self.client_log(conn, severity, &log),
            ClientMessage::Ping => self.send_to(conn, &ServerMessage::Ping),
        }
    }

    fn join(
        &mut self,
        conn: ConnId,
        client_id: ClientId,
        token: String,
        game_id: GameId,
        username: String,
        cosmetics: Option<PlayerCosmetics>,
    ) {
        if game_id != self.config.game_id {
            warn!(conn, %game_id, "join for another game");
            self.reject(conn, ERROR_WRONG_GAME, Some(format!("no game {game_id} here")));
            return;
        }

        if let Some(index) = self.seat_index(&client_id) {
            // A returning client: same seat, full backlog.
            if self.seats[index].token != token {
                warn!(conn, client_id = %client_id, "join with a foreign token");
                self.reject(conn, ERROR_UNAUTHORIZED, None);
                return;
            }
            self.bind(conn, index);
            self.send_start(conn, 0);
            return;
        }

        if self.is_started() || self.seats.len() >= self.config.max_players {
            info!(conn, client_id = %client_id, "lobby is full");
            self.reject(conn, ERROR_FULL_LOBBY, None);
            return;
        }

        info!(
            conn,
            client_id = %client_id,
            username = %username,
            seat = self.seats.len(),
            "client joined"
        );
        self.seats.push(Seat {
            player: Player {
                client_id,
                username,
                cosmetics,
                is_lobby_creator: None,
            },
            token,
            conn: None,
            disconnected: false,
        });
        self.bind(conn, self.seats.len() - 1);

        if self.seats.len() >= self.config.expected_players {
            self.start_game();
        }
    }

    fn rejoin(
        &mut self,
        conn: ConnId,
        game_id: GameId,
        client_id: ClientId,
        last_turn: u64,
        token: String,
    ) {
        if game_id != self.config.game_id {
            self.reject(conn, ERROR_WRONG_GAME, Some(format!("no game {game_id} here")));
            return;
        }
        let Some(index) = self.seat_index(&client_id) else {
            warn!(conn, client_id = %client_id, "rejoin from unknown client");
            self.reject(conn, ERROR_UNKNOWN_CLIENT, None);
            return;
        };
        if self.seats[index].token != token {
            warn!(conn, client_id = %client_id, "rejoin with a foreign token");
            self.reject(conn, ERROR_UNAUTHORIZED, None);
            return;
        }
        info!(conn, client_id = %client_id, last_turn, "client rejoined");
        self.bind(conn, index);
        self.send_start(conn, last_turn);
    }

    /// Point the seat at `conn`, retiring any previous connection.
    fn bind(&mut self, conn: ConnId, index: usize) {
        let started = self.is_started();
        let seat = &mut self.seats[index];
        let client_id = seat.player.client_id.clone();
        if let Some(old) = seat.conn.replace(conn).filter(|old| *old != conn) {
            debug!(client_id = %client_id, old, conn, "connection replaced");
            if let Some(previous) = self.connections.get_mut(&old) {
                previous.client = None;
            }
        }
        if started && seat.disconnected {
            seat.disconnected = false;
            self.pending.push(Intent::MarkDisconnected {
                client_id: client_id.clone(),
                is_disconnected: false,
            });
        }
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.client = Some(client_id);
        }
    }

    fn start_game(&mut self) {
        let mut players: Vec<Player> = self.seats.iter().map(|s| s.player.clone()).collect();
        if let Some(first) = players.first_mut() {
            first.is_lobby_creator = Some(true);
        }
        let info = GameStartInfo {
            game_id: self.config.game_id.clone(),
            lobby_created_at: self.config.lobby_created_at,
            config: self.config.game_config.clone(),
            players,
        };
        info!(
            game_id = %info.game_id,
            players = info.players.len(),
            "starting game"
        );
        self.start_info = Some(info);

        self.broadcast(&ServerMessage::Prestart {
            game_map: self.config.game_config.game_map,
            game_map_size: self.config.game_config.game_map_size,
        });
        for conn in self.bound_connections() {
            self.send_start(conn, 0);
        }
    }

    /// Send `start` with the turn log from `from`. Nothing before the game
    /// has started.
    fn send_start(&mut self, conn: ConnId, from: u64) {
        let Some(info) = &self.start_info else {
            return;
        };
        let from = usize::try_from(from)
            .unwrap_or(usize::MAX)
            .min(self.turns.len());
        let message = ServerMessage::Start {
            turns: self.turns[from..].to_vec(),
            game_start_info: info.clone(),
            lobby_created_at: self.config.lobby_created_at,
        };
        self.send_to(conn, &message);
    }

    fn enqueue_intent(&mut self, conn: ConnId, intent: Intent) {
        let Some(sender) = self.client_of(conn) else {
            warn!(conn, kind = intent.kind(), "intent from an anonymous connection");
            return;
        };
        if !self.is_started() {
            debug!(client_id = %sender, kind = intent.kind(), "intent before start dropped");
            return;
        }
        if intent.client_id() != &sender {
            warn!(
                client_id = %sender,
                author = %intent.client_id(),
                kind = intent.kind(),
                "intent on behalf of another client dropped"
            );
            return;
        }
        self.pending.push(intent);
    }

    /// Package the pending intents into the next turn and broadcast it.
    /// No-op while the lobby is still filling.
    pub fn flush_turn(&mut self) {
        if !self.is_started() {
            return;
        }
        let turn = Turn {
            turn_number: self.turns.len() as u64,
            intents: std::mem::take(&mut self.pending),
            hash: None,
        };
        if !turn.intents.is_empty() {
            debug!(turn = turn.turn_number, intents = turn.intents.len(), "flushing turn");
        }
        self.broadcast(&ServerMessage::Turn { turn: turn.clone() });
        self.turns.push(turn);
    }

    fn record_hash(&mut self, conn: ConnId, turn_number: u64, hash: i64) {
        let Some(client_id) = self.client_of(conn) else {
            return;
        };
        if turn_number >= self.turns.len() as u64 {
            warn!(client_id = %client_id, turn_number, "hash for a turn not yet sent");
            return;
        }
        if let Some(settled) = self.settled.get(&turn_number).copied() {
            if settled.correct_hash != Some(hash) {
                warn!(
                    client_id = %client_id,
                    turn = turn_number,
                    correct_hash = ?settled.correct_hash,
                    hash,
                    "late hash disagrees with settled turn"
                );
                self.send_to(
                    conn,
                    &ServerMessage::Desync {
                        turn: turn_number,
                        correct_hash: settled.correct_hash,
                        clients_with_correct_hash: settled.clients_with_correct_hash,
                        total_active_clients: settled.total_active_clients,
                        your_hash: Some(hash),
                    },
                );
            }
            return;
        }
        self.hashes
            .entry(turn_number)
            .or_default()
            .insert(client_id, hash);
        self.settle_hashes();
    }

    /// Judge every turn for which all active clients have reported.
    fn settle_hashes(&mut self) {
        let active: BTreeSet<ClientId> = self
            .seats
            .iter()
            .filter(|s| s.conn.is_some() && !s.disconnected)
            .map(|s| s.player.client_id.clone())
            .collect();

        let complete: Vec<u64> = self
            .hashes
            .iter()
            .filter(|(_, reports)| active.iter().all(|id| reports.contains_key(id)))
            .map(|(turn, _)| *turn)
            .collect();

        for turn in complete {
            let Some(mut reports) = self.hashes.remove(&turn) else {
                continue;
            };
            reports.retain(|id, _| active.contains(id));
            let verdict = self.policy.evaluate(&reports);
            let settled = match &verdict {
                Some(v) => SettledTurn {
                    correct_hash: v.correct_hash,
                    clients_with_correct_hash: v.clients_with_correct_hash,
                    total_active_clients: v.total_active_clients,
                },
                None => {
                    let Some(hash) = reports.values().next().copied() else {
                        continue;
                    };
                    let count = reports.len() as u32;
                    SettledTurn {
                        correct_hash: Some(hash),
                        clients_with_correct_hash: count,
                        total_active_clients: count,
                    }
                }
            };
            self.settled.insert(turn, settled);
            let Some(verdict) = verdict else {
                continue;
            };
            warn!(
                turn,
                correct_hash = ?verdict.correct_hash,
                agreeing = verdict.clients_with_correct_hash,
                total = verdict.total_active_clients,
                "desync"
            );
            for client_id in &verdict.notify {
                let Some(conn) = self.seat(client_id).and_then(|s| s.conn) else {
                    continue;
                };
                let message = ServerMessage::Desync {
                    turn,
                    correct_hash: verdict.correct_hash,
                    clients_with_correct_hash: verdict.clients_with_correct_hash,
                    total_active_clients: verdict.total_active_clients,
                    your_hash: reports.get(client_id).copied(),
                };
                self.send_to(conn, &message);
            }
        }
    }

    fn record_winner(&mut self, conn: ConnId, winner: Option<Winner>, stats: &AllPlayersStats) {
        let Some(client_id) = self.client_of(conn) else {
            return;
        };
        if self.winner.is_some() {
            return;
        }
        info!(
            client_id = %client_id,
            winner = ?winner,
            players_with_stats = stats.len(),
            turns = self.turns.len(),
            "winner reported"
        );
        self.winner = winner;
    }

    fn client_log(&self, conn: ConnId, severity: LogSeverity, log: &str) {
        let client_id = self
            .client_of(conn)
            .map(|id| id.to_string())
            .unwrap_or_default();
        match severity {
            LogSeverity::Debug => debug!(%client_id, %log, "client log"),
            LogSeverity::Info => info!(%client_id, %log, "client log"),
            LogSeverity::Warn => warn!(%client_id, %log, "client log"),
            LogSeverity::Error | LogSeverity::Fatal => {
                error!(%client_id, %log, ?severity, "client log")
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.start_info.is_some()
    }

    pub fn start_info(&self) -> Option<&GameStartInfo> {
        self.start_info.as_ref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    /// Clients with a live connection.
    pub fn connected_count(&self) -> usize {
        self.seats.iter().filter(|s| s.conn.is_some()).count()
    }

    /// The first winner any client reported.
    pub fn winner(&self) -> Option<&Winner> {
        self.winner.as_ref()
    }

    fn seat_index(&self, client_id: &ClientId) -> Option<usize> {
        self.seats
            .iter()
            .position(|s| &s.player.client_id == client_id)
    }

    fn seat(&self, client_id: &ClientId) -> Option<&Seat> {
        self.seats.iter().find(|s| &s.player.client_id == client_id)
    }

    fn client_of(&self, conn: ConnId) -> Option<ClientId> {
        self.connections.get(&conn)?.client.clone()
    }

    fn bound_connections(&self) -> Vec<ConnId> {
        self.seats.iter().filter_map(|s| s.conn).collect()
    }

    fn reject(&mut self, conn: ConnId, error: &str, message: Option<String>) {
        self.send_to(
            conn,
            &ServerMessage::Error {
                error: error.to_string(),
                message,
            },
        );
    }

    /// Write one message to one connection. Failures are logged; the reader
    /// thread reports the disconnect.
    fn send_to(&mut self, conn: ConnId, message: &ServerMessage) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        let bytes = match encode_server_message(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(conn, kind = message.kind(), error = %e, "refusing to send invalid message");
                return;
            }
        };
        if let Err(e) = write_frame(&mut connection.writer, &bytes) {
            warn!(conn, kind = message.kind(), error = %e, "write failed");
        }
    }

    /// Send to every client with a live connection.
    fn broadcast(&mut self, message: &ServerMessage) {
        for conn in self.bound_connections() {
            self.send_to(conn, message);
        }
    }
}
