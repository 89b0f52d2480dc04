// Integration smoke test for the relay server.
//
// Starts a relay on localhost and drives it with plain TCP sockets speaking
// the protocol crate's framing and messages: lobby join and game start,
// intent batching, hash comparison, ping, reconnect with a turn backlog, and
// the invalid-frame limit. No simulation is involved.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use frontier_protocol::{
    ClientId, ClientMessage, GameId, Intent, ServerMessage, Turn, decode_server_message,
    encode_client_message, read_frame, write_frame,
};
use frontier_relay::{RelayConfig, RelayHandle, start_relay};

struct TestClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self {
            reader,
            writer: BufWriter::new(stream),
        }
    }

    fn send(&mut self, msg: &ClientMessage) {
        let json = encode_client_message(msg).unwrap();
        write_frame(&mut self.writer, &json).unwrap();
    }

    fn recv(&mut self) -> Option<ServerMessage> {
        let bytes = read_frame(&mut self.reader).ok()??;
        Some(decode_server_message(&bytes).unwrap())
    }

    /// Read until a message matches, skipping everything else.
    fn wait_for(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let msg = self.recv().expect("connection closed while waiting");
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Read turns until one carries an intent.
    fn wait_for_busy_turn(&mut self) -> Turn {
        match self.wait_for(|m| matches!(m, ServerMessage::Turn { turn } if !turn.intents.is_empty()))
        {
            ServerMessage::Turn { turn } => turn,
            _ => unreachable!(),
        }
    }
}

const IDS: [&str; 3] = ["PLAYER01", "PLAYER02", "PLAYER03"];

fn cid(n: usize) -> ClientId {
    ClientId::new(IDS[n]).unwrap()
}

fn game_id() -> GameId {
    GameId::new("Smoke001").unwrap()
}

fn token(n: usize) -> String {
    format!("6f1c2a7e-3b4d-4e5f-8a9b-0c1d2e3f4a5{n}")
}

fn join_msg(n: usize) -> ClientMessage {
    ClientMessage::Join {
        client_id: cid(n),
        token: token(n),
        game_id: game_id(),
        username: format!("Player {n}"),
        cosmetics: None,
        turnstile_token: None,
    }
}

fn start(players: usize) -> (RelayHandle, SocketAddr) {
    let mut config = RelayConfig::new(game_id());
    config.port = 0;
    config.expected_players = players;
    config.max_players = players;
    config.turn_interval = Duration::from_millis(20);
    start_relay(config).unwrap()
}

/// Join `n` clients and wait until each has seen `start`.
fn started_game(addr: SocketAddr, n: usize) -> Vec<TestClient> {
    let mut clients: Vec<TestClient> = (0..n)
        .map(|i| {
            let mut c = TestClient::connect(addr);
            c.send(&join_msg(i));
            c
        })
        .collect();
    for c in &mut clients {
        assert!(matches!(c.recv(), Some(ServerMessage::Prestart { .. })));
        match c.recv() {
            Some(ServerMessage::Start {
                game_start_info, ..
            }) => assert_eq!(game_start_info.players.len(), n),
            other => panic!("expected start, got {other:?}"),
        }
    }
    clients
}

#[test]
fn intents_are_batched_into_turns_for_everyone() {
    let (handle, addr) = start(2);
    let mut clients = started_game(addr, 2);

    clients[0].send(&ClientMessage::Intent {
        intent: Intent::Spawn {
            client_id: cid(0),
            tile: 1234,
        },
    });

    let seen: Vec<Turn> = clients.iter_mut().map(|c| c.wait_for_busy_turn()).collect();
    assert_eq!(seen[0], seen[1]);
    assert_eq!(
        seen[0].intents,
        vec![Intent::Spawn {
            client_id: cid(0),
            tile: 1234,
        }]
    );

    handle.stop();
}

#[test]
fn disagreeing_pair_both_hear_about_it() {
    let (handle, addr) = start(2);
    let mut clients = started_game(addr, 2);
    clients[0].wait_for(|m| matches!(m, ServerMessage::Turn { turn } if turn.turn_number >= 3));

    for (i, c) in clients.iter_mut().enumerate() {
        c.send(&ClientMessage::Hash {
            hash: 100 + i as i64,
            turn_number: 2,
        });
    }
    for (i, c) in clients.iter_mut().enumerate() {
        let notice = c.wait_for(|m| matches!(m, ServerMessage::Desync { .. }));
        assert_eq!(
            notice,
            ServerMessage::Desync {
                turn: 2,
                correct_hash: None,
                clients_with_correct_hash: 0,
                total_active_clients: 2,
                your_hash: Some(100 + i as i64),
            }
        );
    }

    handle.stop();
}

#[test]
fn ping_is_answered() {
    let (handle, addr) = start(1);
    let mut clients = started_game(addr, 1);
    clients[0].send(&ClientMessage::Ping);
    clients[0].wait_for(|m| matches!(m, ServerMessage::Ping));
    handle.stop();
}

#[test]
fn reconnecting_client_gets_the_backlog() {
    let (handle, addr) = start(2);
    let mut clients = started_game(addr, 2);
    clients[0].wait_for(|m| matches!(m, ServerMessage::Turn { turn } if turn.turn_number >= 2));

    // Player 2 drops; the remaining player sees it announced.
    drop(clients.pop());
    let turn = clients[0].wait_for_busy_turn();
    assert!(turn.intents.contains(&Intent::MarkDisconnected {
        client_id: cid(1),
        is_disconnected: true,
    }));

    let mut back = TestClient::connect(addr);
    back.send(&ClientMessage::Rejoin {
        game_id: game_id(),
        client_id: cid(1),
        last_turn: 0,
        token: token(1),
    });
    match back.wait_for(|m| matches!(m, ServerMessage::Start { .. })) {
        ServerMessage::Start { turns, .. } => {
            let numbers: Vec<u64> = turns.iter().map(|t| t.turn_number).collect();
            let expected: Vec<u64> = (0..numbers.len() as u64).collect();
            assert_eq!(numbers, expected);
            assert!(numbers.len() > turn.turn_number as usize);
        }
        _ => unreachable!(),
    }
    let turn = back.wait_for_busy_turn();
    assert!(turn.intents.contains(&Intent::MarkDisconnected {
        client_id: cid(1),
        is_disconnected: false,
    }));

    handle.stop();
}

#[test]
fn late_newcomer_is_turned_away() {
    let (handle, addr) = start(1);
    let _clients = started_game(addr, 1);
    let mut late = TestClient::connect(addr);
    late.send(&join_msg(2));
    match late.recv() {
        Some(ServerMessage::Error { error, .. }) => assert_eq!(error, "full-lobby"),
        other => panic!("expected full-lobby, got {other:?}"),
    }
    handle.stop();
}

#[test]
fn garbage_frames_get_the_connection_closed() {
    let (handle, addr) = start(2);
    let mut client = TestClient::connect(addr);
    for _ in 0..10 {
        write_frame(&mut client.writer, b"{\"type\":\"teleport\"}").unwrap();
    }
    // The relay hangs up without ever sending anything.
    assert!(client.recv().is_none());
    handle.stop();
}
