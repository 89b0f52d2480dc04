// Replays of archived games through the full client stack: lobby, local
// transport, runner and a real simulation worker.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use frontier_client::{
    DesyncNotice, ErrorReport, HostSurface, LobbyConfig, LobbyOptions, TickMetrics, join_lobby,
    load_record, open_transport,
};
use frontier_protocol::{
    ClientId, GameConfig, GameId, GameRecord, GameStartInfo, Intent, PartialGameRecord, Player,
    PlayerRecord, PlayerStats, Turn,
};
use frontier_sim::{GameState, GameUpdates};

#[derive(Default)]
struct RecordingHost {
    hashes: Mutex<Vec<(u64, i64)>>,
    desyncs: Mutex<Vec<DesyncNotice>>,
    errors: Mutex<Vec<ErrorReport>>,
}

impl HostSurface for RecordingHost {
    fn show_error(&self, report: &ErrorReport) {
        self.errors.lock().unwrap().push(report.clone());
    }
    fn on_desync(&self, notice: &DesyncNotice) {
        self.desyncs.lock().unwrap().push(notice.clone());
    }
    fn on_update(&self, updates: &GameUpdates, _metrics: TickMetrics) {
        let mut hashes = self.hashes.lock().unwrap();
        hashes.extend(updates.hashes.iter().map(|h| (h.tick, h.hash)));
    }
}

fn cid(s: &str) -> ClientId {
    ClientId::new(s).unwrap()
}

fn start_info() -> GameStartInfo {
    GameStartInfo {
        game_id: GameId::new("Replay42").unwrap(),
        lobby_created_at: 0,
        config: GameConfig::default(),
        players: ["PLAYERAA", "PLAYERBB"]
            .iter()
            .enumerate()
            .map(|(i, id)| Player {
                client_id: cid(id),
                username: format!("player{i}"),
                cosmetics: None,
                is_lobby_creator: (i == 0).then_some(true),
            })
            .collect(),
    }
}

/// Play a short scripted game and archive it with the hashes it produced.
fn archived_game(turn_count: u64) -> GameRecord {
    let info = start_info();
    let mut state = GameState::new(&info).unwrap();
    let spawn_a = state.map().land_tile_from(state.map().tile_count() / 4).unwrap();
    let spawn_b = state
        .map()
        .land_tile_from(state.map().tile_count() * 3 / 4)
        .unwrap();

    let mut turns = Vec::new();
    for n in 0..turn_count {
        let intents = match n {
            1 => vec![Intent::Spawn {
                client_id: cid("PLAYERAA"),
                tile: spawn_a,
            }],
            2 => vec![
                Intent::Spawn {
                    client_id: cid("PLAYERBB"),
                    tile: spawn_b,
                },
                Intent::TogglePause {
                    client_id: cid("PLAYERAA"),
                    paused: true,
                },
            ],
            _ => vec![],
        };
        let mut turn = Turn {
            turn_number: n,
            intents,
            hash: None,
        };
        // Replays drop pause intents, so the archived hashes must come from
        // the filtered turn.
        let filtered = Turn {
            intents: turn
                .intents
                .iter()
                .filter(|i| !i.is_toggle_pause())
                .cloned()
                .collect(),
            ..turn.clone()
        };
        let updates = state.execute_turn(&filtered).unwrap();
        turn.hash = Some(updates.hashes[0].hash);
        turns.push(turn);
    }

    let end = frontier_protocol::GameEndInfo {
        game_id: info.game_id.clone(),
        lobby_created_at: info.lobby_created_at,
        config: info.config.clone(),
        players: info
            .players
            .iter()
            .map(|p| PlayerRecord::from_player(p, PlayerStats::default()))
            .collect(),
        start: 0,
        end: 1,
        duration: 1,
        num_turns: turn_count,
        winner: None,
        lobby_fill_time: 0,
    };
    PartialGameRecord::new(end, turns).complete("DEV".into(), "www".into(), "example.com".into())
}

fn replay_lobby(record: GameRecord) -> LobbyConfig {
    LobbyConfig {
        server_addr: String::new(),
        cosmetics: None,
        player_name: "Viewer".into(),
        client_id: cid("PLAYERAA"),
        game_id: record.info.game_id.clone(),
        token: "0b9f3c1e-7a43-4d55-9a4e-3f2b8f7c6d10".into(),
        turnstile_token: None,
        game_start_info: None,
        game_record: Some(record),
    }
}

fn replay(record: GameRecord, until: impl Fn(&RecordingHost) -> bool) -> Arc<RecordingHost> {
    let lobby = replay_lobby(record);
    let host = Arc::new(RecordingHost::default());
    let options = LobbyOptions::default();
    let transport = open_transport(&lobby, &options);
    let mut handle = join_lobby(lobby, transport, host.clone(), options).unwrap();
    let deadline = Instant::now() + Duration::from_secs(20);
    while !until(&host) {
        assert!(Instant::now() < deadline, "replay did not finish in time");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(handle.leave(true));
    host
}

#[test]
fn faithful_replay_matches_every_archived_hash() {
    let record = archived_game(30);
    let expected: Vec<(u64, i64)> = record
        .turns
        .iter()
        .map(|t| (t.turn_number, t.hash.unwrap()))
        .collect();
    let host = replay(record, |h| h.hashes.lock().unwrap().len() >= 30);
    assert_eq!(*host.hashes.lock().unwrap(), expected);
    assert!(host.desyncs.lock().unwrap().is_empty());
    assert!(host.errors.lock().unwrap().is_empty());
}

#[test]
fn tampered_hash_is_reported_as_desync() {
    let mut record = archived_game(12);
    record.turns[7].hash = Some(record.turns[7].hash.unwrap() ^ 1);
    let host = replay(record, |h| !h.desyncs.lock().unwrap().is_empty());
    let desyncs = host.desyncs.lock().unwrap();
    assert_eq!(desyncs[0].turn, 7);
    assert_eq!(desyncs[0].correct_hash.map(|h| h ^ 1), desyncs[0].your_hash);
}

#[test]
fn records_survive_a_disk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.json");
    let record = archived_game(5);
    std::fs::write(&path, serde_json::to_vec_pretty(&record).unwrap()).unwrap();
    assert_eq!(load_record(&path).unwrap(), record);
}
