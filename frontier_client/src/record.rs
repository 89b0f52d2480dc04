// Game record persistence.
//
// When a game is decided the runner builds a `PartialGameRecord` and hands
// it to a `RecordSink`. The sink is an explicit collaborator passed in by
// the embedder, so tests can capture records in memory and the headless
// binary can write them to disk.
//
// `JsonFileRecordSink` writes one pretty-printed JSON file per game,
// `<dir>/<gameID>.json`, through a temporary file and a rename so readers
// never observe half a record. `load_record` reads an archived
// `GameRecord` back for replay.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use frontier_protocol::{
    AllPlayersStats, GameEndInfo, GameRecord, GameStartInfo, PartialGameRecord, PlayerRecord,
    SchemaError, Winner, decode_validated,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    Invalid(#[from] SchemaError),
}

pub trait RecordSink: Send + Sync {
    fn save(&self, record: &PartialGameRecord) -> Result<(), RecordError>;
}

/// Writes `<dir>/<gameID>.json`.
#[derive(Clone, Debug)]
pub struct JsonFileRecordSink {
    dir: PathBuf,
}

impl JsonFileRecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, record: &PartialGameRecord) -> PathBuf {
        self.dir.join(format!("{}.json", record.info.game_id))
    }
}

impl RecordSink for JsonFileRecordSink {
    fn save(&self, record: &PartialGameRecord) -> Result<(), RecordError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RecordError::Io { path, source }
        };
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.path_for(record);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        info!(
            path = %path.display(),
            turns = record.turns.len(),
            "game record saved"
        );
        Ok(())
    }
}

/// Keeps saved records in memory.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<PartialGameRecord>>,
}

impl MemoryRecordSink {
    pub fn records(&self) -> Vec<PartialGameRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl RecordSink for MemoryRecordSink {
    fn save(&self, record: &PartialGameRecord) -> Result<(), RecordError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

/// Milliseconds since the Unix epoch, the unit of every record timestamp.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Describe a finished game: the start info, each player's stats, and the
/// outcome. `start` and `end` are Unix milliseconds.
pub(crate) fn end_info(
    start_info: &GameStartInfo,
    all_players_stats: &AllPlayersStats,
    winner: Option<Winner>,
    start: u64,
    end: u64,
    num_turns: u64,
) -> GameEndInfo {
    let players = start_info
        .players
        .iter()
        .map(|p| {
            let stats = all_players_stats
                .get(&p.client_id)
                .cloned()
                .unwrap_or_default();
            PlayerRecord::from_player(p, stats)
        })
        .collect();
    GameEndInfo {
        game_id: start_info.game_id.clone(),
        lobby_created_at: start_info.lobby_created_at,
        config: start_info.config.clone(),
        players,
        start,
        end,
        duration: end.saturating_sub(start),
        num_turns,
        winner,
        lobby_fill_time: start.saturating_sub(start_info.lobby_created_at),
    }
}

/// Read and validate an archived game.
pub fn load_record(path: &Path) -> Result<GameRecord, RecordError> {
    let bytes = fs::read(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decode_validated(&bytes)?)
}

#[cfg(test)]
mod tests {
    use frontier_protocol::{ClientId, GameConfig, GameId, PlayerStats, Turn};

    use super::*;

    fn partial_record() -> PartialGameRecord {
        let alice = ClientId::new("AAAA1111").unwrap();
        let info = GameEndInfo {
            game_id: GameId::new("Record01").unwrap(),
            lobby_created_at: 1_000,
            config: GameConfig::default(),
            players: vec![PlayerRecord {
                client_id: alice.clone(),
                username: "Alice".into(),
                cosmetics: None,
                is_lobby_creator: Some(true),
                persistent_id: None,
                clan_tag: None,
                stats: PlayerStats::default(),
            }],
            start: 2_000,
            end: 5_000,
            duration: 3_000,
            num_turns: 2,
            winner: Some(Winner::Player {
                client_id: alice,
                others: vec![],
            }),
            lobby_fill_time: 1_000,
        };
        PartialGameRecord::new(info, vec![Turn::empty(0), Turn::empty(1)])
    }

    #[test]
    fn writes_one_file_per_game() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileRecordSink::new(dir.path().join("records"));
        let record = partial_record();
        sink.save(&record).unwrap();

        let path = dir.path().join("records").join("Record01.json");
        let written: PartialGameRecord =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, record);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn load_record_reads_completed_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        let record = partial_record().complete("DEV".into(), "www".into(), "example.com".into());
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        assert_eq!(load_record(&path).unwrap(), record);
    }

    #[test]
    fn load_record_rejects_gapped_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        let mut record = partial_record().complete("DEV".into(), "www".into(), "example.com".into());
        record.turns[1].turn_number = 5;
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        assert!(matches!(load_record(&path), Err(RecordError::Invalid(_))));
    }

    #[test]
    fn end_info_carries_every_player() {
        let alice = ClientId::new("AAAA1111").unwrap();
        let start_info = partial_record().info.start_info();
        let mut stats = AllPlayersStats::new();
        stats.insert(
            alice,
            PlayerStats {
                conquests: 4,
                ..PlayerStats::default()
            },
        );
        let info = end_info(&start_info, &stats, None, 1_500, 4_000, 12);
        assert_eq!(info.players.len(), 1);
        assert_eq!(info.players[0].stats.conquests, 4);
        assert_eq!(info.duration, 2_500);
        assert_eq!(info.lobby_fill_time, 500);
        assert_eq!(info.num_turns, 12);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_record(Path::new("/nonexistent/game.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/game.json"));
    }
}
