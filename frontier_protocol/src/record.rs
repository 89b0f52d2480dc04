// Archived game records.
//
// When a game ends the client that saw the win writes a `PartialGameRecord`:
// the start info extended with end-of-game data (`GameEndInfo`), plus every
// turn it applied. The archive service later completes it into a
// `GameRecord` by stamping the build (`gitCommit`) and origin
// (`subdomain`/`domain`). Loading a `GameRecord` back into a client replays
// the game turn by turn; each turn may carry the hash the original run
// produced so the replay can detect its own divergence.

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::message::{GameStartInfo, Player, PlayerCosmetics, PlayerStats, Turn, Winner};
use crate::types::{ClientId, GameId};
use crate::validate::{SchemaError, Validate, check_safe_string, check_username};

/// The only record layout this crate reads and writes.
pub const GAME_RECORD_VERSION: &str = "v0.0.2";
/// `gitCommit` placeholder for builds without a commit hash.
pub const DEV_GIT_COMMIT: &str = "DEV";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlayerRecord {
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosmetics: Option<PlayerCosmetics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_lobby_creator: Option<bool>,
    /// Account UUID; null for anonymous players.
    #[serde(rename = "persistentID")]
    pub persistent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clan_tag: Option<String>,
    pub stats: PlayerStats,
}

impl PlayerRecord {
    /// Record a lobby player with the stats the game produced. The clan tag
    /// is taken from a leading `[TAG]` in the username.
    pub fn from_player(player: &Player, stats: PlayerStats) -> Self {
        Self {
            client_id: player.client_id.clone(),
            username: player.username.clone(),
            cosmetics: player.cosmetics.clone(),
            is_lobby_creator: player.is_lobby_creator,
            persistent_id: None,
            clan_tag: clan_tag(&player.username),
            stats,
        }
    }

    pub fn to_player(&self) -> Player {
        Player {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            cosmetics: self.cosmetics.clone(),
            is_lobby_creator: self.is_lobby_creator,
        }
    }
}

fn clan_tag(username: &str) -> Option<String> {
    let rest = username.strip_prefix('[')?;
    let (tag, _) = rest.split_once(']')?;
    let ok = (2..=5).contains(&tag.len()) && tag.bytes().all(|b| b.is_ascii_alphanumeric());
    ok.then(|| tag.to_ascii_uppercase())
}

impl Validate for PlayerRecord {
    fn validate(&self) -> Result<(), SchemaError> {
        check_username("player.username", &self.username)?;
        self.cosmetics.validate()?;
        match &self.persistent_id {
            Some(id) if uuid::Uuid::parse_str(id).is_err() => {
                Err(SchemaError::invalid("player.persistentID", "not a UUID"))
            }
            _ => Ok(()),
        }
    }
}

/// `GameStartInfo` plus how the game ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameEndInfo {
    #[serde(rename = "gameID")]
    pub game_id: GameId,
    pub lobby_created_at: u64,
    pub config: GameConfig,
    pub players: Vec<PlayerRecord>,
    /// Unix milliseconds.
    pub start: u64,
    pub end: u64,
    pub duration: u64,
    #[serde(rename = "num_turns")]
    pub num_turns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    pub lobby_fill_time: u64,
}

impl GameEndInfo {
    /// Rebuild the start info this game was launched with.
    pub fn start_info(&self) -> GameStartInfo {
        GameStartInfo {
            game_id: self.game_id.clone(),
            lobby_created_at: self.lobby_created_at,
            config: self.config.clone(),
            players: self.players.iter().map(PlayerRecord::to_player).collect(),
        }
    }
}

impl Validate for GameEndInfo {
    fn validate(&self) -> Result<(), SchemaError> {
        self.config.validate()?;
        self.players.validate()?;
        self.winner.validate()
    }
}

fn check_turn_sequence(turns: &[Turn]) -> Result<(), SchemaError> {
    for (expected, turn) in turns.iter().enumerate() {
        if turn.turn_number != expected as u64 {
            return Err(SchemaError::invalid(
                "record.turns",
                format!(
                    "turn at index {expected} is numbered {}",
                    turn.turn_number
                ),
            ));
        }
    }
    turns.validate()
}

fn check_version(version: &str) -> Result<(), SchemaError> {
    if version == GAME_RECORD_VERSION {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            "record.version",
            format!("{version:?} is not {GAME_RECORD_VERSION}"),
        ))
    }
}

/// A record as written by the client at game end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialGameRecord {
    pub info: GameEndInfo,
    pub version: String,
    pub turns: Vec<Turn>,
}

impl PartialGameRecord {
    pub fn new(info: GameEndInfo, turns: Vec<Turn>) -> Self {
        Self {
            info,
            version: GAME_RECORD_VERSION.to_string(),
            turns,
        }
    }

    /// Stamp build and origin metadata, producing the archived form.
    pub fn complete(self, git_commit: String, subdomain: String, domain: String) -> GameRecord {
        GameRecord {
            info: self.info,
            version: self.version,
            turns: self.turns,
            git_commit,
            subdomain,
            domain,
        }
    }
}

impl Validate for PartialGameRecord {
    fn validate(&self) -> Result<(), SchemaError> {
        check_version(&self.version)?;
        self.info.validate()?;
        check_turn_sequence(&self.turns)
    }
}

/// A complete archived game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameRecord {
    pub info: GameEndInfo,
    pub version: String,
    pub turns: Vec<Turn>,
    /// 40 hex characters, or `DEV`.
    pub git_commit: String,
    pub subdomain: String,
    pub domain: String,
}

impl Validate for GameRecord {
    fn validate(&self) -> Result<(), SchemaError> {
        check_version(&self.version)?;
        let commit_ok = self.git_commit == DEV_GIT_COMMIT
            || (self.git_commit.len() == 40
                && self.git_commit.bytes().all(|b| b.is_ascii_hexdigit()));
        if !commit_ok {
            return Err(SchemaError::invalid(
                "record.gitCommit",
                "must be 40 hex characters or DEV",
            ));
        }
        check_safe_string("record.subdomain", &self.subdomain, 253)?;
        check_safe_string("record.domain", &self.domain, 253)?;
        self.info.validate()?;
        check_turn_sequence(&self.turns)
    }
}
