// Protocol messages exchanged between clients and the relay.
//
// Two enums define the whole vocabulary:
// - `ClientMessage`: sent by game clients to the relay.
// - `ServerMessage`: sent by the relay to game clients.
//
// Both are internally tagged on `type` with lowercase names (`join`,
// `turn`, `desync`, ...). Supporting structs (`Turn`, `GameStartInfo`,
// `Player`, `Winner`, `PlayerStats`) are shared by both directions and by
// the game records in `record.rs`.
//
// Turns are the unit of lockstep: the relay is the only party that assigns
// turn numbers, and every client must apply turn N before turn N+1. A
// turn's optional `hash` is only set in archived records, where it lets a
// replay check itself against the original run.

use std::collections::BTreeMap;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{GameConfig, GameMapSize, GameMapType};
use crate::intent::Intent;
use crate::types::{ClientId, GameId};
use crate::validate::{
    SAFE_STRING_MAX_CHARS, SchemaError, Validate, check_flag, check_hex_color, check_safe_string,
    check_token, check_username,
};

/// One relay-sequenced batch of intents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Turn {
    pub turn_number: u64,
    pub intents: Vec<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<i64>,
}

impl Turn {
    /// A turn in which nobody acted.
    pub fn empty(turn_number: u64) -> Self {
        Self {
            turn_number,
            intents: Vec::new(),
            hash: None,
        }
    }
}

impl Validate for Turn {
    fn validate(&self) -> Result<(), SchemaError> {
        self.intents.validate()
    }
}

/// Cosmetic references chosen by a player. Only references travel on the
/// wire; the catalogs they point into are resolved by the renderer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlayerCosmetics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
}

impl Validate for PlayerCosmetics {
    fn validate(&self) -> Result<(), SchemaError> {
        if let Some(flag) = &self.flag {
            check_flag("cosmetics.flag", flag)?;
        }
        if let Some(color) = &self.color {
            check_hex_color("cosmetics.color", color)?;
        }
        if let Some(pattern) = &self.pattern_name {
            check_safe_string("cosmetics.patternName", pattern, 64)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Player {
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosmetics: Option<PlayerCosmetics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_lobby_creator: Option<bool>,
}

impl Validate for Player {
    fn validate(&self) -> Result<(), SchemaError> {
        check_username("player.username", &self.username)?;
        self.cosmetics.validate()
    }
}

/// Everything fixed at game start. Assigned once per session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameStartInfo {
    #[serde(rename = "gameID")]
    pub game_id: GameId,
    pub lobby_created_at: u64,
    pub config: GameConfig,
    pub players: Vec<Player>,
}

impl GameStartInfo {
    pub fn player(&self, client_id: &ClientId) -> Option<&Player> {
        self.players.iter().find(|p| &p.client_id == client_id)
    }

    pub fn lobby_creator(&self) -> Option<&ClientId> {
        self.players
            .iter()
            .find(|p| p.is_lobby_creator == Some(true))
            .map(|p| &p.client_id)
    }
}

impl Validate for GameStartInfo {
    fn validate(&self) -> Result<(), SchemaError> {
        self.config.validate()?;
        self.players.validate()?;
        let mut seen = std::collections::BTreeSet::new();
        for player in &self.players {
            if !seen.insert(&player.client_id) {
                return Err(SchemaError::invalid(
                    "gameStartInfo.players",
                    format!("duplicate client {}", player.client_id),
                ));
            }
        }
        Ok(())
    }
}

/// Who won: a single player, a team, or a nation (bot faction), followed by
/// the client IDs that share the victory.
///
/// On the wire this is an array: `["player", id, ...ids]`,
/// `["team", name, ...ids]` or `["nation", name, ...ids]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Winner {
    Player {
        client_id: ClientId,
        others: Vec<ClientId>,
    },
    Team {
        name: String,
        members: Vec<ClientId>,
    },
    Nation {
        name: String,
        members: Vec<ClientId>,
    },
}

impl Winner {
    /// Every client credited with the win.
    pub fn client_ids(&self) -> Vec<&ClientId> {
        match self {
            Self::Player { client_id, others } => {
                std::iter::once(client_id).chain(others.iter()).collect()
            }
            Self::Team { members, .. } | Self::Nation { members, .. } => members.iter().collect(),
        }
    }
}

impl Serialize for Winner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (kind, head, rest) = match self {
            Self::Player { client_id, others } => ("player", client_id.as_str(), others),
            Self::Team { name, members } => ("team", name.as_str(), members),
            Self::Nation { name, members } => ("nation", name.as_str(), members),
        };
        let mut seq = serializer.serialize_seq(Some(2 + rest.len()))?;
        seq.serialize_element(kind)?;
        seq.serialize_element(head)?;
        for id in rest {
            seq.serialize_element(id)?;
        }
        seq.end()
    }
}

struct WinnerVisitor;

impl<'de> Visitor<'de> for WinnerVisitor {
    type Value = Winner;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(r#"["player"|"team"|"nation", name, ...clientIDs]"#)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Winner, A::Error> {
        let kind: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let head: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let mut rest = Vec::new();
        while let Some(id) = seq.next_element::<ClientId>()? {
            rest.push(id);
        }
        match kind.as_str() {
            "player" => Ok(Winner::Player {
                client_id: ClientId::new(head).map_err(de::Error::custom)?,
                others: rest,
            }),
            "team" => Ok(Winner::Team {
                name: head,
                members: rest,
            }),
            "nation" => Ok(Winner::Nation {
                name: head,
                members: rest,
            }),
            other => Err(de::Error::unknown_variant(other, &["player", "team", "nation"])),
        }
    }
}

impl<'de> Deserialize<'de> for Winner {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(WinnerVisitor)
    }
}

impl Validate for Winner {
    fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::Player { .. } => Ok(()),
            Self::Team { name, .. } | Self::Nation { name, .. } => {
                check_safe_string("winner.name", name, SAFE_STRING_MAX_CHARS)
            }
        }
    }
}

/// End-of-game statistics for one player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PlayerStats {
    pub attacks: u64,
    pub conquests: u64,
    pub betrayals: u64,
    pub boats: u64,
    pub units_built: u64,
    pub gold_donated: u64,
    pub troops_donated: u64,
}

pub type AllPlayersStats = BTreeMap<ClientId, PlayerStats>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ClientMessage {
    /// First contact with a lobby.
    Join {
        #[serde(rename = "clientID")]
        client_id: ClientId,
        token: String,
        #[serde(rename = "gameID")]
        game_id: GameId,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cosmetics: Option<PlayerCosmetics>,
        #[serde(rename = "turnstileToken")]
        turnstile_token: Option<String>,
    },
    /// Resume a session; the relay answers with every turn from `last_turn`.
    Rejoin {
        #[serde(rename = "gameID")]
        game_id: GameId,
        #[serde(rename = "clientID")]
        client_id: ClientId,
        #[serde(rename = "lastTurn")]
        last_turn: u64,
        token: String,
    },
    Intent {
        intent: Intent,
    },
    /// State hash after applying `turn_number`.
    Hash {
        hash: i64,
        #[serde(rename = "turnNumber")]
        turn_number: u64,
    },
    Winner {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner: Option<Winner>,
        #[serde(rename = "allPlayersStats")]
        all_players_stats: AllPlayersStats,
    },
    Log {
        severity: LogSeverity,
        log: String,
    },
    Ping,
}

impl ClientMessage {
    /// The wire discriminator, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Rejoin { .. } => "rejoin",
            Self::Intent { .. } => "intent",
            Self::Hash { .. } => "hash",
            Self::Winner { .. } => "winner",
            Self::Log { .. } => "log",
            Self::Ping => "ping",
        }
    }
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::Join {
                token,
                username,
                cosmetics,
                turnstile_token,
                ..
            } => {
                check_token("join.token", token)?;
                check_username("join.username", username)?;
                if let Some(turnstile) = turnstile_token {
                    check_safe_string("join.turnstileToken", turnstile, 4096)?;
                }
                cosmetics.validate()
            }
            Self::Rejoin { token, .. } => check_token("rejoin.token", token),
            Self::Intent { intent } => intent.validate(),
            Self::Hash { .. } | Self::Ping => Ok(()),
            Self::Winner { winner, .. } => winner.validate(),
            Self::Log { log, .. } => check_safe_string("log.log", log, SAFE_STRING_MAX_CHARS),
        }
    }
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ServerMessage {
    /// The lobby is about to start on this map; clients may begin loading.
    Prestart {
        #[serde(rename = "gameMap")]
        game_map: GameMapType,
        #[serde(rename = "gameMapSize")]
        game_map_size: GameMapSize,
    },
    /// The game has started. `turns` is the backlog so far (empty for a
    /// fresh game, partial for a rejoin).
    Start {
        turns: Vec<Turn>,
        #[serde(rename = "gameStartInfo")]
        game_start_info: GameStartInfo,
        #[serde(rename = "lobbyCreatedAt")]
        lobby_created_at: u64,
    },
    Turn {
        turn: Turn,
    },
    /// Hash disagreement at `turn`. Informational: nobody rolls back.
    Desync {
        turn: u64,
        #[serde(rename = "correctHash")]
        correct_hash: Option<i64>,
        #[serde(rename = "clientsWithCorrectHash")]
        clients_with_correct_hash: u32,
        #[serde(rename = "totalActiveClients")]
        total_active_clients: u32,
        #[serde(rename = "yourHash", default, skip_serializing_if = "Option::is_none")]
        your_hash: Option<i64>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Ping,
}

/// `error` value telling a joining client the lobby has no free slot.
pub const ERROR_FULL_LOBBY: &str = "full-lobby";
/// `error` value for a join or rejoin naming a game the server is not hosting.
pub const ERROR_WRONG_GAME: &str = "game-not-found";
/// `error` value for a token that does not match the client's first join.
pub const ERROR_UNAUTHORIZED: &str = "unauthorized";
/// `error` value for a rejoin from a client the server has never seen.
pub const ERROR_UNKNOWN_CLIENT: &str = "unknown-client";

/// Whether an `error` code means the server will never accept this client
/// into the game again.
pub fn is_session_lost(error: &str) -> bool {
    matches!(error, ERROR_WRONG_GAME | ERROR_UNAUTHORIZED | ERROR_UNKNOWN_CLIENT)
}

impl ServerMessage {
    /// The wire discriminator, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prestart { .. } => "prestart",
            Self::Start { .. } => "start",
            Self::Turn { .. } => "turn",
            Self::Desync { .. } => "desync",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
        }
    }
}

impl Validate for ServerMessage {
    fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::Start {
                turns,
                game_start_info,
                ..
            } => {
                turns.validate()?;
                game_start_info.validate()
            }
            Self::Turn { turn } => turn.validate(),
            Self::Error { error, message } => {
                check_safe_string("error.error", error, SAFE_STRING_MAX_CHARS)?;
                if let Some(message) = message {
                    check_safe_string("error.message", message, SAFE_STRING_MAX_CHARS)?;
                }
                Ok(())
            }
            Self::Prestart { .. } | Self::Desync { .. } | Self::Ping => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ClientId {
        ClientId::new(s).unwrap()
    }

    #[test]
    fn winner_array_form() {
        let winner = Winner::Player {
            client_id: cid("AAAA1111"),
            others: vec![cid("BBBB2222")],
        };
        let json = serde_json::to_string(&winner).unwrap();
        assert_eq!(json, r#"["player","AAAA1111","BBBB2222"]"#);
        let back: Winner = serde_json::from_str(&json).unwrap();
        assert_eq!(back, winner);
        assert_eq!(back.client_ids().len(), 2);
    }

    #[test]
    fn winner_rejects_unknown_kind_and_bad_player_id() {
        assert!(serde_json::from_str::<Winner>(r#"["alien","x"]"#).is_err());
        assert!(serde_json::from_str::<Winner>(r#"["player","not-an-id"]"#).is_err());
        assert!(serde_json::from_str::<Winner>(r#"["team"]"#).is_err());
        let nation: Winner = serde_json::from_str(r#"["nation","Prussia"]"#).unwrap();
        assert!(nation.client_ids().is_empty());
    }

    #[test]
    fn join_username_and_token_checked() {
        let join = ClientMessage::Join {
            client_id: cid("AAAA1111"),
            token: "0f8fad5b-d9cb-469f-a165-70867728950e".into(),
            game_id: GameId::new("Gm7Lobby").unwrap(),
            username: "Al".into(),
            cosmetics: None,
            turnstile_token: None,
        };
        assert!(matches!(
            join.validate(),
            Err(SchemaError::Invalid {
                field: "join.username",
                ..
            })
        ));
    }

    #[test]
    fn turnstile_token_is_required_but_nullable() {
        let json = r#"{"type":"join","clientID":"AAAA1111","token":"0f8fad5b-d9cb-469f-a165-70867728950e","gameID":"Gm7Lobby","username":"Alice","turnstileToken":null}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind(), "join");
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["turnstileToken"].is_null());
    }

    #[test]
    fn duplicate_players_rejected() {
        let player = Player {
            client_id: cid("AAAA1111"),
            username: "Alice".into(),
            cosmetics: None,
            is_lobby_creator: None,
        };
        let info = GameStartInfo {
            game_id: GameId::new("Gm7Lobby").unwrap(),
            lobby_created_at: 0,
            config: GameConfig::default(),
            players: vec![player.clone(), player],
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn lobby_creator_lookup() {
        let info = GameStartInfo {
            game_id: GameId::new("Gm7Lobby").unwrap(),
            lobby_created_at: 0,
            config: GameConfig::default(),
            players: vec![
                Player {
                    client_id: cid("AAAA1111"),
                    username: "Alice".into(),
                    cosmetics: None,
                    is_lobby_creator: None,
                },
                Player {
                    client_id: cid("BBBB2222"),
                    username: "Bob".into(),
                    cosmetics: None,
                    is_lobby_creator: Some(true),
                },
            ],
        };
        assert_eq!(info.lobby_creator(), Some(&cid("BBBB2222")));
        assert!(info.player(&cid("AAAA1111")).is_some());
        assert!(info.player(&cid("CCCC3333")).is_none());
    }

    #[test]
    fn stats_default_missing_fields() {
        let stats: PlayerStats = serde_json::from_str(r#"{"attacks":2}"#).unwrap();
        assert_eq!(stats.attacks, 2);
        assert_eq!(stats.conquests, 0);
    }
}
