// frontier_protocol: the message schema layer shared by clients and relay.
//
// Every byte that crosses the wire between a Frontier client and the relay
// is described here. Both sides depend on this crate and nothing else for
// the contract, so a message that decodes on one side decodes on the other.
//
// Module overview:
// - `types.rs`:    Identifier newtypes (`GameId`, `ClientId`) that validate on
//                  construction and on deserialization.
// - `config.rs`:   `GameConfig` and the enums it is built from, plus the
//                  partial `GameConfigPatch` carried by `update_game_config`.
// - `intent.rs`:   The `Intent` tagged union: every player action the
//                  simulation can receive.
// - `message.rs`:  `ClientMessage` / `ServerMessage` and the structs they
//                  carry (`Turn`, `GameStartInfo`, `Player`, `Winner`, ...).
// - `record.rs`:   Archived game records (`GameRecord`, `PartialGameRecord`)
//                  used for replay and written when a game ends.
// - `validate.rs`: `SchemaError`, the `Validate` trait and the shared field
//                  checks (usernames, tokens, bounded numbers, free text).
// - `codec.rs`:    JSON encode/decode entry points. Decoding runs serde then
//                  `Validate`; encoding validates first so nothing invalid is
//                  ever put on the wire.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream.
//
// Design decisions:
// - **Strict decoding.** Structs and enum variants use
//   `deny_unknown_fields`; identifiers reject bad shapes during
//   deserialization; bounds are checked by `Validate`. A message either
//   passes every check or is rejected as a whole.
// - **Tagged JSON.** Messages and intents are internally tagged on `type`,
//   matching the browser client's wire format field for field.
// - **No async runtime.** Framing uses `std::io::Read`/`Write`, which works
//   with blocking TCP streams and buffered wrappers alike.

pub mod codec;
pub mod config;
pub mod framing;
pub mod intent;
pub mod message;
pub mod record;
pub mod types;
pub mod validate;

pub use codec::{
    decode_client_message, decode_server_message, decode_validated, encode_client_message,
    encode_server_message,
};
pub use config::{
    Difficulty, GameConfig, GameConfigPatch, GameMapSize, GameMapType, GameMode, GameType,
    PlayerTeams, PublicGameModifiers, RankedType, TeamPreset, UnitType,
};
pub use framing::{MAX_FRAME_SIZE, read_frame, write_frame};
pub use intent::{EMOJI_TABLE, EmbargoAction, EmojiRecipient, Intent};
pub use message::{
    AllPlayersStats, ClientMessage, GameStartInfo, LogSeverity, Player, PlayerCosmetics,
    PlayerStats, ServerMessage, Turn, Winner,
};
pub use record::{GAME_RECORD_VERSION, GameEndInfo, GameRecord, PartialGameRecord, PlayerRecord};
pub use types::{ClientId, GameId};
pub use validate::{SchemaError, Validate};
