use frontier_protocol::ClientId;
use thiserror::Error;

/// Failures that make the simulation unusable. Illegal intents are not
/// errors: they are rejected individually and the turn continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("turn {got} delivered while the simulation expected turn {expected}")]
    TurnOutOfOrder { expected: u64, got: u64 },
    #[error("cannot start a game without players")]
    NoPlayers,
    #[error("{0} players exceed the supported maximum")]
    TooManyPlayers(usize),
    #[error("player {0} appears twice in the start info")]
    DuplicatePlayer(ClientId),
}
