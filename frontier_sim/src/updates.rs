// Per-tick output of the simulation.
//
// `GameUpdates` is everything a view needs to redraw after one tick, grouped
// by kind. It is produced by `GameState::execute_turn` and wrapped by the
// worker (with timing) before crossing the thread boundary.
//
// Exactly one `HashUpdate` is produced per tick; `win` is set on the single
// tick that decides the game.

use frontier_protocol::{AllPlayersStats, ClientId, UnitType, Winner};

use crate::map::TileRef;

/// State hash after a tick, reported to the relay for desync detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashUpdate {
    pub tick: u64,
    pub hash: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileUpdate {
    pub tile: TileRef,
    /// `None` when the tile became unclaimed.
    pub owner: Option<ClientId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerUpdate {
    pub client_id: ClientId,
    pub troops: u64,
    pub gold: u64,
    pub tiles: u32,
    pub alive: bool,
    pub disconnected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitUpdate {
    pub unit_id: u32,
    pub owner: ClientId,
    pub kind: UnitType,
    pub tile: TileRef,
    pub level: u32,
    pub deleted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Emoji,
    QuickChat,
    Alliance,
    Combat,
    Elimination,
    Game,
}

/// A line for the event feed or a chat bubble.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMessage {
    pub kind: MessageKind,
    pub from: Option<ClientId>,
    /// `None` when addressed to everyone.
    pub to: Option<ClientId>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WinUpdate {
    pub winner: Winner,
    pub all_players_stats: AllPlayersStats,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameUpdates {
    pub tick: u64,
    pub hashes: Vec<HashUpdate>,
    pub tiles: Vec<TileUpdate>,
    pub players: Vec<PlayerUpdate>,
    pub units: Vec<UnitUpdate>,
    pub messages: Vec<DisplayMessage>,
    pub win: Option<WinUpdate>,
}

impl GameUpdates {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            hashes: Vec::new(),
            tiles: Vec::new(),
            players: Vec::new(),
            units: Vec::new(),
            messages: Vec::new(),
            win: None,
        }
    }

    pub(crate) fn message(
        &mut self,
        kind: MessageKind,
        from: Option<&ClientId>,
        to: Option<&ClientId>,
        text: impl Into<String>,
    ) {
        self.messages.push(DisplayMessage {
            kind,
            from: from.cloned(),
            to: to.cloned(),
            text: text.into(),
        });
    }

    pub fn player(&self, client_id: &ClientId) -> Option<&PlayerUpdate> {
        self.players.iter().find(|p| &p.client_id == client_id)
    }
}
