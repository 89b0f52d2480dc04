// GameState: the complete deterministic state of one game.
//
// `GameState` is built from `GameStartInfo` and advanced one turn at a time
// by `execute_turn`. Each call applies the turn's intents in array order
// (`intents.rs`), runs the per-tick systems unless the game is paused
// (`systems.rs`), and returns the `GameUpdates` for that tick including the
// state hash.
//
// Determinism: all collections are `BTreeMap`/`BTreeSet` or index-ordered
// `Vec`s, all arithmetic is integer, and floating-point inputs from intents
// are converted once at the boundary. Two states built from the same start
// info and fed the same turns produce the same hash after every tick.
//
// Tile ownership is a dense `Vec<u16>` of "small IDs" (1-based position of
// the player in the start info; 0 = unclaimed), which keeps both the
// territory scans and the hash cheap.

use std::collections::{BTreeMap, BTreeSet};

use frontier_protocol::{
    AllPlayersStats, ClientId, GameConfig, GameStartInfo, PlayerStats, Turn, UnitType, Winner,
};
use tracing::debug;

use crate::error::SimError;
use crate::map::{TerrainMap, TileRef};
use crate::rules::SPAWN_PHASE_TICKS;
use crate::updates::{GameUpdates, HashUpdate, PlayerUpdate, TileUpdate, UnitUpdate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerState {
    pub small_id: u16,
    pub username: String,
    pub troops: u64,
    pub gold: u64,
    pub tiles: u32,
    pub spawned: bool,
    pub eliminated: bool,
    pub disconnected: bool,
    pub allies: BTreeSet<ClientId>,
    pub embargoes: BTreeSet<ClientId>,
    pub target: Option<ClientId>,
    pub stats: PlayerStats,
}

impl PlayerState {
    /// Spawned, not eliminated, and holding territory.
    pub fn is_alive(&self) -> bool {
        self.spawned && !self.eliminated && self.tiles > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    pub id: u32,
    pub owner: ClientId,
    pub kind: UnitType,
    pub tile: TileRef,
    pub level: u32,
}

/// Troops in flight against a player (or unclaimed land when `target` is
/// `None`). Boat attacks carry a `beachhead` and the transport unit until
/// they land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attack {
    pub id: u32,
    pub attacker: ClientId,
    pub target: Option<ClientId>,
    pub troops: u64,
    pub beachhead: Option<TileRef>,
    pub transport: Option<u32>,
}

pub struct GameState {
    pub(crate) tick: u64,
    /// Ticks that ran while unpaused; drives the spawn phase and the timer.
    pub(crate) game_ticks: u64,
    pub(crate) config: GameConfig,
    pub(crate) map: TerrainMap,
    pub(crate) owners: Vec<u16>,
    pub(crate) players: BTreeMap<ClientId, PlayerState>,
    pub(crate) small_ids: Vec<ClientId>,
    pub(crate) lobby_creator: Option<ClientId>,
    pub(crate) units: BTreeMap<u32, Unit>,
    pub(crate) attacks: BTreeMap<u32, Attack>,
    pub(crate) next_id: u32,
    /// Pending `(requestor, recipient)` alliance requests.
    pub(crate) alliance_requests: BTreeSet<(ClientId, ClientId)>,
    pub(crate) paused: bool,
    pub(crate) winner: Option<Winner>,
    pub(crate) gold_multiplier_pct: u64,
}

pub(crate) fn gold_multiplier_pct(config: &GameConfig) -> u64 {
    (config.gold_multiplier.unwrap_or(1.0) * 100.0).round() as u64
}

impl GameState {
    pub fn new(info: &GameStartInfo) -> Result<Self, SimError> {
        if info.players.is_empty() {
            return Err(SimError::NoPlayers);
        }
        if info.players.len() >= usize::from(u16::MAX) {
            return Err(SimError::TooManyPlayers(info.players.len()));
        }
        let map = TerrainMap::generate(info.config.game_map, info.config.game_map_size);
        let starting_gold = info.config.starting_gold.unwrap_or(0.0) as u64;

        let mut players = BTreeMap::new();
        let mut small_ids = Vec::with_capacity(info.players.len());
        for (index, player) in info.players.iter().enumerate() {
            let state = PlayerState {
                small_id: (index + 1) as u16,
                username: player.username.clone(),
                troops: 0,
                gold: starting_gold,
                tiles: 0,
                spawned: false,
                eliminated: false,
                disconnected: false,
                allies: BTreeSet::new(),
                embargoes: BTreeSet::new(),
                target: None,
                stats: PlayerStats::default(),
            };
            if players.insert(player.client_id.clone(), state).is_some() {
                return Err(SimError::DuplicatePlayer(player.client_id.clone()));
            }
            small_ids.push(player.client_id.clone());
        }

        debug!(
            game_id = %info.game_id,
            players = small_ids.len(),
            width = map.width(),
            height = map.height(),
            land = map.land_count(),
            "game state initialized"
        );

        Ok(Self {
            tick: 0,
            game_ticks: 0,
            owners: vec![0; map.tile_count() as usize],
            map,
            players,
            small_ids,
            lobby_creator: info.lobby_creator().cloned(),
            units: BTreeMap::new(),
            attacks: BTreeMap::new(),
            next_id: 1,
            alliance_requests: BTreeSet::new(),
            paused: false,
            winner: None,
            gold_multiplier_pct: gold_multiplier_pct(&info.config),
            config: info.config.clone(),
        })
    }

    /// Apply one turn. `turn.turn_number` must equal `self.tick()`.
    pub fn execute_turn(&mut self, turn: &Turn) -> Result<GameUpdates, SimError> {
        if turn.turn_number != self.tick {
            return Err(SimError::TurnOutOfOrder {
                expected: self.tick,
                got: turn.turn_number,
            });
        }
        let mut updates = GameUpdates::new(self.tick);
        for intent in &turn.intents {
            if let Err(rejected) = self.apply_intent(intent, &mut updates) {
                debug!(tick = self.tick, %intent, reason = rejected.0, "intent rejected");
            }
        }
        if !self.paused {
            self.run_systems(&mut updates);
            self.game_ticks += 1;
        }
        for (client_id, player) in &self.players {
            updates.players.push(PlayerUpdate {
                client_id: client_id.clone(),
                troops: player.troops,
                gold: player.gold,
                tiles: player.tiles,
                alive: player.is_alive(),
                disconnected: player.disconnected,
            });
        }
        updates.hashes.push(HashUpdate {
            tick: self.tick,
            hash: self.state_hash(),
        });
        self.tick += 1;
        Ok(updates)
    }

    /// CRC32 over a canonical encoding of everything that affects future
    /// ticks.
    pub fn state_hash(&self) -> i64 {
        let mut h = crc32fast::Hasher::new();
        h.update(&self.tick.to_le_bytes());
        h.update(&self.game_ticks.to_le_bytes());
        h.update(&[u8::from(self.paused)]);
        for owner in &self.owners {
            h.update(&owner.to_le_bytes());
        }
        for (client_id, p) in &self.players {
            h.update(client_id.as_str().as_bytes());
            h.update(&p.troops.to_le_bytes());
            h.update(&p.gold.to_le_bytes());
            h.update(&p.tiles.to_le_bytes());
            h.update(&[
                u8::from(p.spawned),
                u8::from(p.eliminated),
                u8::from(p.disconnected),
            ]);
            for ally in &p.allies {
                h.update(ally.as_str().as_bytes());
            }
            for embargo in &p.embargoes {
                h.update(embargo.as_str().as_bytes());
            }
        }
        for unit in self.units.values() {
            h.update(&unit.id.to_le_bytes());
            h.update(unit.owner.as_str().as_bytes());
            h.update(&[unit.kind as u8]);
            h.update(&unit.tile.to_le_bytes());
            h.update(&unit.level.to_le_bytes());
        }
        for attack in self.attacks.values() {
            h.update(&attack.id.to_le_bytes());
            h.update(&attack.troops.to_le_bytes());
            h.update(&attack.beachhead.unwrap_or(u32::MAX).to_le_bytes());
        }
        i64::from(h.finalize())
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn map(&self) -> &TerrainMap {
        &self.map
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn winner(&self) -> Option<&Winner> {
        self.winner.as_ref()
    }

    pub fn in_spawn_phase(&self) -> bool {
        self.game_ticks < SPAWN_PHASE_TICKS
    }

    pub(crate) fn in_spawn_immunity(&self) -> bool {
        self.game_ticks < SPAWN_PHASE_TICKS + self.config.spawn_immunity_duration.unwrap_or(0)
    }

    pub fn player(&self, client_id: &ClientId) -> Option<&PlayerState> {
        self.players.get(client_id)
    }

    pub fn players(&self) -> impl Iterator<Item = (&ClientId, &PlayerState)> {
        self.players.iter()
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn attacks(&self) -> impl Iterator<Item = &Attack> {
        self.attacks.values()
    }

    pub fn all_stats(&self) -> AllPlayersStats {
        self.players
            .iter()
            .map(|(id, p)| (id.clone(), p.stats.clone()))
            .collect()
    }

    pub fn owner(&self, tile: TileRef) -> Option<&ClientId> {
        let small_id = *self.owners.get(tile as usize)?;
        self.client_for_small_id(small_id)
    }

    pub(crate) fn client_for_small_id(&self, small_id: u16) -> Option<&ClientId> {
        usize::from(small_id)
            .checked_sub(1)
            .and_then(|index| self.small_ids.get(index))
    }

    pub(crate) fn small_id(&self, client_id: &ClientId) -> Option<u16> {
        self.players.get(client_id).map(|p| p.small_id)
    }

    pub(crate) fn owned_tiles(&self, client_id: &ClientId) -> Vec<TileRef> {
        let Some(small_id) = self.small_id(client_id) else {
            return Vec::new();
        };
        (0..self.map.tile_count())
            .filter(|t| self.owners[*t as usize] == small_id)
            .collect()
    }

    pub(crate) fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Transfer `tile` to `new_owner` (or release it), keeping tile counts
    /// in sync and recording the change.
    pub(crate) fn set_owner(
        &mut self,
        tile: TileRef,
        new_owner: Option<&ClientId>,
        updates: &mut GameUpdates,
    ) {
        let new_small_id = match new_owner {
            Some(id) => match self.small_id(id) {
                Some(small_id) => small_id,
                None => return,
            },
            None => 0,
        };
        let Some(old_small_id) = self.owners.get(tile as usize).copied() else {
            return;
        };
        if old_small_id == new_small_id {
            return;
        }
        if let Some(old_owner) = self.client_for_small_id(old_small_id).cloned() {
            if let Some(p) = self.players.get_mut(&old_owner) {
                p.tiles = p.tiles.saturating_sub(1);
            }
        }
        if let Some(p) = new_owner.and_then(|id| self.players.get_mut(id)) {
            p.tiles += 1;
        }
        self.owners[tile as usize] = new_small_id;
        updates.tiles.push(TileUpdate {
            tile,
            owner: new_owner.cloned(),
        });
    }

    pub(crate) fn release_all_tiles(&mut self, client_id: &ClientId, updates: &mut GameUpdates) {
        for tile in self.owned_tiles(client_id) {
            self.set_owner(tile, None, updates);
        }
    }

    pub(crate) fn push_unit_update(&self, unit: &Unit, deleted: bool, updates: &mut GameUpdates) {
        updates.units.push(UnitUpdate {
            unit_id: unit.id,
            owner: unit.owner.clone(),
            kind: unit.kind,
            tile: unit.tile,
            level: unit.level,
            deleted,
        });
    }

    pub(crate) fn remove_unit(&mut self, unit_id: u32, updates: &mut GameUpdates) {
        if let Some(unit) = self.units.remove(&unit_id) {
            self.push_unit_update(&unit, true, updates);
        }
    }

    /// Remove an attack, returning its remaining troops to the attacker and
    /// sinking its transport if it never landed.
    pub(crate) fn end_attack(&mut self, attack_id: u32, updates: &mut GameUpdates) {
        let Some(attack) = self.attacks.remove(&attack_id) else {
            return;
        };
        if let Some(p) = self.players.get_mut(&attack.attacker) {
            if !p.eliminated {
                p.troops = p.troops.saturating_add(attack.troops);
            }
        }
        if let Some(unit_id) = attack.transport {
            self.remove_unit(unit_id, updates);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn rejects_empty_player_list() {
        let info = start_info(&[], GameConfig::default());
        assert_eq!(GameState::new(&info).err(), Some(SimError::NoPlayers));
    }

    #[test]
    fn rejects_duplicate_players() {
        let mut info = start_info(&["Alice", "Bob"], GameConfig::default());
        info.players[1].client_id = info.players[0].client_id.clone();
        assert!(matches!(
            GameState::new(&info),
            Err(SimError::DuplicatePlayer(_))
        ));
    }

    #[test]
    fn turns_must_arrive_in_order() {
        let mut state = GameState::new(&start_info(&["Alice"], GameConfig::default())).unwrap();
        assert!(state.execute_turn(&Turn::empty(0)).is_ok());
        assert_eq!(
            state.execute_turn(&Turn::empty(2)).err(),
            Some(SimError::TurnOutOfOrder {
                expected: 1,
                got: 2
            })
        );
        assert_eq!(state.tick(), 1);
    }

    #[test]
    fn every_tick_reports_one_hash() {
        let mut state = GameState::new(&start_info(&["Alice"], GameConfig::default())).unwrap();
        let updates = advance_to(&mut state, 3);
        let ticks: Vec<u64> = updates
            .iter()
            .flat_map(|u| u.hashes.iter().map(|h| h.tick))
            .collect();
        assert_eq!(ticks, vec![0, 1, 2]);
    }

    #[test]
    fn hash_depends_on_tick() {
        let mut state = GameState::new(&start_info(&["Alice"], GameConfig::default())).unwrap();
        let first = state.execute_turn(&Turn::empty(0)).unwrap().hashes[0].hash;
        let second = state.execute_turn(&Turn::empty(1)).unwrap().hashes[0].hash;
        assert_ne!(first, second);
    }

    #[test]
    fn starting_gold_and_lobby_creator_from_config() {
        let config = GameConfig {
            starting_gold: Some(5000.0),
            ..GameConfig::default()
        };
        let state = GameState::new(&start_info(&["Alice", "Bob"], config)).unwrap();
        assert_eq!(state.player(&cid("PLAYER01")).unwrap().gold, 5000);
        assert_eq!(state.lobby_creator, Some(cid("PLAYER00")));
    }
}
