// Per-tick systems, run after the turn's intents while the game is
// unpaused and the spawn phase is over.
//
// Order matters for determinism and is fixed: income, attacks (in attack ID
// order), eliminations, then the victory check. Attacks conquer frontier
// tiles in ascending tile index, so two clients always pick the same tiles.

use std::collections::BTreeMap;

use frontier_protocol::{ClientId, UnitType, Winner};

use crate::map::TileRef;
use crate::rules::{
    BASE_MAX_TROOPS, BASE_TROOP_INCOME, DEFENDED_TILE_BASE_COST, GOLD_PER_TILE,
    MAX_CONQUESTS_PER_TICK, MAX_TROOPS_PER_CITY_LEVEL, MAX_TROOPS_PER_TILE, SPAWN_PHASE_TICKS,
    TICKS_PER_MINUTE, TILES_PER_EXTRA_TROOP, UNCLAIMED_TILE_COST, WIN_TERRITORY_PERCENT,
};
use crate::state::{Attack, GameState};
use crate::updates::{GameUpdates, MessageKind, WinUpdate};

impl GameState {
    pub(crate) fn run_systems(&mut self, updates: &mut GameUpdates) {
        if self.in_spawn_phase() {
            return;
        }
        self.grow_income();
        self.advance_attacks(updates);
        self.eliminate_defeated(updates);
        if self.winner.is_none() {
            self.check_victory(updates);
        }
    }

    /// Troop cap for a player: a base amount plus territory and cities.
    pub fn max_troops(&self, client_id: &ClientId) -> u64 {
        let tiles = self.player(client_id).map_or(0, |p| u64::from(p.tiles));
        let city_levels: u64 = self
            .units
            .values()
            .filter(|u| &u.owner == client_id && u.kind == UnitType::City)
            .map(|u| u64::from(u.level))
            .sum();
        BASE_MAX_TROOPS + tiles * MAX_TROOPS_PER_TILE + city_levels * MAX_TROOPS_PER_CITY_LEVEL
    }

    fn grow_income(&mut self) {
        let caps: BTreeMap<ClientId, u64> = self
            .players
            .keys()
            .map(|id| (id.clone(), self.max_troops(id)))
            .collect();
        for (id, p) in self.players.iter_mut() {
            if !p.is_alive() {
                continue;
            }
            let tiles = u64::from(p.tiles);
            let cap = caps.get(id).copied().unwrap_or(BASE_MAX_TROOPS);
            if self.config.infinite_troops {
                p.troops = p.troops.max(cap);
            } else if p.troops < cap {
                let income = BASE_TROOP_INCOME + tiles / TILES_PER_EXTRA_TROOP;
                p.troops = (p.troops + income).min(cap);
            }
            let gold = tiles * GOLD_PER_TILE * self.gold_multiplier_pct / 100;
            p.gold = p.gold.saturating_add(gold);
        }
    }

    /// Troops needed to take `tile` from its current owner.
    fn tile_cost(&self, tile: TileRef) -> u64 {
        match self.owner(tile).and_then(|id| self.player(id)) {
            None => UNCLAIMED_TILE_COST,
            Some(defender) => {
                DEFENDED_TILE_BASE_COST + defender.troops / u64::from(defender.tiles.max(1))
            }
        }
    }

    /// Move `tile` to the attacker, bleeding the defender and capturing any
    /// structures standing on it.
    fn conquer(&mut self, tile: TileRef, attack: &Attack, cost: u64, updates: &mut GameUpdates) {
        if let Some(defender) = attack.target.as_ref().and_then(|t| self.players.get_mut(t)) {
            defender.troops = defender.troops.saturating_sub(cost / 2);
        }
        self.set_owner(tile, Some(&attack.attacker), updates);
        if let Some(p) = self.players.get_mut(&attack.attacker) {
            p.stats.conquests += 1;
        }
        let captured: Vec<u32> = self
            .units
            .values()
            .filter(|u| u.tile == tile && u.kind.is_structure() && u.owner != attack.attacker)
            .map(|u| u.id)
            .collect();
        for id in captured {
            if let Some(unit) = self.units.get_mut(&id) {
                unit.owner = attack.attacker.clone();
            }
            if let Some(unit) = self.units.get(&id) {
                self.push_unit_update(unit, false, updates);
            }
        }
    }

    fn advance_attacks(&mut self, updates: &mut GameUpdates) {
        let ids: Vec<u32> = self.attacks.keys().copied().collect();
        for id in ids {
            self.advance_attack(id, updates);
        }
    }

    fn advance_attack(&mut self, id: u32, updates: &mut GameUpdates) {
        let Some(mut attack) = self.attacks.get(&id).cloned() else {
            return;
        };
        let Some(attacker_small) = self.small_id(&attack.attacker) else {
            self.end_attack(id, updates);
            return;
        };
        let target_small = match &attack.target {
            Some(target) => match self.player(target) {
                Some(p) if !p.eliminated => p.small_id,
                _ => {
                    self.end_attack(id, updates);
                    return;
                }
            },
            None => 0,
        };

        if let Some(beachhead) = attack.beachhead {
            // The boat lands this tick; the first tile is the beachhead.
            let cost = self.tile_cost(beachhead);
            if self.owners[beachhead as usize] != target_small || attack.troops < cost {
                self.end_attack(id, updates);
                return;
            }
            attack.troops -= cost;
            self.conquer(beachhead, &attack, cost, updates);
            attack.beachhead = None;
            if let Some(unit_id) = attack.transport.take() {
                self.remove_unit(unit_id, updates);
            }
            self.attacks.insert(id, attack);
            return;
        }

        let mut conquered = 0;
        for tile in 0..self.map.tile_count() {
            if conquered == MAX_CONQUESTS_PER_TICK {
                break;
            }
            if self.owners[tile as usize] != target_small || !self.map.is_land(tile) {
                continue;
            }
            let on_frontier = self
                .map
                .neighbors(tile)
                .any(|n| self.owners[n as usize] == attacker_small);
            if !on_frontier {
                continue;
            }
            let cost = self.tile_cost(tile);
            if attack.troops < cost {
                break;
            }
            attack.troops -= cost;
            self.conquer(tile, &attack, cost, updates);
            conquered += 1;
        }

        if conquered == 0 {
            // Stalled: nothing reachable or too few troops left.
            self.attacks.insert(id, attack);
            self.end_attack(id, updates);
        } else if attack.troops == 0 {
            self.attacks.remove(&id);
        } else {
            self.attacks.insert(id, attack);
        }
    }

    fn eliminate_defeated(&mut self, updates: &mut GameUpdates) {
        let defeated: Vec<ClientId> = self
            .players
            .iter()
            .filter(|(_, p)| p.spawned && !p.eliminated && p.tiles == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in defeated {
            self.eliminate(&id, updates);
            updates.message(MessageKind::Elimination, None, Some(&id), "eliminated");
        }
    }

    fn timer_expired(&self) -> bool {
        self.config
            .max_timer_value
            .is_some_and(|minutes| {
                self.game_ticks >= SPAWN_PHASE_TICKS + u64::from(minutes) * TICKS_PER_MINUTE
            })
    }

    fn check_victory(&mut self, updates: &mut GameUpdates) {
        let alive: Vec<(&ClientId, u32, u16)> = self
            .players
            .iter()
            .filter(|(_, p)| p.is_alive())
            .map(|(id, p)| (id, p.tiles, p.small_id))
            .collect();
        // Most tiles wins; ties go to the earliest player in the start info.
        let Some(&(leader, tiles, _)) = alive
            .iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
        else {
            return;
        };
        let ever_spawned = self.players.values().filter(|p| p.spawned).count();
        let dominates =
            u64::from(tiles) * 100 >= u64::from(self.map.land_count()) * WIN_TERRITORY_PERCENT;
        let last_standing = ever_spawned >= 2 && alive.len() == 1;
        if !(dominates || last_standing || self.timer_expired()) {
            return;
        }

        let others: Vec<ClientId> = self
            .player(leader)
            .map(|p| {
                p.allies
                    .iter()
                    .filter(|a| self.player(a).is_some_and(|ally| ally.is_alive()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let winner = Winner::Player {
            client_id: leader.clone(),
            others,
        };
        updates.message(MessageKind::Game, Some(leader), None, "won the game");
        updates.win = Some(WinUpdate {
            winner: winner.clone(),
            all_players_stats: self.all_stats(),
        });
        self.winner = Some(winner);
    }
}

#[cfg(test)]
mod tests {
    use frontier_protocol::{GameConfig, Intent, Turn};

    use crate::rules::STARTING_TROOPS;
    use crate::state::test_support::*;

    use super::*;

    fn run(state: &mut GameState, intents: Vec<Intent>) -> GameUpdates {
        let turn = Turn {
            turn_number: state.tick(),
            intents,
            hash: None,
        };
        state.execute_turn(&turn).unwrap()
    }

    fn spawn_all(state: &mut GameState) -> (ClientId, ClientId) {
        let (a, b) = (cid("PLAYER00"), cid("PLAYER01"));
        let (ta, tb) = spawn_tiles(state);
        run(
            state,
            vec![
                Intent::Spawn {
                    client_id: a.clone(),
                    tile: ta,
                },
                Intent::Spawn {
                    client_id: b.clone(),
                    tile: tb,
                },
            ],
        );
        (a, b)
    }

    #[test]
    fn no_income_during_spawn_phase() {
        let mut state = GameState::new(&start_info(&["Alice", "Bob"], GameConfig::default())).unwrap();
        let (a, _) = spawn_all(&mut state);
        advance_to(&mut state, SPAWN_PHASE_TICKS);
        let alice = state.player(&a).unwrap();
        assert_eq!(alice.troops, STARTING_TROOPS);
        assert_eq!(alice.gold, 0);
    }

    #[test]
    fn income_grows_after_spawn_phase() {
        let mut state = GameState::new(&start_info(&["Alice", "Bob"], GameConfig::default())).unwrap();
        let (a, _) = spawn_all(&mut state);
        advance_to(&mut state, SPAWN_PHASE_TICKS + 5);
        let alice = state.player(&a).unwrap();
        assert!(alice.troops > STARTING_TROOPS);
        assert!(alice.gold > 0);
        assert!(alice.troops <= state.max_troops(&a));
    }

    #[test]
    fn pause_freezes_systems() {
        let mut state = GameState::new(&start_info(&["Alice", "Bob"], GameConfig::default())).unwrap();
        let (a, _) = spawn_all(&mut state);
        advance_to(&mut state, SPAWN_PHASE_TICKS + 1);
        run(
            &mut state,
            vec![Intent::TogglePause {
                client_id: a.clone(),
                paused: true,
            }],
        );
        let before = state.player(&a).unwrap().clone();
        let target = state.tick() + 10;
        advance_to(&mut state, target);
        assert_eq!(state.player(&a).unwrap(), &before);
    }

    #[test]
    fn attack_on_unclaimed_land_expands_territory() {
        let mut state = GameState::new(&start_info(&["Alice", "Bob"], GameConfig::default())).unwrap();
        let (a, _) = spawn_all(&mut state);
        advance_to(&mut state, SPAWN_PHASE_TICKS + 1);
        let before = state.player(&a).unwrap().tiles;
        run(
            &mut state,
            vec![Intent::Attack {
                client_id: a.clone(),
                target_id: None,
                troops: Some(200.0),
            }],
        );
        let alice = state.player(&a).unwrap();
        assert!(alice.tiles > before);
        assert!(alice.stats.conquests > 0);
    }

    #[test]
    fn conquering_every_tile_eliminates_and_wins() {
        let mut state = GameState::new(&start_info(&["Alice", "Bob"], GameConfig::default())).unwrap();
        let (a, b) = spawn_all(&mut state);
        advance_to(&mut state, SPAWN_PHASE_TICKS + 1);

        // Hand Bob's territory to Alice directly; the systems notice on the
        // next tick.
        let mut scratch = GameUpdates::new(0);
        for tile in state.owned_tiles(&b) {
            state.set_owner(tile, Some(&a), &mut scratch);
        }
        let updates = run(&mut state, Vec::new());

        assert!(state.player(&b).unwrap().eliminated);
        let win = updates.win.expect("game should be decided");
        assert_eq!(
            win.winner,
            Winner::Player {
                client_id: a.clone(),
                others: Vec::new()
            }
        );
        assert!(win.all_players_stats.contains_key(&b));
        assert!(state.winner().is_some());

        // The win is reported once.
        let later = run(&mut state, Vec::new());
        assert!(later.win.is_none());
    }

    #[test]
    fn timer_expiry_picks_largest_territory() {
        let config = GameConfig {
            max_timer_value: Some(1),
            ..GameConfig::default()
        };
        let mut state = GameState::new(&start_info(&["Alice", "Bob"], config)).unwrap();
        let (a, _) = spawn_all(&mut state);
        let mut scratch = GameUpdates::new(0);
        let unclaimed: Vec<TileRef> = (0..state.map().tile_count())
            .filter(|t| state.map().is_land(*t) && state.owner(*t).is_none())
            .take(30)
            .collect();
        for tile in unclaimed {
            state.set_owner(tile, Some(&a), &mut scratch);
        }
        let updates = advance_to(&mut state, SPAWN_PHASE_TICKS + TICKS_PER_MINUTE + 1);
        let wins: Vec<&WinUpdate> = updates.iter().filter_map(|u| u.win.as_ref()).collect();
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].winner.client_ids(), vec![&a]);
    }
}
