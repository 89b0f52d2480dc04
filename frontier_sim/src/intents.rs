// Intent execution.
//
// Every intent is checked against the current state before it changes
// anything: the acting player must exist and not be eliminated, targets must
// exist, costs must be affordable, and so on. A failed check rejects only
// that intent (`Rejected` carries a static reason for the debug log); the
// rest of the turn proceeds. Rejection is itself deterministic, so every
// client rejects the same intents.

use frontier_protocol::{
    ClientId, EMOJI_TABLE, EmbargoAction, EmojiRecipient, GameConfigPatch, GameType, Intent,
    UnitType,
};

use crate::map::TileRef;
use crate::rules::{
    ATOM_BOMB_RADIUS, DEFAULT_ATTACK_DIVISOR, DEFAULT_DONATION_DIVISOR, HYDROGEN_BOMB_RADIUS,
    SPAWN_RADIUS, STARTING_TROOPS, unit_cost, upgrade_cost,
};
use crate::state::{Attack, GameState, PlayerState, Unit, gold_multiplier_pct};
use crate::updates::{GameUpdates, MessageKind};

/// Why an intent was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rejected(pub &'static str);

type IntentResult = Result<(), Rejected>;

/// Convert a validated, non-negative wire amount.
fn whole(amount: f64) -> u64 {
    amount as u64
}

impl GameState {
    pub(crate) fn apply_intent(&mut self, intent: &Intent, updates: &mut GameUpdates) -> IntentResult {
        let actor = intent.client_id();
        let player = self.player_ref(actor)?;
        if player.eliminated && !matches!(intent, Intent::MarkDisconnected { .. }) {
            return Err(Rejected("player is eliminated"));
        }
        match intent {
            Intent::Spawn { tile, .. } => self.spawn(actor, *tile, updates),
            Intent::Attack {
                target_id, troops, ..
            } => self.attack(actor, target_id.as_ref(), *troops),
            Intent::CancelAttack { attack_id, .. } => self.cancel_attack(actor, attack_id, updates),
            Intent::Boat { troops, dst, .. } => self.boat(actor, *troops, *dst, updates),
            Intent::CancelBoat { unit_id, .. } => self.cancel_boat(actor, *unit_id, updates),
            Intent::AllianceRequest { recipient, .. } => {
                self.alliance_request(actor, recipient, updates)
            }
            Intent::AllianceRequestReply {
                requestor, accept, ..
            } => self.alliance_reply(actor, requestor, *accept, updates),
            Intent::BreakAlliance { recipient, .. } => {
                self.break_alliance(actor, recipient, updates)
            }
            Intent::AllianceExtension { recipient, .. } => {
                if !self.player_ref(actor)?.allies.contains(recipient) {
                    return Err(Rejected("not allied"));
                }
                updates.message(
                    MessageKind::Alliance,
                    Some(actor),
                    Some(recipient),
                    "alliance extended",
                );
                Ok(())
            }
            Intent::TargetPlayer { target, .. } => {
                self.require_other(actor, target)?;
                self.player_mut(actor)?.target = Some(target.clone());
                Ok(())
            }
            Intent::Emoji {
                recipient, emoji, ..
            } => self.emoji(actor, recipient, *emoji, updates),
            Intent::QuickChat {
                recipient,
                quick_chat_key,
                target,
                ..
            } => {
                self.require_other(actor, recipient)?;
                let text = match target {
                    Some(target) => format!("{quick_chat_key} {target}"),
                    None => quick_chat_key.clone(),
                };
                updates.message(MessageKind::QuickChat, Some(actor), Some(recipient), text);
                Ok(())
            }
            Intent::DonateGold {
                recipient, gold, ..
            } => self.donate_gold(actor, recipient, *gold),
            Intent::DonateTroops {
                recipient, troops, ..
            } => self.donate_troops(actor, recipient, *troops),
            Intent::BuildUnit { unit, tile, .. } => self.build_unit(actor, *unit, *tile, updates),
            Intent::UpgradeStructure { unit, unit_id, .. } => {
                self.upgrade_structure(actor, *unit, *unit_id, updates)
            }
            Intent::DeleteUnit { unit_id, .. } => self.delete_unit(actor, *unit_id, updates),
            Intent::MoveWarship { unit_id, tile, .. } => {
                self.move_warship(actor, *unit_id, *tile, updates)
            }
            Intent::Embargo {
                target_id, action, ..
            } => {
                self.require_other(actor, target_id)?;
                let embargoes = &mut self.player_mut(actor)?.embargoes;
                match action {
                    EmbargoAction::Start => embargoes.insert(target_id.clone()),
                    EmbargoAction::Stop => embargoes.remove(target_id),
                };
                Ok(())
            }
            Intent::EmbargoAll { action, .. } => {
                let others: Vec<ClientId> =
                    self.players.keys().filter(|id| *id != actor).cloned().collect();
                let embargoes = &mut self.player_mut(actor)?.embargoes;
                match action {
                    EmbargoAction::Start => embargoes.extend(others),
                    EmbargoAction::Stop => embargoes.clear(),
                }
                Ok(())
            }
            Intent::KickPlayer { target, .. } => self.kick_player(actor, target, updates),
            Intent::TogglePause { paused, .. } => {
                let singleplayer = self.config.game_type == GameType::Singleplayer;
                if !singleplayer && self.lobby_creator.as_ref() != Some(actor) {
                    return Err(Rejected("only the lobby creator can pause"));
                }
                self.paused = *paused;
                Ok(())
            }
            Intent::UpdateGameConfig { config, .. } => self.update_game_config(actor, config),
            Intent::MarkDisconnected {
                is_disconnected, ..
            } => {
                self.player_mut(actor)?.disconnected = *is_disconnected;
                Ok(())
            }
        }
    }

    fn player_ref(&self, id: &ClientId) -> Result<&PlayerState, Rejected> {
        self.players.get(id).ok_or(Rejected("unknown player"))
    }

    fn player_mut(&mut self, id: &ClientId) -> Result<&mut PlayerState, Rejected> {
        self.players.get_mut(id).ok_or(Rejected("unknown player"))
    }

    /// `other` exists, is not `actor`, and has not been eliminated.
    fn require_other(&self, actor: &ClientId, other: &ClientId) -> IntentResult {
        if actor == other {
            return Err(Rejected("cannot target yourself"));
        }
        if self.player_ref(other)?.eliminated {
            return Err(Rejected("target is eliminated"));
        }
        Ok(())
    }

    fn charge(&mut self, actor: &ClientId, cost: u64) -> IntentResult {
        if self.config.infinite_gold {
            return Ok(());
        }
        let player = self.player_mut(actor)?;
        if player.gold < cost {
            return Err(Rejected("not enough gold"));
        }
        player.gold -= cost;
        Ok(())
    }

    fn spawn(&mut self, actor: &ClientId, tile: TileRef, updates: &mut GameUpdates) -> IntentResult {
        if !self.in_spawn_phase() {
            return Err(Rejected("spawn phase is over"));
        }
        if !self.map.is_land(tile) {
            return Err(Rejected("spawn tile is not land"));
        }
        if self.owner(tile).is_some_and(|owner| owner != actor) {
            return Err(Rejected("spawn tile is taken"));
        }
        let first_spawn = !self.player_ref(actor)?.spawned;
        self.release_all_tiles(actor, updates);
        for t in self.map.tiles_within(tile, SPAWN_RADIUS) {
            if self.map.is_land(t) && self.owner(t).is_none() {
                self.set_owner(t, Some(actor), updates);
            }
        }
        let player = self.player_mut(actor)?;
        player.spawned = true;
        if first_spawn {
            player.troops = STARTING_TROOPS;
        }
        Ok(())
    }

    /// Shared checks for land and sea attacks against `target`.
    fn check_attackable(&self, actor: &ClientId, target: Option<&ClientId>) -> IntentResult {
        if self.in_spawn_phase() {
            return Err(Rejected("no attacks during the spawn phase"));
        }
        let attacker = self.player_ref(actor)?;
        if !attacker.is_alive() {
            return Err(Rejected("attacker holds no territory"));
        }
        if let Some(target) = target {
            self.require_other(actor, target)?;
            if attacker.allies.contains(target) {
                return Err(Rejected("cannot attack an ally"));
            }
            if self.in_spawn_immunity() {
                return Err(Rejected("target has spawn immunity"));
            }
        }
        Ok(())
    }

    fn attack(&mut self, actor: &ClientId, target: Option<&ClientId>, troops: Option<f64>) -> IntentResult {
        self.check_attackable(actor, target)?;
        let available = self.player_ref(actor)?.troops;
        let amount = troops
            .map(whole)
            .unwrap_or(available / DEFAULT_ATTACK_DIVISOR)
            .min(available);
        if amount == 0 {
            return Err(Rejected("no troops to send"));
        }
        let player = self.player_mut(actor)?;
        player.troops -= amount;
        player.stats.attacks += 1;
        let id = self.allocate_id();
        self.attacks.insert(
            id,
            Attack {
                id,
                attacker: actor.clone(),
                target: target.cloned(),
                troops: amount,
                beachhead: None,
                transport: None,
            },
        );
        Ok(())
    }

    fn cancel_attack(&mut self, actor: &ClientId, attack_id: &str, updates: &mut GameUpdates) -> IntentResult {
        let id: u32 = attack_id.parse().map_err(|_| Rejected("unknown attack"))?;
        match self.attacks.get(&id) {
            Some(attack) if &attack.attacker == actor && attack.transport.is_none() => {
                self.end_attack(id, updates);
                Ok(())
            }
            _ => Err(Rejected("unknown attack")),
        }
    }

    fn boat(&mut self, actor: &ClientId, troops: f64, dst: TileRef, updates: &mut GameUpdates) -> IntentResult {
        if !self.map.is_land(dst) {
            return Err(Rejected("boats must land on land"));
        }
        let target = self.owner(dst).cloned();
        if target.as_ref() == Some(actor) {
            return Err(Rejected("destination is already ours"));
        }
        self.check_attackable(actor, target.as_ref())?;
        let Some(launch) = self
            .owned_tiles(actor)
            .into_iter()
            .find(|t| self.map.is_shore(*t))
        else {
            return Err(Rejected("no coastline to launch from"));
        };
        let amount = whole(troops).min(self.player_ref(actor)?.troops);
        if amount == 0 {
            return Err(Rejected("no troops to send"));
        }
        let player = self.player_mut(actor)?;
        player.troops -= amount;
        player.stats.boats += 1;

        let unit_id = self.allocate_id();
        let unit = Unit {
            id: unit_id,
            owner: actor.clone(),
            kind: UnitType::TransportShip,
            tile: launch,
            level: 1,
        };
        self.push_unit_update(&unit, false, updates);
        self.units.insert(unit_id, unit);

        let attack_id = self.allocate_id();
        self.attacks.insert(
            attack_id,
            Attack {
                id: attack_id,
                attacker: actor.clone(),
                target,
                troops: amount,
                beachhead: Some(dst),
                transport: Some(unit_id),
            },
        );
        Ok(())
    }

    fn cancel_boat(&mut self, actor: &ClientId, unit_id: u32, updates: &mut GameUpdates) -> IntentResult {
        let attack_id = self
            .attacks
            .values()
            .find(|a| a.transport == Some(unit_id) && &a.attacker == actor)
            .map(|a| a.id)
            .ok_or(Rejected("no such boat"))?;
        self.end_attack(attack_id, updates);
        Ok(())
    }

    fn form_alliance(&mut self, a: &ClientId, b: &ClientId, updates: &mut GameUpdates) {
        if let Some(p) = self.players.get_mut(a) {
            p.allies.insert(b.clone());
        }
        if let Some(p) = self.players.get_mut(b) {
            p.allies.insert(a.clone());
        }
        let hostile: Vec<u32> = self
            .attacks
            .values()
            .filter(|x| {
                (&x.attacker == a && x.target.as_ref() == Some(b))
                    || (&x.attacker == b && x.target.as_ref() == Some(a))
            })
            .map(|x| x.id)
            .collect();
        for id in hostile {
            self.end_attack(id, updates);
        }
        updates.message(MessageKind::Alliance, Some(a), Some(b), "alliance formed");
    }

    fn alliance_request(&mut self, actor: &ClientId, recipient: &ClientId, updates: &mut GameUpdates) -> IntentResult {
        self.require_other(actor, recipient)?;
        if self.player_ref(actor)?.allies.contains(recipient) {
            return Err(Rejected("already allied"));
        }
        if self
            .alliance_requests
            .remove(&(recipient.clone(), actor.clone()))
        {
            self.form_alliance(actor, recipient, updates);
            return Ok(());
        }
        if !self
            .alliance_requests
            .insert((actor.clone(), recipient.clone()))
        {
            return Err(Rejected("request already pending"));
        }
        updates.message(
            MessageKind::Alliance,
            Some(actor),
            Some(recipient),
            "alliance requested",
        );
        Ok(())
    }

    fn alliance_reply(
        &mut self,
        actor: &ClientId,
        requestor: &ClientId,
        accept: bool,
        updates: &mut GameUpdates,
    ) -> IntentResult {
        if !self
            .alliance_requests
            .remove(&(requestor.clone(), actor.clone()))
        {
            return Err(Rejected("no pending request"));
        }
        if accept {
            self.form_alliance(requestor, actor, updates);
        } else {
            updates.message(
                MessageKind::Alliance,
                Some(actor),
                Some(requestor),
                "alliance rejected",
            );
        }
        Ok(())
    }

    fn break_alliance(&mut self, actor: &ClientId, recipient: &ClientId, updates: &mut GameUpdates) -> IntentResult {
        let player = self.player_mut(actor)?;
        if !player.allies.remove(recipient) {
            return Err(Rejected("not allied"));
        }
        player.stats.betrayals += 1;
        if let Some(other) = self.players.get_mut(recipient) {
            other.allies.remove(actor);
        }
        updates.message(
            MessageKind::Alliance,
            Some(actor),
            Some(recipient),
            "alliance broken",
        );
        Ok(())
    }

    fn emoji(
        &mut self,
        actor: &ClientId,
        recipient: &EmojiRecipient,
        emoji: u32,
        updates: &mut GameUpdates,
    ) -> IntentResult {
        let glyph = EMOJI_TABLE
            .get(emoji as usize)
            .ok_or(Rejected("unknown emoji"))?;
        let to = match recipient {
            EmojiRecipient::AllPlayers => None,
            EmojiRecipient::Player(id) => {
                self.require_other(actor, id)?;
                Some(id)
            }
        };
        updates.message(MessageKind::Emoji, Some(actor), to, *glyph);
        Ok(())
    }

    fn require_ally(&self, actor: &ClientId, recipient: &ClientId) -> IntentResult {
        self.require_other(actor, recipient)?;
        if self.player_ref(actor)?.allies.contains(recipient) {
            Ok(())
        } else {
            Err(Rejected("donations go to allies only"))
        }
    }

    fn donate_gold(&mut self, actor: &ClientId, recipient: &ClientId, gold: Option<f64>) -> IntentResult {
        if !self.config.donate_gold {
            return Err(Rejected("gold donations are disabled"));
        }
        self.require_ally(actor, recipient)?;
        let available = self.player_ref(actor)?.gold;
        let amount = gold
            .map(whole)
            .unwrap_or(available / DEFAULT_DONATION_DIVISOR)
            .min(available);
        if amount == 0 {
            return Err(Rejected("nothing to donate"));
        }
        let donor = self.player_mut(actor)?;
        donor.gold -= amount;
        donor.stats.gold_donated += amount;
        self.player_mut(recipient)?.gold += amount;
        Ok(())
    }

    fn donate_troops(&mut self, actor: &ClientId, recipient: &ClientId, troops: Option<f64>) -> IntentResult {
        if !self.config.donate_troops {
            return Err(Rejected("troop donations are disabled"));
        }
        self.require_ally(actor, recipient)?;
        let available = self.player_ref(actor)?.troops;
        let amount = troops
            .map(whole)
            .unwrap_or(available / DEFAULT_DONATION_DIVISOR)
            .min(available);
        if amount == 0 {
            return Err(Rejected("nothing to donate"));
        }
        let donor = self.player_mut(actor)?;
        donor.troops -= amount;
        donor.stats.troops_donated += amount;
        self.player_mut(recipient)?.troops += amount;
        Ok(())
    }

    fn owns_unit_kind(&self, actor: &ClientId, kind: UnitType) -> bool {
        self.units
            .values()
            .any(|u| &u.owner == actor && u.kind == kind)
    }

    fn build_unit(&mut self, actor: &ClientId, kind: UnitType, tile: TileRef, updates: &mut GameUpdates) -> IntentResult {
        if self.config.is_unit_disabled(kind) {
            return Err(Rejected("unit type is disabled"));
        }
        if !self.map.in_bounds(tile) {
            return Err(Rejected("tile out of bounds"));
        }
        match kind {
            UnitType::TransportShip => Err(Rejected("transports launch with boat attacks")),
            UnitType::AtomBomb | UnitType::HydrogenBomb => {
                if self.in_spawn_immunity() {
                    return Err(Rejected("no bombs during spawn immunity"));
                }
                if !self.owns_unit_kind(actor, UnitType::MissileSilo) {
                    return Err(Rejected("bombs need a missile silo"));
                }
                self.charge(actor, unit_cost(kind))?;
                let radius = if kind == UnitType::AtomBomb {
                    ATOM_BOMB_RADIUS
                } else {
                    HYDROGEN_BOMB_RADIUS
                };
                self.detonate(tile, radius, updates);
                self.player_mut(actor)?.stats.units_built += 1;
                Ok(())
            }
            _ => {
                if self.owner(tile) != Some(actor) {
                    return Err(Rejected("can only build on own territory"));
                }
                if kind == UnitType::Warship {
                    if !self.map.is_shore(tile) {
                        return Err(Rejected("warships need a shore tile"));
                    }
                    if !self.owns_unit_kind(actor, UnitType::Port) {
                        return Err(Rejected("warships need a port"));
                    }
                } else if self
                    .units
                    .values()
                    .any(|u| u.tile == tile && u.kind.is_structure())
                {
                    return Err(Rejected("tile already has a structure"));
                }
                self.charge(actor, unit_cost(kind))?;
                let id = self.allocate_id();
                let unit = Unit {
                    id,
                    owner: actor.clone(),
                    kind,
                    tile,
                    level: 1,
                };
                self.push_unit_update(&unit, false, updates);
                self.units.insert(id, unit);
                self.player_mut(actor)?.stats.units_built += 1;
                Ok(())
            }
        }
    }

    fn detonate(&mut self, center: TileRef, radius: u32, updates: &mut GameUpdates) {
        let blast = self.map.tiles_within(center, radius);
        for tile in &blast {
            self.set_owner(*tile, None, updates);
        }
        let destroyed: Vec<u32> = self
            .units
            .values()
            .filter(|u| u.kind != UnitType::TransportShip && blast.contains(&u.tile))
            .map(|u| u.id)
            .collect();
        for id in destroyed {
            self.remove_unit(id, updates);
        }
        updates.message(MessageKind::Combat, None, None, "nuclear detonation");
    }

    fn upgrade_structure(
        &mut self,
        actor: &ClientId,
        kind: UnitType,
        unit_id: u32,
        updates: &mut GameUpdates,
    ) -> IntentResult {
        let level = match self.units.get(&unit_id) {
            Some(u) if &u.owner == actor && u.kind == kind && kind.is_structure() => u.level,
            _ => return Err(Rejected("no such structure")),
        };
        self.charge(actor, upgrade_cost(kind, level))?;
        if let Some(unit) = self.units.get_mut(&unit_id) {
            unit.level += 1;
        }
        if let Some(unit) = self.units.get(&unit_id) {
            self.push_unit_update(unit, false, updates);
        }
        Ok(())
    }

    fn delete_unit(&mut self, actor: &ClientId, unit_id: u32, updates: &mut GameUpdates) -> IntentResult {
        match self.units.get(&unit_id) {
            Some(u) if &u.owner == actor => {}
            _ => return Err(Rejected("no such unit")),
        }
        let carrying = self
            .attacks
            .values()
            .find(|a| a.transport == Some(unit_id))
            .map(|a| a.id);
        match carrying {
            Some(attack_id) => self.end_attack(attack_id, updates),
            None => self.remove_unit(unit_id, updates),
        }
        Ok(())
    }

    fn move_warship(&mut self, actor: &ClientId, unit_id: u32, tile: TileRef, updates: &mut GameUpdates) -> IntentResult {
        if !self.map.in_bounds(tile) || self.map.is_land(tile) {
            return Err(Rejected("warships move on water"));
        }
        match self.units.get_mut(&unit_id) {
            Some(u) if &u.owner == actor && u.kind == UnitType::Warship => u.tile = tile,
            _ => return Err(Rejected("no such warship")),
        }
        if let Some(unit) = self.units.get(&unit_id) {
            self.push_unit_update(unit, false, updates);
        }
        Ok(())
    }

    /// Remove a player from play: territory released, attacks and units
    /// gone.
    pub(crate) fn eliminate(&mut self, id: &ClientId, updates: &mut GameUpdates) {
        self.release_all_tiles(id, updates);
        if let Some(p) = self.players.get_mut(id) {
            p.eliminated = true;
            p.troops = 0;
        }
        let involved: Vec<u32> = self
            .attacks
            .values()
            .filter(|a| &a.attacker == id || a.target.as_ref() == Some(id))
            .map(|a| a.id)
            .collect();
        for attack_id in involved {
            self.end_attack(attack_id, updates);
        }
        let owned: Vec<u32> = self
            .units
            .values()
            .filter(|u| &u.owner == id)
            .map(|u| u.id)
            .collect();
        for unit_id in owned {
            self.remove_unit(unit_id, updates);
        }
        self.alliance_requests
            .retain(|(from, to)| from != id && to != id);
    }

    fn kick_player(&mut self, actor: &ClientId, target: &ClientId, updates: &mut GameUpdates) -> IntentResult {
        if self.lobby_creator.as_ref() != Some(actor) {
            return Err(Rejected("only the lobby creator can kick"));
        }
        self.require_other(actor, target)?;
        self.eliminate(target, updates);
        updates.message(MessageKind::Elimination, Some(actor), Some(target), "kicked");
        Ok(())
    }

    fn update_game_config(&mut self, actor: &ClientId, patch: &GameConfigPatch) -> IntentResult {
        if self.lobby_creator.as_ref() != Some(actor) {
            return Err(Rejected("only the lobby creator can change settings"));
        }
        if !self.in_spawn_phase() {
            return Err(Rejected("settings are locked after the spawn phase"));
        }
        let map_changes = patch
            .game_map
            .is_some_and(|m| m != self.config.game_map)
            || patch
                .game_map_size
                .is_some_and(|s| s != self.config.game_map_size);
        if map_changes {
            return Err(Rejected("the map is fixed once generated"));
        }
        self.config.apply_patch(patch);
        self.gold_multiplier_pct = gold_multiplier_pct(&self.config);
        Ok(())
    }
}
