// Game configuration carried in `GameStartInfo` and `update_game_config`.
//
// `GameConfig` is frozen once the game starts; the only runtime change is an
// `update_game_config` intent from the lobby creator, which carries a
// `GameConfigPatch` (every field optional) that the simulation merges in.
//
// Numeric bounds are part of the contract and are enforced by `Validate`:
//   bots 0..=400, maxTimerValue 1..=120 (minutes), goldMultiplier
//   0.1..=1000, startingGold 0..=1e9. spawnImmunityDuration is a tick count
//   and therefore unsigned.
//
// Enum values serialize to the exact display strings used on the wire
// ("Free For All", "North America", "Defense Post", ...).

use serde::{Deserialize, Serialize};

use crate::validate::{SchemaError, Validate, check_non_negative, check_range_f64, check_range_u32};

pub const MAX_BOTS: u32 = 400;
pub const MAX_TIMER_MINUTES: u32 = 120;
pub const MIN_GOLD_MULTIPLIER: f64 = 0.1;
pub const MAX_GOLD_MULTIPLIER: f64 = 1000.0;
pub const MAX_STARTING_GOLD: f64 = 1_000_000_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GameMapType {
    World,
    Europe,
    Asia,
    Africa,
    #[serde(rename = "North America")]
    NorthAmerica,
    #[serde(rename = "South America")]
    SouthAmerica,
    Oceania,
    Mars,
    Britannia,
    Iceland,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMapSize {
    Normal,
    Compact,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Impossible,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    Singleplayer,
    Public,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "Free For All")]
    FreeForAll,
    Team,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RankedType {
    #[serde(rename = "1v1")]
    OneVsOne,
}

/// Buildable and spawned unit kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitType {
    #[serde(rename = "Transport")]
    TransportShip,
    Warship,
    Port,
    City,
    #[serde(rename = "Defense Post")]
    DefensePost,
    #[serde(rename = "Missile Silo")]
    MissileSilo,
    #[serde(rename = "SAM Launcher")]
    SamLauncher,
    #[serde(rename = "Atom Bomb")]
    AtomBomb,
    #[serde(rename = "Hydrogen Bomb")]
    HydrogenBomb,
    Factory,
}

impl UnitType {
    /// Structures can be upgraded in place; mobile units and bombs cannot.
    pub fn is_structure(self) -> bool {
        matches!(
            self,
            Self::Port
                | Self::City
                | Self::DefensePost
                | Self::MissileSilo
                | Self::SamLauncher
                | Self::Factory
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamPreset {
    Duos,
    Trios,
    Quads,
    #[serde(rename = "Humans Vs Nations")]
    HumansVsNations,
}

/// Team layout: a team count or a named preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerTeams {
    Count(u32),
    Preset(TeamPreset),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublicGameModifiers {
    pub is_compact: bool,
    pub is_random_spawn: bool,
    pub is_crowded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_gold: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameConfig {
    pub game_map: GameMapType,
    pub difficulty: Difficulty,
    pub donate_gold: bool,
    pub donate_troops: bool,
    pub game_type: GameType,
    pub game_mode: GameMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranked_type: Option<RankedType>,
    pub game_map_size: GameMapSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_game_modifiers: Option<PublicGameModifiers>,
    pub disable_nations: bool,
    pub bots: u32,
    pub infinite_gold: bool,
    pub infinite_troops: bool,
    pub instant_build: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_nav_mesh: Option<bool>,
    pub random_spawn: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
    /// Game length limit in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timer_value: Option<u32>,
    /// Ticks after the spawn phase during which players cannot be attacked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_immunity_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_units: Option<Vec<UnitType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_teams: Option<PlayerTeams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_gold: Option<f64>,
}

impl Default for GameConfig {
    /// A small private free-for-all on the world map with no bots.
    fn default() -> Self {
        Self {
            game_map: GameMapType::World,
            difficulty: Difficulty::Medium,
            donate_gold: true,
            donate_troops: true,
            game_type: GameType::Private,
            game_mode: GameMode::FreeForAll,
            ranked_type: None,
            game_map_size: GameMapSize::Compact,
            public_game_modifiers: None,
            disable_nations: true,
            bots: 0,
            infinite_gold: false,
            infinite_troops: false,
            instant_build: false,
            disable_nav_mesh: None,
            random_spawn: false,
            max_players: None,
            max_timer_value: None,
            spawn_immunity_duration: None,
            disabled_units: None,
            player_teams: None,
            gold_multiplier: None,
            starting_gold: None,
        }
    }
}

impl GameConfig {
    pub fn is_unit_disabled(&self, unit: UnitType) -> bool {
        self.disabled_units
            .as_ref()
            .is_some_and(|units| units.contains(&unit))
    }

    /// Merge the fields present in `patch` into this config.
    pub fn apply_patch(&mut self, patch: &GameConfigPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    self.$field = value;
                })*
            };
        }
        merge!(
            game_map,
            difficulty,
            donate_gold,
            donate_troops,
            game_mode,
            game_map_size,
            disable_nations,
            bots,
            infinite_gold,
            infinite_troops,
            instant_build,
            random_spawn,
        );
        macro_rules! merge_optional {
            ($($field:ident),* $(,)?) => {
                $(if patch.$field.is_some() {
                    self.$field = patch.$field;
                })*
            };
        }
        merge_optional!(
            max_players,
            max_timer_value,
            spawn_immunity_duration,
            player_teams,
            gold_multiplier,
            starting_gold,
        );
        if let Some(units) = &patch.disabled_units {
            self.disabled_units = Some(units.clone());
        }
    }
}

/// Partial `GameConfig` carried by `update_game_config`. Only settings that
/// may change in the lobby are present; anything else is an unknown field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GameConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_map: Option<GameMapType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donate_gold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donate_troops: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<GameMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_map_size: Option<GameMapSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_nations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bots: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infinite_gold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infinite_troops: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instant_build: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_spawn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timer_value: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_immunity_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_units: Option<Vec<UnitType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_teams: Option<PlayerTeams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_gold: Option<f64>,
}

fn check_bounds(
    bots: Option<u32>,
    max_timer_value: Option<u32>,
    gold_multiplier: Option<f64>,
    starting_gold: Option<f64>,
) -> Result<(), SchemaError> {
    if let Some(bots) = bots {
        check_range_u32("config.bots", bots, 0, MAX_BOTS)?;
    }
    if let Some(minutes) = max_timer_value {
        check_range_u32("config.maxTimerValue", minutes, 1, MAX_TIMER_MINUTES)?;
    }
    if let Some(mult) = gold_multiplier {
        check_range_f64(
            "config.goldMultiplier",
            mult,
            MIN_GOLD_MULTIPLIER,
            MAX_GOLD_MULTIPLIER,
        )?;
    }
    if let Some(gold) = starting_gold {
        check_range_f64("config.startingGold", gold, 0.0, MAX_STARTING_GOLD)?;
    }
    Ok(())
}

impl Validate for GameConfig {
    fn validate(&self) -> Result<(), SchemaError> {
        check_bounds(
            Some(self.bots),
            self.max_timer_value,
            self.gold_multiplier,
            self.starting_gold,
        )?;
        if let Some(gold) = self
            .public_game_modifiers
            .as_ref()
            .and_then(|m| m.starting_gold)
        {
            check_non_negative("config.publicGameModifiers.startingGold", gold)?;
        }
        Ok(())
    }
}

impl Validate for GameConfigPatch {
    fn validate(&self) -> Result<(), SchemaError> {
        check_bounds(
            self.bots,
            self.max_timer_value,
            self.gold_multiplier,
            self.starting_gold,
        )
    }
}
