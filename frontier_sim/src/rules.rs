// Tunable rule constants.
//
// Every client must use identical values, so these are compile-time
// constants rather than configuration. Changing any of them changes the
// state hash and therefore breaks replays of older records.

use frontier_protocol::UnitType;

/// Game ticks during which players pick their starting position.
pub const SPAWN_PHASE_TICKS: u64 = 30;
/// Ticks per in-game minute (turns arrive every 100 ms).
pub const TICKS_PER_MINUTE: u64 = 600;
/// Chebyshev radius of the starting territory.
pub const SPAWN_RADIUS: u32 = 2;
pub const STARTING_TROOPS: u64 = 1_000;

pub const BASE_TROOP_INCOME: u64 = 10;
/// One extra troop per this many tiles, per tick.
pub const TILES_PER_EXTRA_TROOP: u64 = 4;
pub const BASE_MAX_TROOPS: u64 = 2_000;
pub const MAX_TROOPS_PER_TILE: u64 = 100;
pub const MAX_TROOPS_PER_CITY_LEVEL: u64 = 2_500;
/// Gold per owned tile per tick at a 1.0 gold multiplier.
pub const GOLD_PER_TILE: u64 = 10;

/// Share of troops sent when an attack does not name an amount.
pub const DEFAULT_ATTACK_DIVISOR: u64 = 5;
/// Share donated when a donation does not name an amount.
pub const DEFAULT_DONATION_DIVISOR: u64 = 3;
pub const MAX_CONQUESTS_PER_TICK: usize = 8;
pub const UNCLAIMED_TILE_COST: u64 = 5;
pub const DEFENDED_TILE_BASE_COST: u64 = 10;

/// Percentage of all land a single player must hold to win outright.
pub const WIN_TERRITORY_PERCENT: u64 = 80;

pub const ATOM_BOMB_RADIUS: u32 = 2;
pub const HYDROGEN_BOMB_RADIUS: u32 = 4;

/// Gold price of building one unit of `kind`, before upgrades.
pub fn unit_cost(kind: UnitType) -> u64 {
    match kind {
        UnitType::TransportShip => 0,
        UnitType::Warship => 250_000,
        UnitType::Port => 125_000,
        UnitType::City => 125_000,
        UnitType::DefensePost => 50_000,
        UnitType::MissileSilo => 1_000_000,
        UnitType::SamLauncher => 1_500_000,
        UnitType::AtomBomb => 750_000,
        UnitType::HydrogenBomb => 5_000_000,
        UnitType::Factory => 125_000,
    }
}

/// Price of raising a structure from `level` to `level + 1`.
pub fn upgrade_cost(kind: UnitType, level: u32) -> u64 {
    unit_cost(kind).saturating_mul(u64::from(level))
}
