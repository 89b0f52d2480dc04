// frontier_sim: the deterministic game simulation.
//
// Given the same `GameStartInfo` and the same sequence of turns, every
// client computes the same game, tick for tick. The multiplayer protocol
// relies on this: only intents cross the network, and each client reports a
// hash of its state so the relay can detect divergence.
//
// Module overview:
// - `state.rs`:   `GameState`, the turn entry point `execute_turn`, and the
//                 state hash.
// - `intents.rs`: Validation and execution of each `Intent` variant.
// - `systems.rs`: Per-tick systems: income, attacks, eliminations, victory.
// - `map.rs`:     Procedural terrain (`TerrainMap`) and tile addressing.
// - `rules.rs`:   Rule constants (costs, caps, phase lengths).
// - `updates.rs`: `GameUpdates`, the per-tick output handed to views.
// - `error.rs`:   `SimError`.
//
// The crate has no threads, clocks or I/O. The client's worker thread owns a
// `GameState` and feeds it turns; tests and replays drive it directly.
//
// **Critical constraint: determinism.** No `HashMap`, no floating point in
// state, no system time. Use `BTreeMap` for ordered collections.

mod error;
mod intents;
pub mod map;
pub mod rules;
mod state;
mod systems;
pub mod updates;

pub use error::SimError;
pub use map::{TerrainMap, TileRef};
pub use state::{Attack, GameState, PlayerState, Unit};
pub use updates::{
    DisplayMessage, GameUpdates, HashUpdate, MessageKind, PlayerUpdate, TileUpdate, UnitUpdate,
    WinUpdate,
};
