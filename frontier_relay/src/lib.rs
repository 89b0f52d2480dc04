// frontier_relay: the turn sequencer every client of a game talks to.
//
// The relay is a thin broker. It admits players into one lobby, starts the
// game once the expected number of players has joined, batches their intents
// into numbered turns at a fixed cadence and broadcasts each turn to every
// connected client. It never runs the simulation: clients do, and report a
// state hash per turn that the relay compares across clients.
//
// Module overview:
// - `policy.rs`:   `DesyncPolicy`, the rule that picks a verdict from the
//                  hashes reported for one turn, and the default
//                  `MajorityVote`.
// - `session.rs`:  `GameSession`, the roster, turn log, pending intents and
//                  hash reports. The core data structure `server.rs` drives.
// - `server.rs`:   TCP listener, reader threads (one per connection) and the
//                  main event loop, funnelled through an `mpsc` channel into
//                  the single-threaded `GameSession`.
//
// The relay runs as a standalone binary (`main.rs`) or embedded in a test or
// a host process through `start_relay`.

pub mod policy;
pub mod server;
pub mod session;

pub use policy::{DesyncPolicy, DesyncVerdict, MajorityVote};
pub use server::{RelayConfig, RelayHandle, start_relay};
pub use session::{ConnId, GameSession, SessionConfig};
