// Host surface: what the embedding application sees of a running session.
//
// The runner and lobby never draw anything. They call into a `HostSurface`
// owned by the embedder (a renderer, the headless binary, or a test
// recorder). All calls may arrive from the runner thread or a transport
// reader thread, so implementations must be `Send + Sync`.

use std::fmt;
use std::time::Duration;

use frontier_protocol::{ClientId, GameId, GameMapSize, GameMapType, GameStartInfo};
use frontier_sim::GameUpdates;

/// A user-facing problem report. Carries the identifiers a player would
/// paste into a bug report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub detail: Option<String>,
    pub game_id: GameId,
    pub client_id: ClientId,
    /// The session has stopped because of this error.
    pub fatal: bool,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (game {}, client {})",
            self.message, self.game_id, self.client_id
        )?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Hash disagreement reported by the relay. Informational only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesyncNotice {
    pub turn: u64,
    pub correct_hash: Option<i64>,
    pub clients_with_correct_hash: u32,
    pub total_active_clients: u32,
    pub your_hash: Option<i64>,
}

/// Per-tick timing that accompanies a view update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickMetrics {
    pub tick_execution_duration: Duration,
    /// Time between the two most recent `turn` messages.
    pub current_tick_delay: Option<Duration>,
}

pub trait HostSurface: Send + Sync {
    fn on_prestart(&self, _game_map: GameMapType, _game_map_size: GameMapSize) {}

    fn on_join(&self, _start_info: &GameStartInfo) {}

    fn show_error(&self, report: &ErrorReport);

    fn on_desync(&self, _notice: &DesyncNotice) {}

    fn on_update(&self, _updates: &GameUpdates, _metrics: TickMetrics) {}
}
