// Session configuration for the client.
//
// `LobbyConfig` describes one game session (who we are, where the relay is,
// and optionally a pre-known start info or an archived record to replay).
// `RunnerTimings` holds the runner's clock constants; the defaults match the
// browser client, and each can be overridden with a `FRONTIER_*` environment
// variable (milliseconds) for tests and slow machines.

use std::time::Duration;

use frontier_protocol::{ClientId, GameId, GameRecord, GameStartInfo, PlayerCosmetics};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid number")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Everything needed to enter one game.
#[derive(Clone, Debug)]
pub struct LobbyConfig {
    /// `host:port` of the relay. Ignored for local sessions.
    pub server_addr: String,
    pub cosmetics: Option<PlayerCosmetics>,
    pub player_name: String,
    pub client_id: ClientId,
    pub game_id: GameId,
    pub token: String,
    pub turnstile_token: Option<String>,
    /// Known up front only for singleplayer games.
    pub game_start_info: Option<GameStartInfo>,
    /// Present when replaying an archived game; disables live intents.
    pub game_record: Option<GameRecord>,
}

impl LobbyConfig {
    pub fn is_replay(&self) -> bool {
        self.game_record.is_some()
    }

    /// Singleplayer and replay sessions run against an in-process server.
    pub fn is_local(&self) -> bool {
        self.game_start_info.is_some() || self.game_record.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunnerTimings {
    /// Worker heartbeat cadence (one animation frame).
    pub frame_interval: Duration,
    /// Grace period before the watchdog starts, for slow initial loads.
    pub watchdog_delay: Duration,
    pub watchdog_interval: Duration,
    /// Reconnect when no server message arrived for longer than this.
    pub silence_threshold: Duration,
    /// Consecutive failed reconnects before the session is abandoned.
    pub max_reconnect_failures: u32,
}

impl Default for RunnerTimings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            watchdog_delay: Duration::from_secs(20),
            watchdog_interval: Duration::from_secs(1),
            silence_threshold: Duration::from_secs(5),
            max_reconnect_failures: 5,
        }
    }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(0) => Err(ConfigError::Zero(key)),
            Ok(n) => Ok(Some(n)),
            Err(_) => Err(ConfigError::Invalid { key, value }),
        },
    }
}

impl RunnerTimings {
    /// Defaults overridden by whatever `lookup` returns for the
    /// `FRONTIER_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut timings = Self::default();
        let millis = |key| parse_number(&lookup, key).map(|v| v.map(Duration::from_millis));
        if let Some(d) = millis("FRONTIER_FRAME_INTERVAL_MS")? {
            timings.frame_interval = d;
        }
        if let Some(d) = millis("FRONTIER_WATCHDOG_DELAY_MS")? {
            timings.watchdog_delay = d;
        }
        if let Some(d) = millis("FRONTIER_WATCHDOG_INTERVAL_MS")? {
            timings.watchdog_interval = d;
        }
        if let Some(d) = millis("FRONTIER_SILENCE_THRESHOLD_MS")? {
            timings.silence_threshold = d;
        }
        if let Some(n) = parse_number(&lookup, "FRONTIER_MAX_RECONNECT_FAILURES")? {
            timings.max_reconnect_failures = u32::try_from(n).unwrap_or(u32::MAX);
        }
        Ok(timings)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}
