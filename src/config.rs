//! Server Configuration
//!
//! Gameplay constants and network settings, loaded once at startup from an
//! optional JSON file and then overridden by command line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest grid dimension expressible in a DrawTile command.
pub const MAX_GRID_DIMENSION: usize = 255;

/// Configuration errors. Always fatal: they indicate an operator mistake.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("invalid configuration file {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of its allowed range.
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

// =============================================================================
// GAME CONFIG
// =============================================================================

/// Gameplay constants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Map height in cells.
    pub rows: usize,
    /// Map width in cells.
    pub columns: usize,
    /// Player slots on the server.
    pub max_players: usize,
    /// Longest accepted player name, in bytes.
    pub player_name_max_len: usize,
    /// Simulation tick period in milliseconds.
    pub tick_period_ms: u64,
    /// Ticks between a bomb drop and its first visible flame.
    pub bomb_fuse_ticks: u32,
    /// Extra flame delay per cell of distance from the bomb.
    pub propagation_delay_ticks: u32,
    /// Ticks a flame stays visible.
    pub explosion_display_ticks: u32,
    /// Chance (percent) that an empty map cell becomes a destructible obstacle.
    pub obstacle_probability: u8,
    /// Chance (percent) that a destroyed obstacle drops something.
    pub item_probability: u8,
    /// Ticks of invulnerability granted by a shield item.
    pub shield_duration_ticks: u32,
    /// Explosion range every player starts a round with.
    pub base_explosion_range: u32,
    /// Smallest range of a bomb spawned from an obstacle.
    pub environmental_bomb_range_min: u32,
    /// Largest range of a bomb spawned from an obstacle.
    pub environmental_bomb_range_max: u32,
    /// Pause between two rounds in milliseconds.
    pub round_pause_ms: u64,
    /// Poll interval of the waiting room in milliseconds.
    pub wait_poll_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rows: 15,
            columns: 20,
            max_players: 4,
            player_name_max_len: 63,
            tick_period_ms: 50,
            bomb_fuse_ticks: 60,
            propagation_delay_ticks: 2,
            explosion_display_ticks: 10,
            obstacle_probability: 35,
            item_probability: 30,
            shield_duration_ticks: 100,
            base_explosion_range: 2,
            environmental_bomb_range_min: 2,
            environmental_bomb_range_max: 4,
            round_pause_ms: 3000,
            wait_poll_ms: 100,
        }
    }
}

impl GameConfig {
    /// Tick period as a duration.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Pause between rounds as a duration.
    pub fn round_pause(&self) -> Duration {
        Duration::from_millis(self.round_pause_ms)
    }

    /// Waiting room poll interval as a duration.
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// Bomb timings used by the explosion resolver.
    pub fn explosion_timing(&self) -> ExplosionTiming {
        ExplosionTiming {
            fuse_ticks: self.bomb_fuse_ticks,
            propagation_delay_ticks: self.propagation_delay_ticks,
            display_ticks: self.explosion_display_ticks,
        }
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 || self.rows > MAX_GRID_DIMENSION {
            return Err(invalid(
                "rows",
                format!("{} is not in 1..={}", self.rows, MAX_GRID_DIMENSION),
            ));
        }
        if self.columns == 0 || self.columns > MAX_GRID_DIMENSION {
            return Err(invalid(
                "columns",
                format!("{} is not in 1..={}", self.columns, MAX_GRID_DIMENSION),
            ));
        }
        if !(2..=255).contains(&self.max_players) {
            return Err(invalid("max_players", format!("{} is not in 2..=255", self.max_players)));
        }
        if self.player_name_max_len == 0 {
            return Err(invalid("player_name_max_len", "must be at least 1".to_string()));
        }
        if self.tick_period_ms == 0 {
            return Err(invalid("tick_period_ms", "must be at least 1".to_string()));
        }
        if self.obstacle_probability > 100 {
            return Err(invalid(
                "obstacle_probability",
                format!("{} is over 100", self.obstacle_probability),
            ));
        }
        if self.item_probability > 100 {
            return Err(invalid(
                "item_probability",
                format!("{} is over 100", self.item_probability),
            ));
        }
        if self.base_explosion_range < 1 {
            return Err(invalid("base_explosion_range", "must be at least 1".to_string()));
        }
        if self.environmental_bomb_range_min < 1
            || self.environmental_bomb_range_min > self.environmental_bomb_range_max
        {
            return Err(invalid(
                "environmental_bomb_range_min",
                format!(
                    "range {}..={} is empty or starts below 1",
                    self.environmental_bomb_range_min, self.environmental_bomb_range_max
                ),
            ));
        }
        Ok(())
    }
}

/// Bomb and flame timings, in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExplosionTiming {
    /// Ticks before the centre flame appears.
    pub fuse_ticks: u32,
    /// Extra ticks per cell of distance.
    pub propagation_delay_ticks: u32,
    /// Ticks a flame stays on screen.
    pub display_ticks: u32,
}

// =============================================================================
// SERVER CONFIG
// =============================================================================

/// Network settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address for the binary protocol.
    pub bind_addr: String,
    /// Optional WebSocket listen address (binary frames).
    pub ws_bind_addr: Option<String>,
    /// Directory scanned for `*.map` files.
    pub maps_dir: PathBuf,
    /// Play this single map instead of picking one at random.
    pub map_file: Option<PathBuf>,
    /// Inbound events buffered per connection before the reader waits.
    pub inbound_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            ws_bind_addr: None,
            maps_dir: PathBuf::from("maps"),
            map_file: None,
            inbound_queue_capacity: 32,
        }
    }
}

impl ServerConfig {
    /// Check the network settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_queue_capacity == 0 {
            return Err(invalid("inbound_queue_capacity", "must be at least 1".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// CONFIG FILE
// =============================================================================

/// Complete configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gameplay constants.
    pub game: GameConfig,
    /// Network settings.
    pub server: ServerConfig,
}

impl Config {
    /// Load a configuration file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Validate both sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.game.validate()?;
        self.server.validate()
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
