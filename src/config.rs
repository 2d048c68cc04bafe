//! Server configuration consumed by the state layer.
//!
//! Loading this from a file or the command line is the embedding server's job;
//! everything here is deserialisable and has working defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Periodic sweep timing
    pub schedules: SweepSchedules,

    /// Idle/inactive/retention thresholds, in minutes
    pub thresholds: Thresholds,

    /// Capacity limits enforced by the dispatch layer
    pub limits: CapacityLimits,
}

/// When a periodic sweep first runs and how often it repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSchedule {
    pub period_secs: u64,
    pub delay_secs: u64,
}

impl SweepSchedule {
    pub const fn new(period_secs: u64, delay_secs: u64) -> Self {
        Self {
            period_secs,
            delay_secs,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// One schedule per sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSchedules {
    pub idle_websocket_check: SweepSchedule,
    pub idle_player_check: SweepSchedule,
    pub idle_game_check: SweepSchedule,
    pub obsolete_game_check: SweepSchedule,
}

impl Default for SweepSchedules {
    fn default() -> Self {
        Self {
            idle_websocket_check: SweepSchedule::new(120, 300),
            idle_player_check: SweepSchedule::new(120, 300),
            idle_game_check: SweepSchedule::new(120, 300),
            obsolete_game_check: SweepSchedule::new(300, 300),
        }
    }
}

/// Activity thresholds in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub websocket_idle_thresh_min: i64,
    pub websocket_inactive_thresh_min: i64,
    pub player_idle_thresh_min: i64,
    pub player_inactive_thresh_min: i64,
    pub game_idle_thresh_min: i64,
    pub game_inactive_thresh_min: i64,
    /// How long a completed or cancelled game is kept before deletion (2 days)
    pub game_retention_thresh_min: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            websocket_idle_thresh_min: 2,
            websocket_inactive_thresh_min: 5,
            player_idle_thresh_min: 15,
            player_inactive_thresh_min: 30,
            game_idle_thresh_min: 10,
            game_inactive_thresh_min: 20,
            game_retention_thresh_min: 2880,
        }
    }
}

/// Capacity limits. The state manager itself never enforces these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityLimits {
    pub websocket_limit: usize,
    pub registered_player_limit: usize,
    pub total_game_limit: usize,
    pub in_progress_game_limit: usize,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            websocket_limit: 1000,
            registered_player_limit: 1000,
            total_game_limit: 1000,
            in_progress_game_limit: 25,
        }
    }
}

/// Configuration rejected by [`ServerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} idle threshold ({idle} min) must be below its inactive threshold ({inactive} min)")]
    ThresholdOrder {
        name: &'static str,
        idle: i64,
        inactive: i64,
    },

    #[error("{0} threshold must be positive")]
    NonPositiveThreshold(&'static str),

    #[error("{0} sweep period must be positive")]
    ZeroPeriod(&'static str),
}

impl ServerConfig {
    /// Check the configuration for values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        let pairs = [
            ("websocket", t.websocket_idle_thresh_min, t.websocket_inactive_thresh_min),
            ("player", t.player_idle_thresh_min, t.player_inactive_thresh_min),
            ("game", t.game_idle_thresh_min, t.game_inactive_thresh_min),
        ];
        for (name, idle, inactive) in pairs {
            if idle <= 0 {
                return Err(ConfigError::NonPositiveThreshold(name));
            }
            if idle >= inactive {
                return Err(ConfigError::ThresholdOrder {
                    name,
                    idle,
                    inactive,
                });
            }
        }
        if t.game_retention_thresh_min <= 0 {
            return Err(ConfigError::NonPositiveThreshold("retention"));
        }

        let s = &self.schedules;
        let schedules = [
            ("idle websocket", s.idle_websocket_check),
            ("idle player", s.idle_player_check),
            ("idle game", s.idle_game_check),
            ("obsolete game", s.obsolete_game_check),
        ];
        for (name, schedule) in schedules {
            if schedule.period_secs == 0 {
                return Err(ConfigError::ZeroPeriod(name));
            }
        }

        Ok(())
    }
}
