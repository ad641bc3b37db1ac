//! Core configuration for cadence-animation-core.

use serde::{Deserialize, Serialize};

/// Sizing knobs for time converters and blend managers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on retained state snapshots per time converter, on top of
    /// the one-frame age rule. Never below 1.
    pub max_state_history: usize,

    /// Priority used by `add_target` and `find_or_attach_instance`.
    pub default_blend_priority: i32,

    /// Distinct channels one blend manager may drive. Capped at 64 by the
    /// width of the dirty mask returned from `eval`.
    pub max_channels: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_state_history: 16,
            default_blend_priority: 0,
            max_channels: 64,
        }
    }
}

impl Config {
    #[inline]
    pub fn history_cap(&self) -> usize {
        self.max_state_history.max(1)
    }

    #[inline]
    pub fn channel_cap(&self) -> usize {
        self.max_channels.min(64)
    }
}
