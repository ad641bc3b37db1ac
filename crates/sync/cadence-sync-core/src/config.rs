use serde::{Deserialize, Serialize};

/// Synchroniser settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Evaluate restored time converters forward to the current world time.
    pub replay_elapsed: bool,
    /// Rejected updates tolerated before each further rejection logs a warning.
    pub max_rejections_before_warn: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            replay_elapsed: true,
            max_rejections_before_warn: 3,
        }
    }
}
