//! Broadcast flags carried by every message.

use serde::{Deserialize, Serialize};

/// Named replacement for the routing bitmask a message carries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastFlags {
    /// Replicate to other clients.
    #[serde(default)]
    pub net_propagate: bool,
    /// The cascade that produced this message started on another machine.
    #[serde(default)]
    pub net_non_local: bool,
    /// This message arrived over the network.
    #[serde(default)]
    pub net_created_remotely: bool,
    /// Never leaves the local machine.
    #[serde(default)]
    pub local_only: bool,
}

const NET_PROPAGATE: u32 = 1 << 0;
const NET_NON_LOCAL: u32 = 1 << 1;
const NET_CREATED_REMOTELY: u32 = 1 << 2;
const LOCAL_ONLY: u32 = 1 << 3;

impl BroadcastFlags {
    pub fn propagated() -> Self {
        Self {
            net_propagate: true,
            ..Self::default()
        }
    }

    /// Apply the cascade rule for a message emitted while handling `parent`.
    ///
    /// A remotely started cascade stays non-local and is not re-propagated, since
    /// every peer runs the same cascade itself.
    pub fn inherit_from(&mut self, parent: &BroadcastFlags) {
        if parent.net_non_local || parent.net_created_remotely {
            self.net_non_local = true;
            self.net_propagate = false;
        }
        if parent.local_only {
            self.local_only = true;
            self.net_propagate = false;
        }
    }

    pub fn to_bits(self) -> u32 {
        let mut bits = 0;
        if self.net_propagate {
            bits |= NET_PROPAGATE;
        }
        if self.net_non_local {
            bits |= NET_NON_LOCAL;
        }
        if self.net_created_remotely {
            bits |= NET_CREATED_REMOTELY;
        }
        if self.local_only {
            bits |= LOCAL_ONLY;
        }
        bits
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            net_propagate: bits & NET_PROPAGATE != 0,
            net_non_local: bits & NET_NON_LOCAL != 0,
            net_created_remotely: bits & NET_CREATED_REMOTELY != 0,
            local_only: bits & LOCAL_ONLY != 0,
        }
    }
}
