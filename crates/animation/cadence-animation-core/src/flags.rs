//! Playback state flags of a time converter.

use serde::{Deserialize, Serialize};

/// Named playback flags. `to_bits`/`from_bits` give the persisted bit layout.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackFlags {
    pub stopped: bool,
    pub looped: bool,
    pub backwards: bool,
    /// Stop once `wrap_time` is crossed (play-to-time on a looping animation).
    pub wrap: bool,
    /// Restore the initial bounds and direction before the next command.
    pub needs_reset: bool,
    /// Set between `start` and `stop`; cleared while easing out.
    pub easing_in: bool,
    /// Position was set directly; the next stopped eval still reports movement.
    pub forced_move: bool,
    /// Suppresses every callback (used while applying synchronised state).
    pub no_callbacks: bool,
}

const STOPPED: u32 = 0x01;
const LOOP: u32 = 0x02;
const BACKWARDS: u32 = 0x04;
const WRAP: u32 = 0x08;
const NEEDS_RESET: u32 = 0x10;
const EASING_IN: u32 = 0x20;
const FORCED_MOVE: u32 = 0x40;
const NO_CALLBACKS: u32 = 0x80;

impl PlaybackFlags {
    pub fn to_bits(self) -> u32 {
        [
            (self.stopped, STOPPED),
            (self.looped, LOOP),
            (self.backwards, BACKWARDS),
            (self.wrap, WRAP),
            (self.needs_reset, NEEDS_RESET),
            (self.easing_in, EASING_IN),
            (self.forced_move, FORCED_MOVE),
            (self.no_callbacks, NO_CALLBACKS),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            stopped: bits & STOPPED != 0,
            looped: bits & LOOP != 0,
            backwards: bits & BACKWARDS != 0,
            wrap: bits & WRAP != 0,
            needs_reset: bits & NEEDS_RESET != 0,
            easing_in: bits & EASING_IN != 0,
            forced_move: bits & FORCED_MOVE != 0,
            no_callbacks: bits & NO_CALLBACKS != 0,
        }
    }
}
