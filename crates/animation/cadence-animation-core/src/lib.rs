//! Cadence animation core (engine-agnostic)
//!
//! World-to-animation time conversion with easing, looping and scheduled
//! callbacks, plus the per-target blend manager that layers animation
//! instances over shared channels. Nothing here reads a clock or sends a
//! message directly: callers pass world time in and drain outgoing messages.

pub mod channel;
pub mod config;
pub mod definition;
#[cfg(feature = "alloc-tracking")]
pub mod diagnostics;
pub mod ease;
pub mod error;
pub mod flags;
pub mod instance;
pub mod manager;
pub mod snapshot;
pub mod time_convert;
pub mod value;

// Re-exports for consumers
pub use channel::{sample_track, Channel, ChannelGraph};
pub use config::Config;
pub use definition::{
    AnimationDefinition, AnimationLibrary, ChannelTrack, EaseSpec, Keyframe, LoopSegment, Marker,
    ENTIRE_ANIMATION,
};
#[cfg(feature = "alloc-tracking")]
pub use diagnostics::AllocLedger;
pub use ease::{EaseCurve, EaseKind, EaseParams};
pub use error::{AnimationError, AnimationResult};
pub use flags::PlaybackFlags;
pub use instance::{AnimationInstance, FadeKind, FadeOutcome, OneShotCallback};
pub use manager::{BlendManager, GroupRole, MAX_BLEND_PRIORITY};
pub use snapshot::StateSnapshot;
pub use time_convert::{EaseSlot, TimeConvert, TimeConvertState, MAX_STOP_POINTS};
pub use value::{Value, ValueKind};
