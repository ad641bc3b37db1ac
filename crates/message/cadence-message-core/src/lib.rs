//! Cadence message core (engine-agnostic)
//!
//! Value-typed messages exchanged between keyed entities, the dispatch seam the
//! simulation hands them to, the little-endian wire codec used by persisted
//! command lists, and the fan-out/fan-in `MessageAggregator`.

pub mod aggregator;
pub mod dispatch;
pub mod error;
pub mod flags;
pub mod key;
pub mod message;
pub mod wire;

// Re-exports for consumers
pub use aggregator::MessageAggregator;
pub use dispatch::Dispatcher;
pub use error::WireError;
pub use flags::BroadcastFlags;
pub use key::{EntityKey, InstanceId, KeyAllocator};
pub use message::{
    AnimCmd, AnimCommand, CallbackEvent, CallbackTag, EventCallback, GroupCmd, GroupCommand,
    Message, MessageBody, NotifyEvent, NotifyKind, NotifyMsg, SoundCmd, SoundCommand,
};
