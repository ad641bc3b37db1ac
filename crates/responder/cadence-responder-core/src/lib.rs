//! Cadence responder core (engine-agnostic)
//!
//! Scripted responders: authored lists of commands per state, sent in order
//! when a notification triggers the responder, with commands able to wait on
//! completion callbacks of earlier ones. Includes fast-forward for observers
//! who join after a sequence already ran, and post-load restore.

pub mod config;
pub mod error;
pub mod fast_forward;
pub mod responder;
pub mod state;

pub use config::ResponderConfig;
pub use error::{ResponderError, ResponderResult};
pub use fast_forward::fast_forward_msg;
pub use responder::{Responder, ResponderSyncState};
pub use state::{
    CompletedEvents, ResponderCmd, ResponderDefinition, ResponderFlags, ResponderState, MAX_WAIT,
};
