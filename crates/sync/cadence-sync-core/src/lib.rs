//! Cadence state synchronisation core
//!
//! Components expose their replicated state as [`StateRecord`]s of named
//! fields through the [`SynchedState`] trait. The [`StateSynchronizer`]
//! captures records for sending and applies received ones, rejecting and
//! counting records that fail validation.

pub mod blend;
pub mod config;
pub mod error;
pub mod record;
pub mod responder;
pub mod synched;
pub mod synchronizer;
pub mod time;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use record::{StateRecord, SyncField, SyncValue};
pub use synched::{ApplyContext, SynchedState};
pub use synchronizer::StateSynchronizer;
