//! The seam between synchronised components and the record transport.

use cadence_message::Dispatcher;

use crate::error::SyncResult;
use crate::record::StateRecord;

/// What a component needs while applying received state.
pub struct ApplyContext<'a> {
    /// Current world time in seconds.
    pub now: f64,
    /// 0 for the first client into the session.
    pub join_order: u32,
    pub replay_elapsed: bool,
    /// Receives messages a restore sends, such as re-armed callbacks.
    pub out: &'a mut dyn Dispatcher,
}

/// A component whose state is replicated as a named-field record.
///
/// `set_current_state_from` must validate the whole record before touching
/// the component, so a rejected record leaves it unchanged.
pub trait SynchedState {
    /// Name carried by records of this component.
    fn record_name(&self) -> &'static str;

    fn put_current_state_into(&self, rec: &mut StateRecord);

    fn set_current_state_from(
        &mut self,
        rec: &StateRecord,
        ctx: &mut ApplyContext<'_>,
    ) -> SyncResult<()>;
}
