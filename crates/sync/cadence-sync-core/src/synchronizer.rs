//! Applies received records to components and keeps rejection counts.

use tracing::{debug, warn};

use cadence_message::Dispatcher;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::record::StateRecord;
use crate::synched::{ApplyContext, SynchedState};

#[derive(Debug, Default)]
pub struct StateSynchronizer {
    cfg: SyncConfig,
    join_order: u32,
    rejections: u32,
}

impl StateSynchronizer {
    pub fn new(cfg: SyncConfig) -> Self {
        Self {
            cfg,
            join_order: 0,
            rejections: 0,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    pub fn join_order(&self) -> u32 {
        self.join_order
    }

    pub fn set_join_order(&mut self, join_order: u32) {
        self.join_order = join_order;
    }

    /// Updates rejected since creation or the last [`Self::reset_rejections`].
    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    pub fn reset_rejections(&mut self) {
        self.rejections = 0;
    }

    pub fn capture<S: SynchedState + ?Sized>(&self, component: &S) -> StateRecord {
        let mut rec = StateRecord::new(component.record_name());
        component.put_current_state_into(&mut rec);
        rec
    }

    /// Apply `rec` to `component`. A rejected record leaves the component
    /// unchanged and is counted.
    pub fn apply<S: SynchedState + ?Sized, D: Dispatcher>(
        &mut self,
        component: &mut S,
        rec: &StateRecord,
        now: f64,
        out: &mut D,
    ) -> SyncResult<()> {
        let result = if rec.name() != component.record_name() {
            Err(SyncError::WrongType {
                field: rec.name().to_string(),
                expected: component.record_name(),
            })
        } else {
            let mut ctx = ApplyContext {
                now,
                join_order: self.join_order,
                replay_elapsed: self.cfg.replay_elapsed,
                out,
            };
            component.set_current_state_from(rec, &mut ctx)
        };

        match &result {
            Ok(()) => debug!(
                target: "cadence::sync",
                record = rec.name(),
                fields = rec.len(),
                "state applied"
            ),
            Err(err) => {
                self.rejections += 1;
                if self.rejections >= self.cfg.max_rejections_before_warn {
                    warn!(
                        target: "cadence::sync",
                        record = rec.name(),
                        rejections = self.rejections,
                        category = err.category(),
                        error = %err,
                        "rejected state update"
                    );
                } else {
                    debug!(
                        target: "cadence::sync",
                        record = rec.name(),
                        error = %err,
                        "rejected state update"
                    );
                }
            }
        }
        result
    }

    pub fn apply_json<S: SynchedState + ?Sized, D: Dispatcher>(
        &mut self,
        component: &mut S,
        json: &str,
        now: f64,
        out: &mut D,
    ) -> SyncResult<()> {
        let rec = match StateRecord::from_json(json) {
            Ok(rec) => rec,
            Err(err) => {
                self.rejections += 1;
                return Err(err);
            }
        };
        self.apply(component, &rec, now, out)
    }
}
