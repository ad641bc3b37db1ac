//! Blend manager records: one nested time record per attached instance,
//! named after its animation, plus blend weight and amplitude.

use tracing::warn;

use cadence_animation::{BlendManager, TimeConvertState};

use crate::error::{SyncError, SyncResult};
use crate::record::{StateRecord, SyncValue};
use crate::synched::{ApplyContext, SynchedState};
use crate::time::{put_time_state, time_state_from};

pub const INSTANCES: &str = "instances";
pub const BLEND: &str = "blend";
pub const AMPLITUDE: &str = "amplitude";

struct InstanceUpdate<'r> {
    name: &'r str,
    time: TimeConvertState,
    blend: f32,
    amplitude: Option<f32>,
}

fn parse_instance(value: &SyncValue) -> SyncResult<InstanceUpdate<'_>> {
    let SyncValue::Record(rec) = value else {
        return Err(SyncError::WrongType {
            field: INSTANCES.to_string(),
            expected: "record",
        });
    };
    let blend = rec.float(BLEND)?;
    if !blend.is_finite() || blend < 0.0 {
        return Err(SyncError::out_of_range(BLEND, format!("{blend}")));
    }
    Ok(InstanceUpdate {
        name: rec.name(),
        time: time_state_from(rec)?,
        blend,
        amplitude: rec.opt_float(AMPLITUDE)?,
    })
}

impl SynchedState for BlendManager {
    fn record_name(&self) -> &'static str {
        "blend_manager"
    }

    fn put_current_state_into(&self, rec: &mut StateRecord) {
        let instances = self
            .instances()
            .iter()
            .map(|inst| {
                let mut r = StateRecord::new(inst.name());
                put_time_state(&inst.time().capture_state(), &mut r);
                r.set(BLEND, SyncValue::Float(inst.blend()));
                if let Some(amp) = inst.amplitude() {
                    r.set(AMPLITUDE, SyncValue::Float(amp));
                }
                SyncValue::Record(r)
            })
            .collect();
        rec.set(INSTANCES, SyncValue::List(instances));
    }

    fn set_current_state_from(
        &mut self,
        rec: &StateRecord,
        ctx: &mut ApplyContext<'_>,
    ) -> SyncResult<()> {
        let updates = rec
            .list(INSTANCES)?
            .iter()
            .map(parse_instance)
            .collect::<SyncResult<Vec<_>>>()?;

        for up in &updates {
            let applied = self.apply_instance_state(
                up.name,
                &up.time,
                up.blend,
                up.amplitude,
                ctx.replay_elapsed,
                ctx.now,
            );
            if !applied {
                warn!(
                    target: "cadence::sync",
                    manager = %self.key(),
                    anim = up.name,
                    "synchronised animation is not attached here"
                );
            }
        }
        self.take_dirty();
        for msg in self.take_outgoing() {
            ctx.out.dispatch(msg);
        }
        Ok(())
    }
}
